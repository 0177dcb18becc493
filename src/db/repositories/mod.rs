mod reports;
mod transformations;
