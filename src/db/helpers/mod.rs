use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};

use crate::config::ResponseFormat;
use crate::transform::{ContentSource, TransformType};

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_transform_type(value: &str) -> Result<TransformType> {
    match value {
        "expand" => Ok(TransformType::Expand),
        "rewrite" => Ok(TransformType::Rewrite),
        other => Err(anyhow!("unknown transform type {other}")),
    }
}

pub fn parse_source(value: &str) -> Result<ContentSource> {
    match value {
        "contentMap" => Ok(ContentSource::ContentMap),
        "pregenerated" => Ok(ContentSource::Pregenerated),
        "live" => Ok(ContentSource::Live),
        other => Err(anyhow!("unknown content source {other}")),
    }
}

pub fn format_as_str(format: ResponseFormat) -> &'static str {
    match format {
        ResponseFormat::Compact => "compact",
        ResponseFormat::Verbose => "verbose",
    }
}

pub fn parse_format(value: &str) -> Result<ResponseFormat> {
    match value {
        "compact" => Ok(ResponseFormat::Compact),
        "verbose" => Ok(ResponseFormat::Verbose),
        other => Err(anyhow!("unknown response format {other}")),
    }
}
