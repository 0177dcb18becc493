use std::sync::Arc;

use crate::config::EvaluationConfig;
use crate::db::Database;
use crate::remote::ScoringService;

use super::batch::EvaluationBatch;
use super::parser::parse_response;
use super::prompt::build_request;
use super::report::EvaluationReport;
use super::sampling::sample_batch;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Samples a batch, asks the scoring service about it and turns the answer
/// into a report. Never fails: every problem ends in a failing report.
#[derive(Clone)]
pub struct Evaluator {
    config: EvaluationConfig,
    scoring: Arc<dyn ScoringService>,
    db: Option<Database>,
}

impl Evaluator {
    pub fn new(config: EvaluationConfig, scoring: Arc<dyn ScoringService>) -> Self {
        Self {
            config,
            scoring,
            db: None,
        }
    }

    /// Persist every report and the batch's transformations.
    pub fn with_database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    pub async fn evaluate(&self, batch: &EvaluationBatch) -> EvaluationReport {
        let report = self.score_batch(batch).await;
        self.persist(batch, &report).await;
        report
    }

    async fn score_batch(&self, batch: &EvaluationBatch) -> EvaluationReport {
        let format = self.config.response_format;
        let sampled = sample_batch(&batch.batch_id, &batch.transformations, &self.config.rates);

        if sampled.is_empty() {
            log_info!(
                "batch {}: nothing sampled from {} transformations",
                batch.batch_id,
                batch.transformations.len()
            );
            return EvaluationReport::trivially_passing(batch, format);
        }

        let request = build_request(batch, &sampled, &self.config);
        let raw = match self.scoring.score(&request).await {
            Ok(raw) => raw,
            Err(err) => {
                log_warn!("batch {}: scoring request failed: {err:#}", batch.batch_id);
                return EvaluationReport::failed(
                    batch,
                    format,
                    sampled.len(),
                    format!("scoring service error: {err}"),
                );
            }
        };

        let parsed = match parse_response(&raw) {
            Some(parsed) => parsed,
            None => {
                return EvaluationReport::failed(
                    batch,
                    format,
                    sampled.len(),
                    "scoring response held no recoverable scores",
                );
            }
        };

        let report = EvaluationReport::scored(
            batch,
            format,
            sampled.len(),
            parsed.scores,
            parsed.average_score,
            self.config.pass_threshold,
        );
        log_info!(
            "batch {}: scored {}/{} (sampled {}), average {:.2}, {}",
            report.batch_id,
            report.scored_count,
            report.total_count,
            report.sampled_count,
            report.average_score,
            if report.passed { "passed" } else { "failed" }
        );
        report
    }

    async fn persist(&self, batch: &EvaluationBatch, report: &EvaluationReport) {
        let Some(db) = &self.db else {
            return;
        };
        if let Err(err) = db
            .insert_transformations(Some(batch.batch_id.clone()), batch.transformations.clone())
            .await
        {
            log_warn!("batch {}: failed to store transformations: {err:#}", batch.batch_id);
        }
        if let Err(err) = db.save_report(report).await {
            log_warn!("batch {}: failed to store report: {err:#}", batch.batch_id);
        }
    }
}
