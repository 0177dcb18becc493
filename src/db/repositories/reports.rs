use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    helpers::{format_as_str, parse_datetime, parse_format, to_i64, to_u64},
    Database,
};
use crate::evaluation::{EvaluationReport, TransformationScore};

fn row_to_report(row: &Row) -> Result<EvaluationReport> {
    let evaluated_at: String = row.get("evaluated_at")?;
    let format: String = row.get("format")?;
    let scored: i64 = row.get("scored_count")?;
    let sampled: i64 = row.get("sampled_count")?;
    let total: i64 = row.get("total_count")?;

    Ok(EvaluationReport {
        batch_id: row.get("batch_id")?,
        session_id: row.get("session_id")?,
        evaluated_at: parse_datetime(&evaluated_at, "evaluated_at")?,
        format: parse_format(&format)?,
        scores: Vec::new(),
        scored_count: to_u64(scored, "scored_count")? as usize,
        sampled_count: to_u64(sampled, "sampled_count")? as usize,
        total_count: to_u64(total, "total_count")? as usize,
        average_score: row.get("average_score")?,
        passed: row.get("passed")?,
        failure: row.get("failure")?,
    })
}

fn load_scores(conn: &Connection, batch_id: &str) -> Result<Vec<TransformationScore>> {
    let mut stmt = conn.prepare(
        "SELECT chunk_id, adversarial_effectiveness, notes, criteria
         FROM transformation_scores
         WHERE batch_id = ?1
         ORDER BY id ASC",
    )?;
    let mut rows = stmt.query(params![batch_id])?;
    let mut scores = Vec::new();
    while let Some(row) = rows.next()? {
        let criteria: Option<String> = row.get(3)?;
        scores.push(TransformationScore {
            chunk_id: row.get(0)?,
            adversarial_effectiveness: row.get(1)?,
            notes: row.get(2)?,
            criteria: criteria
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .context("stored criteria is not valid JSON")?,
        });
    }
    Ok(scores)
}

const REPORT_COLUMNS: &str = "batch_id, session_id, evaluated_at, format, scored_count,
     sampled_count, total_count, average_score, passed, failure";

impl Database {
    /// Persist a report together with its per-transformation scores.
    /// Reports are immutable; saving the same batch twice is an error.
    pub async fn save_report(&self, report: &EvaluationReport) -> Result<()> {
        let report = report.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO evaluation_reports (
                    batch_id, session_id, evaluated_at, format, scored_count,
                    sampled_count, total_count, average_score, passed, failure
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    report.batch_id,
                    report.session_id,
                    report.evaluated_at.to_rfc3339(),
                    format_as_str(report.format),
                    to_i64(report.scored_count as u64)?,
                    to_i64(report.sampled_count as u64)?,
                    to_i64(report.total_count as u64)?,
                    report.average_score,
                    report.passed,
                    report.failure,
                ],
            )
            .with_context(|| format!("failed to insert report {}", report.batch_id))?;

            {
                let mut stmt = tx.prepare(
                    "INSERT INTO transformation_scores
                        (batch_id, chunk_id, adversarial_effectiveness, notes, criteria)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for score in &report.scores {
                    let criteria = score
                        .criteria
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?;
                    stmt.execute(params![
                        report.batch_id,
                        score.chunk_id,
                        score.adversarial_effectiveness,
                        score.notes,
                        criteria,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn get_report(&self, batch_id: &str) -> Result<Option<EvaluationReport>> {
        let batch_id = batch_id.to_string();
        self.execute(move |conn| {
            let sql = format!("SELECT {REPORT_COLUMNS} FROM evaluation_reports WHERE batch_id = ?1");
            let report = conn
                .query_row(&sql, params![batch_id], |row| {
                    Ok(row_to_report(row).map_err(|err| err.to_string()))
                })
                .optional()?;
            match report {
                None => Ok(None),
                Some(Err(message)) => Err(anyhow!(message)),
                Some(Ok(mut report)) => {
                    report.scores = load_scores(conn, &report.batch_id)?;
                    Ok(Some(report))
                }
            }
        })
        .await
    }

    /// Most recently evaluated first.
    pub async fn list_reports(&self, limit: usize) -> Result<Vec<EvaluationReport>> {
        let limit = to_i64(limit as u64)?;
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {REPORT_COLUMNS} FROM evaluation_reports
                 ORDER BY evaluated_at DESC LIMIT ?1"
            );
            let mut reports = Vec::new();
            {
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query(params![limit])?;
                while let Some(row) = rows.next()? {
                    reports.push(row_to_report(row)?);
                }
            }
            for report in &mut reports {
                report.scores = load_scores(conn, &report.batch_id)?;
            }
            Ok(reports)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::config::ResponseFormat;

    fn report(batch_id: &str) -> EvaluationReport {
        EvaluationReport {
            batch_id: batch_id.into(),
            session_id: "session-1".into(),
            evaluated_at: Utc::now(),
            format: ResponseFormat::Verbose,
            scores: vec![
                TransformationScore {
                    chunk_id: "p-1".into(),
                    adversarial_effectiveness: 7.0,
                    notes: "subtle".into(),
                    criteria: Some(json!({"coherence": "kept"})),
                },
                TransformationScore {
                    chunk_id: "p-2".into(),
                    adversarial_effectiveness: 5.0,
                    notes: String::new(),
                    criteria: None,
                },
            ],
            scored_count: 2,
            sampled_count: 2,
            total_count: 4,
            average_score: 6.0,
            passed: true,
            failure: None,
        }
    }

    #[tokio::test]
    async fn saved_report_reads_back_with_scores() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("r.db")).unwrap();
        let original = report("batch-a");
        db.save_report(&original).await.unwrap();

        let loaded = db.get_report("batch-a").await.unwrap().unwrap();
        assert_eq!(loaded.scores, original.scores);
        assert_eq!(loaded.format, ResponseFormat::Verbose);
        assert_eq!(loaded.total_count, 4);
        assert!(loaded.passed);

        assert!(db.get_report("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reports_are_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("r.db")).unwrap();
        db.save_report(&report("batch-a")).await.unwrap();
        assert!(db.save_report(&report("batch-a")).await.is_err());

        let listed = db.list_reports(10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].scores.len(), 2);
    }
}
