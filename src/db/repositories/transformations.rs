use anyhow::{Context, Result};
use rusqlite::{params, Row};

use crate::db::{
    helpers::{parse_datetime, parse_source, parse_transform_type, to_i64, to_u64},
    Database,
};
use crate::transform::TransformationRecord;

const DEFAULT_LIST_LIMIT: usize = 200;

fn row_to_record(row: &Row) -> Result<TransformationRecord> {
    let transform_type: String = row.get("transform_type")?;
    let source: String = row.get("source")?;
    let level: Option<i64> = row.get("level")?;
    let latency_ms: i64 = row.get("latency_ms")?;
    let created_at: String = row.get("created_at")?;

    Ok(TransformationRecord {
        chunk_id: row.get("chunk_id")?,
        route: row.get("route")?,
        transform_type: parse_transform_type(&transform_type)?,
        level: level.and_then(|value| u8::try_from(value).ok()),
        trigger: row.get("trigger_name")?,
        source: parse_source(&source)?,
        original_content: row.get("original_content")?,
        transformed_content: row.get("transformed_content")?,
        latency_ms: to_u64(latency_ms, "latency_ms")?,
        timestamp: parse_datetime(&created_at, "created_at")?,
    })
}

impl Database {
    /// Store applied transformations, optionally tagged with the batch that
    /// carried them to evaluation. Returns the number of rows written.
    pub async fn insert_transformations(
        &self,
        batch_id: Option<String>,
        records: Vec<TransformationRecord>,
    ) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO transformations (
                        batch_id, chunk_id, route, transform_type, level, trigger_name,
                        source, original_content, transformed_content, latency_ms, created_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                )?;
                for record in &records {
                    stmt.execute(params![
                        batch_id,
                        record.chunk_id,
                        record.route,
                        record.transform_type.as_str(),
                        record.level.map(i64::from),
                        record.trigger,
                        record.source.as_str(),
                        record.original_content,
                        record.transformed_content,
                        to_i64(record.latency_ms)?,
                        record.timestamp.to_rfc3339(),
                    ])
                    .context("failed to insert transformation")?;
                }
            }
            tx.commit()?;
            Ok(records.len())
        })
        .await
    }

    /// Most recent transformations first, optionally for a single route.
    pub async fn list_transformations(
        &self,
        route: Option<String>,
        limit: Option<usize>,
    ) -> Result<Vec<TransformationRecord>> {
        let limit = to_i64(limit.unwrap_or(DEFAULT_LIST_LIMIT) as u64)?;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT chunk_id, route, transform_type, level, trigger_name, source,
                        original_content, transformed_content, latency_ms, created_at
                 FROM transformations
                 WHERE (?1 IS NULL OR route = ?1)
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2",
            )?;
            let mut rows = stmt.query(params![route, limit])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_record(row)?);
            }
            Ok(records)
        })
        .await
    }
}
