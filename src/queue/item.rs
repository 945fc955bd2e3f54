//! Work item type and its status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a work item.
///
/// Transitions are linear: `Pending -> Processing -> {Done, Failed}`. The
/// only exception is the shutdown-time orphan reset, which pushes
/// `Processing` rows back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Processing,
    Done,
    Failed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// The result of one of the three HTTP calls issued for a work item.
#[derive(Debug, Clone)]
pub struct HttpResult {
    pub body: String,
    pub status: i64,
    pub duration_ms: f64,
}

/// A row of the `work_queue` table.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub id: i64,
    pub source_id: i64,
    pub payload: String,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub results: [Option<HttpResult>; 3],
}

/// Parse a database row into a [`WorkItem`].
pub(crate) fn row_to_work_item(row: &rusqlite::Row) -> rusqlite::Result<WorkItem> {
    let status_str: String = row.get("status")?;
    let status = Status::from_str(&status_str).unwrap_or(Status::Pending);

    let result = |body_col: &str, status_col: &str, duration_col: &str| -> rusqlite::Result<Option<HttpResult>> {
        let body: Option<String> = row.get(body_col)?;
        let status: Option<i64> = row.get(status_col)?;
        let duration_ms: Option<f64> = row.get(duration_col)?;
        Ok(match (body, status, duration_ms) {
            (Some(body), Some(status), Some(duration_ms)) => Some(HttpResult {
                body,
                status,
                duration_ms,
            }),
            _ => None,
        })
    };

    Ok(WorkItem {
        id: row.get("id")?,
        source_id: row.get("source_id")?,
        payload: row.get("payload")?,
        status,
        created_at: parse_timestamp(&row.get::<_, String>("created_at")?),
        processed_at: row
            .get::<_, Option<String>>("processed_at")?
            .map(|s| parse_timestamp(&s)),
        results: [
            result("result_1_body", "result_1_status", "result_1_duration_ms")?,
            result("result_2_body", "result_2_status", "result_2_duration_ms")?,
            result("result_3_body", "result_3_status", "result_3_duration_ms")?,
        ],
    })
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
