use crate::db::{Archive, ArchiveError, QueryRow};
use crate::diagnostics::Diagnostics;
use crate::record::PartialRecord;
use serde_json::Value;

const SOURCE: &str = "ASK-CMD";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultSet {
    Empty,
    Scalar(u64),
    Rows(Vec<PartialRecord>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionFailure {
    TooExpensive,
    Throttled,
    Failed,
}

impl ExecutionFailure {
    pub fn user_message(&self) -> &'static str {
        match self {
            ExecutionFailure::TooExpensive => {
                "Your request produced a query that is too complex. Please be more specific."
            }
            ExecutionFailure::Throttled => "The archive is temporarily overloaded. Please try again later.",
            ExecutionFailure::Failed => "Something went wrong while searching the archive.",
        }
    }
}

impl From<&ArchiveError> for ExecutionFailure {
    fn from(err: &ArchiveError) -> Self {
        match err {
            ArchiveError::ResourceExhausted => ExecutionFailure::TooExpensive,
            ArchiveError::Throttled(_) => ExecutionFailure::Throttled,
            _ => ExecutionFailure::Failed,
        }
    }
}

/// True for the count-aggregate shape the synthesizer is told to produce.
pub fn is_count_query(sql: &str) -> bool {
    let compact: String = sql
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_uppercase();
    compact.starts_with("SELECT COUNT(") || compact.starts_with("SELECT COUNT (")
}

pub async fn execute(
    archive: &dyn Archive,
    sql: &str,
    requester_label: &str,
    diagnostics: &Diagnostics,
) -> Result<ResultSet, ExecutionFailure> {
    match archive.query(sql).await {
        Ok(rows) => Ok(classify_rows(sql, rows)),
        Err(e) => {
            diagnostics.alert(
                SOURCE,
                format!("Archive error for '{}': {}. Requested by {}", sql, e, requester_label),
            );
            Err(ExecutionFailure::from(&e))
        }
    }
}

pub fn classify_rows(sql: &str, rows: Vec<QueryRow>) -> ResultSet {
    if rows.is_empty() {
        return ResultSet::Empty;
    }
    if is_count_query(sql) && rows.len() == 1 && rows[0].len() == 1 {
        if let Some(n) = rows[0].values().next().and_then(Value::as_u64) {
            return ResultSet::Scalar(n);
        }
    }
    ResultSet::Rows(rows.into_iter().map(to_partial).collect())
}

/// Non-string scalars are stringified so a loosely projected row still maps.
fn to_partial(row: QueryRow) -> PartialRecord {
    let normalized = row
        .into_iter()
        .filter_map(|(column, value)| {
            let value = match value {
                Value::Null => return None,
                Value::String(s) => Value::String(s),
                other => Value::String(other.to_string()),
            };
            Some((column, value))
        })
        .collect();
    serde_json::from_value(Value::Object(normalized)).unwrap_or_default()
}
