//! Resume point for incremental ingestion, derived from what the archive already holds.

use crate::db::Archive;
use crate::diagnostics::Diagnostics;
use chrono::{DateTime, Duration, Utc};

/// Milliseconds added to the stored maximum so the newest archived message is not fetched again.
pub const RESUME_EPSILON_MS: i64 = 1;

pub fn resume_epsilon() -> Duration {
    Duration::milliseconds(RESUME_EPSILON_MS)
}

const SOURCE: &str = "WATERMARK";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkSource {
    /// Highest `timestamp_epoch` stored for the channel.
    Stored { epoch: i64 },
    /// Nothing usable in the archive; `now - lookback`.
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePoint {
    pub at: DateTime<Utc>,
    pub source: WatermarkSource,
}

/// Computes where the next ingestion run starts. Archive failures are not fatal:
/// they are logged and the lookback window is used instead.
pub async fn resolve_resume_point(
    archive: &dyn Archive,
    channel_id: &str,
    now: DateTime<Utc>,
    lookback: Duration,
    diagnostics: &Diagnostics,
) -> ResumePoint {
    let fallback = ResumePoint {
        at: now - lookback,
        source: WatermarkSource::Fallback,
    };

    match archive.max_timestamp_epoch(channel_id).await {
        Ok(Some(epoch)) => match DateTime::from_timestamp(epoch, 0) {
            Some(stored) => ResumePoint {
                at: stored + resume_epsilon(),
                source: WatermarkSource::Stored { epoch },
            },
            None => {
                diagnostics.warn(
                    SOURCE,
                    format!(
                        "Stored epoch {} for channel {} is out of range; fetching the last {} days",
                        epoch,
                        channel_id,
                        lookback.num_days()
                    ),
                );
                fallback
            }
        },
        Ok(None) => {
            diagnostics.warn(
                SOURCE,
                format!(
                    "No archived messages for channel {}; fetching the last {} days",
                    channel_id,
                    lookback.num_days()
                ),
            );
            fallback
        }
        Err(e) => {
            diagnostics.warn(
                SOURCE,
                format!(
                    "Could not read the latest timestamp for channel {} ({}); fetching the last {} days",
                    channel_id,
                    e,
                    lookback.num_days()
                ),
            );
            fallback
        }
    }
}
