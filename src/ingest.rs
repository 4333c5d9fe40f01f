//! Periodic, resumable archiving of the target channel.

use crate::db::Archive;
use crate::diagnostics::Diagnostics;
use crate::record::MessageRecord;
use crate::transport::{snowflake_after, ChannelHandle, MessageSource, TransportError, PAGE_SIZE};
use crate::watermark::{resolve_resume_point, ResumePoint};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{interval, Duration};

const SOURCE: &str = "AUTO-FETCH";
const SCHEDULER: &str = "SCHEDULER";
const PROGRESS_EVERY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub channel_name: String,
    pub fetched: usize,
    pub stored: usize,
    pub failed: usize,
    pub resume_point: ResumePoint,
}

#[derive(Debug)]
pub enum TickOutcome {
    Completed(IngestReport),
    AlreadyRunning,
    Disabled,
    Aborted(String),
}

pub struct IngestionEngine {
    archive: Option<Arc<dyn Archive>>,
    source: Arc<dyn MessageSource>,
    channel_id: Option<u64>,
    interval: Duration,
    lookback: chrono::Duration,
    diagnostics: Diagnostics,
    running: AtomicBool,
    disabled: AtomicBool,
}

/// Clears the running flag however the run ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl IngestionEngine {
    pub fn new(
        archive: Option<Arc<dyn Archive>>,
        source: Arc<dyn MessageSource>,
        channel_id: Option<u64>,
        interval: Duration,
        lookback: chrono::Duration,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            archive,
            source,
            channel_id,
            interval,
            lookback,
            diagnostics,
            running: AtomicBool::new(false),
            disabled: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> EngineState {
        if self.disabled.load(Ordering::SeqCst) {
            EngineState::Disabled
        } else if self.running.load(Ordering::SeqCst) {
            EngineState::Running
        } else {
            EngineState::Idle
        }
    }

    /// Ticks on the configured interval until the engine disables itself.
    /// The first tick fires immediately.
    pub async fn run(self: Arc<Self>) {
        self.diagnostics.info(
            SCHEDULER,
            format!(
                "Message archiving scheduled every {}",
                humantime::format_duration(self.interval)
            ),
        );
        let mut ticker = interval(self.interval);
        loop {
            ticker.tick().await;
            match self.tick().await {
                TickOutcome::Disabled => {
                    self.diagnostics.error(SCHEDULER, "Message archiving stopped: engine disabled");
                    return;
                }
                TickOutcome::AlreadyRunning => {
                    self.diagnostics.warn(SCHEDULER, "Previous archiving run still in progress; skipping tick");
                }
                TickOutcome::Aborted(reason) => {
                    self.diagnostics.warn(SCHEDULER, format!("Archiving run aborted: {}", reason));
                }
                TickOutcome::Completed(_) => {}
            }
        }
    }

    /// One scheduled run. Never overlaps with another run of the same engine.
    pub async fn tick(&self) -> TickOutcome {
        if self.disabled.load(Ordering::SeqCst) {
            return TickOutcome::Disabled;
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return TickOutcome::AlreadyRunning;
        }
        let _guard = RunGuard(&self.running);

        self.diagnostics.info(SCHEDULER, "Starting scheduled message archiving");
        let (archive, channel_id) = match self.preconditions().await {
            Ok(ready) => ready,
            Err(reason) => {
                self.diagnostics.error(SOURCE, format!("{}; disabling message archiving", reason));
                self.disabled.store(true, Ordering::SeqCst);
                return TickOutcome::Disabled;
            }
        };

        let channel = match self.source.resolve_channel(channel_id).await {
            Ok(channel) => channel,
            Err(e) => {
                let reason = match e {
                    TransportError::NotFound => format!("channel {} not found", channel_id),
                    TransportError::Forbidden => format!("missing access to channel {}", channel_id),
                    TransportError::Other(detail) => {
                        format!("could not resolve channel {}: {}", channel_id, detail)
                    }
                };
                self.diagnostics.error(SOURCE, reason.clone());
                return TickOutcome::Aborted(reason);
            }
        };

        let outcome = match self.ingest(archive.as_ref(), &channel).await {
            Ok(report) => {
                self.diagnostics.info(
                    SOURCE,
                    format!(
                        "Archiving of #{} finished: {} fetched, {} stored, {} failed",
                        report.channel_name, report.fetched, report.stored, report.failed
                    ),
                );
                TickOutcome::Completed(report)
            }
            Err(reason) => {
                self.diagnostics.error(SOURCE, reason.clone());
                TickOutcome::Aborted(reason)
            }
        };
        self.diagnostics.info(SCHEDULER, "Scheduled message archiving finished");
        outcome
    }

    async fn preconditions(&self) -> Result<(Arc<dyn Archive>, u64), String> {
        let channel_id = self
            .channel_id
            .ok_or_else(|| "TARGET_CHANNEL_ID is not configured".to_string())?;
        let archive = self
            .archive
            .clone()
            .ok_or_else(|| "archive is not configured".to_string())?;
        archive
            .ping()
            .await
            .map_err(|e| format!("archive is unreachable: {}", e))?;
        Ok((archive, channel_id))
    }

    async fn ingest(&self, archive: &dyn Archive, channel: &ChannelHandle) -> Result<IngestReport, String> {
        let channel_key = channel.id.to_string();
        let resume_point = resolve_resume_point(
            archive,
            &channel_key,
            Utc::now(),
            self.lookback,
            &self.diagnostics,
        )
        .await;
        self.diagnostics.info(
            SOURCE,
            format!(
                "Fetching messages from #{} newer than {}",
                channel.name,
                resume_point.at.to_rfc3339()
            ),
        );

        let mut report = IngestReport {
            channel_name: channel.name.clone(),
            fetched: 0,
            stored: 0,
            failed: 0,
            resume_point,
        };
        let mut after = snowflake_after(resume_point.at);

        loop {
            let mut page = self
                .source
                .fetch_page(channel, after, PAGE_SIZE)
                .await
                .map_err(|e| {
                    format!(
                        "history fetch for #{} failed after {} messages: {}",
                        channel.name, report.fetched, e
                    )
                })?;
            if page.is_empty() {
                break;
            }
            page.sort_by_key(|m| m.id);
            let page_len = page.len();

            for message in &page {
                after = after.max(message.id.get());
                report.fetched += 1;

                let record = MessageRecord::from_message(message);
                let id = record.id.clone();
                match archive.upsert(record).await {
                    Ok(()) => report.stored += 1,
                    Err(e) => {
                        report.failed += 1;
                        self.diagnostics.error(SOURCE, format!("Failed to store message {}: {}", id, e));
                    }
                }

                if report.fetched % PROGRESS_EVERY == 0 {
                    self.diagnostics.info(
                        SOURCE,
                        format!("{} messages processed from #{}", report.fetched, channel.name),
                    );
                }
            }

            if page_len < PAGE_SIZE as usize {
                break;
            }
        }

        Ok(report)
    }
}
