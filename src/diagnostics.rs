//! Diagnostic sink shared by ingestion, the ask pipeline, and the `logs` command.
//!
//! Every entry goes to `tracing`. Entries from the ask path are also kept in a
//! bounded ring buffer so operators can read them back from chat, and alerts
//! can be forwarded to a diagnostics channel by [`forward_to_channel`].

use crate::config::{EMBED_DESCRIPTION_CAP, PLAIN_MESSAGE_CAP};
use crate::discord_text::{char_len, code_block, truncate_with_suffix};
use chrono::{DateTime, Utc};
use serenity::all::{ChannelId, CreateMessage, Http};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub const RING_CAPACITY: usize = 50;
pub const MAX_ENTRY_CHARS: usize = 500;
const ENTRY_TRUNCATION_SUFFIX: &str = "... (entry truncated)";
const DIGEST_TRUNCATION_NOTICE: &str = "\n... (older entries omitted to fit)";
const POLICY_MARKER: &str = "❌";

/// Source tags mirrored into the ring buffer.
const MIRRORED_PREFIXES: [&str; 3] = ["ASK-CMD", "AI-QUERY", "AI-SUMMARY"];
pub const TOKEN_USAGE_SOURCE: &str = "AI-TOKEN-USAGE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticLogEntry {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub text: String,
}

impl DiagnosticLogEntry {
    pub fn render(&self) -> String {
        format!(
            "{} [{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.source,
            self.text
        )
    }
}

/// Fixed-capacity FIFO: pushing into a full buffer evicts the oldest entry.
#[derive(Debug)]
pub struct RingBuffer<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: T) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An entry on its way to the diagnostics channel.
#[derive(Debug, Clone)]
pub struct ChannelNotice {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub text: String,
    pub content_policy: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Forward {
    No,
    Alert,
    ContentPolicy,
}

#[derive(Clone)]
pub struct Diagnostics {
    ring: Arc<Mutex<RingBuffer<DiagnosticLogEntry>>>,
    channel: Option<mpsc::UnboundedSender<ChannelNotice>>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(RING_CAPACITY)
    }
}

impl Diagnostics {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Arc::new(Mutex::new(RingBuffer::new(capacity))),
            channel: None,
        }
    }

    /// Alerts are additionally sent to `channel` once attached.
    pub fn with_channel(mut self, channel: mpsc::UnboundedSender<ChannelNotice>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn info(&self, source: &str, text: impl Into<String>) {
        self.record(source, Severity::Info, text.into(), Forward::No);
    }

    pub fn warn(&self, source: &str, text: impl Into<String>) {
        self.record(source, Severity::Warn, text.into(), Forward::No);
    }

    pub fn error(&self, source: &str, text: impl Into<String>) {
        self.record(source, Severity::Error, text.into(), Forward::No);
    }

    /// An error that is also mirrored to the diagnostics channel.
    pub fn alert(&self, source: &str, text: impl Into<String>) {
        self.record(source, Severity::Error, text.into(), Forward::Alert);
    }

    /// A content-policy refusal, mirrored to the diagnostics channel with a distinct marker.
    pub fn policy_alert(&self, source: &str, text: impl Into<String>) {
        self.record(source, Severity::Error, text.into(), Forward::ContentPolicy);
    }

    fn record(&self, source: &str, severity: Severity, text: String, forward: Forward) {
        let source = source.to_uppercase();
        match severity {
            Severity::Info => info!(source = %source, "{}", text),
            Severity::Warn => warn!(source = %source, "{}", text),
            Severity::Error => error!(source = %source, "{}", text),
        }

        let timestamp = Utc::now();
        if is_mirrored(&source) {
            let entry = DiagnosticLogEntry {
                timestamp,
                source: source.clone(),
                text: text.clone(),
            };
            // The rendered line is bounded, so only the text part is cut.
            let prefix_len = char_len(&entry.render()) - char_len(&entry.text);
            let text_cap = MAX_ENTRY_CHARS.saturating_sub(prefix_len);
            let stored = match truncate_with_suffix(&entry.text, text_cap, ENTRY_TRUNCATION_SUFFIX, 0) {
                Some(text) => DiagnosticLogEntry { text, ..entry },
                None => entry,
            };
            self.ring.lock().unwrap_or_else(|e| e.into_inner()).push(stored);
        }

        if forward == Forward::No {
            return;
        }
        if let Some(channel) = &self.channel {
            let notice = ChannelNotice {
                timestamp,
                source,
                text,
                content_policy: forward == Forward::ContentPolicy,
            };
            if channel.send(notice).is_err() {
                debug!("Diagnostics channel forwarder is gone; dropping notice");
            }
        }
    }

    /// Mirrored entries, oldest first.
    pub fn recent(&self) -> Vec<DiagnosticLogEntry> {
        self.ring.lock().unwrap_or_else(|e| e.into_inner()).snapshot()
    }
}

fn is_mirrored(source: &str) -> bool {
    source == TOKEN_USAGE_SOURCE || MIRRORED_PREFIXES.iter().any(|p| source.starts_with(p))
}

/// Renders ring-buffer entries newest first, stopping before `cap` characters.
/// Returns `None` when there is nothing to show.
pub fn render_digest(entries: &[DiagnosticLogEntry], cap: usize) -> Option<String> {
    if entries.is_empty() {
        return None;
    }
    let budget = cap.saturating_sub(char_len(DIGEST_TRUNCATION_NOTICE));
    let mut out = String::new();
    let mut used = 0usize;
    for entry in entries.iter().rev() {
        let line = format!("{}\n", entry.render());
        let line_len = char_len(&line);
        if used + line_len > budget {
            out.push_str(DIGEST_TRUNCATION_NOTICE);
            return Some(out);
        }
        out.push_str(&line);
        used += line_len;
    }
    Some(out)
}

/// Formats a notice for the diagnostics channel, capped to a plain message.
pub fn format_notice(notice: &ChannelNotice) -> String {
    let header = format!(
        "{} [{}]",
        notice.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        notice.source
    );
    let body = if notice.content_policy {
        format!("{} {}", POLICY_MARKER, notice.text)
    } else {
        notice.text.clone()
    };
    // Room for the header, the newline, and the code fences.
    let room = PLAIN_MESSAGE_CAP.saturating_sub(char_len(&header) + 1 + 8);
    let body = truncate_with_suffix(&body, room, "... (truncated)", 0).unwrap_or(body);
    code_block(&format!("{}\n{}", header, body))
}

/// Drains notices into the diagnostics channel until every sender is dropped.
pub async fn forward_to_channel(
    http: Arc<Http>,
    channel_id: u64,
    mut notices: mpsc::UnboundedReceiver<ChannelNotice>,
) {
    info!("Diagnostics forwarding to channel {}", channel_id);
    let channel = ChannelId::new(channel_id);
    while let Some(notice) = notices.recv().await {
        let content = format_notice(&notice);
        if let Err(e) = channel
            .send_message(&http, CreateMessage::new().content(content))
            .await
        {
            warn!("Failed to mirror diagnostic to channel {}: {}", channel_id, e);
        }
    }
}

/// Cap used by the `logs` command.
pub const DIGEST_CAP: usize = EMBED_DESCRIPTION_CAP;
