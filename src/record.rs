//! Archive record shapes and the mapping from raw chat messages.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serenity::model::channel::Message;
use serenity::model::timestamp::Timestamp;

/// One archived chat message. `id` is the upsert key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub channel_id: String,
    pub guild_id: Option<String>,
    pub author_id: String,
    pub author_name: String,
    pub author_display_name: String,
    pub content: String,
    /// ISO 8601 UTC, millisecond precision, `Z` suffix.
    pub timestamp: String,
    pub timestamp_epoch: i64,
    pub attachment_count: i64,
    pub reaction_count: i64,
    pub edited_timestamp: Option<String>,
}

impl MessageRecord {
    pub fn from_message(message: &Message) -> Self {
        let author_display_name = message
            .member
            .as_ref()
            .and_then(|m| m.nick.clone())
            .or_else(|| message.author.global_name.clone())
            .unwrap_or_else(|| message.author.name.clone());

        let created = timestamp_to_utc(&message.timestamp);
        let reaction_count: u64 = message.reactions.iter().map(|r| r.count).sum();

        Self {
            id: message.id.to_string(),
            channel_id: message.channel_id.to_string(),
            guild_id: message.guild_id.map(|id| id.to_string()),
            author_id: message.author.id.to_string(),
            author_name: message.author.name.clone(),
            author_display_name,
            content: message.content.clone(),
            timestamp: format_iso(created),
            timestamp_epoch: created.timestamp(),
            attachment_count: message.attachments.len() as i64,
            reaction_count: reaction_count as i64,
            edited_timestamp: message
                .edited_timestamp
                .as_ref()
                .map(|ts| format_iso(timestamp_to_utc(ts))),
        }
    }
}

/// The projected subset of a record returned by a generated query.
/// Every field is optional because the projection is chosen by the model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartialRecord {
    pub id: Option<String>,
    pub channel_id: Option<String>,
    pub guild_id: Option<String>,
    pub author_name: Option<String>,
    pub author_display_name: Option<String>,
    pub content: Option<String>,
    pub timestamp: Option<String>,
}

impl PartialRecord {
    pub fn speaker(&self) -> &str {
        self.author_display_name
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or(self.author_name.as_deref().filter(|s| !s.trim().is_empty()))
            .unwrap_or("Unknown author")
    }
}

/// Keeps the millisecond part; `timestamp_epoch` is derived from it in whole seconds.
fn timestamp_to_utc(ts: &Timestamp) -> DateTime<Utc> {
    ts.with_timezone(&Utc)
}

/// Formats an instant the way the archive stores it, e.g. `2024-03-14T09:05:00.000Z`.
pub fn format_iso(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
