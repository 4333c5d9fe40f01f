//! Chat-platform side of ingestion: channel lookup and paginated history.

use crate::cache::ChannelCache;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serenity::all::{ChannelId, GetMessages, Http, Message, MessageId};
use std::sync::Arc;
use tracing::debug;

/// Discord snowflakes count milliseconds from 2015-01-01T00:00:00Z.
pub const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;

/// Largest page the history endpoint serves.
pub const PAGE_SIZE: u8 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHandle {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("channel not found")]
    NotFound,
    #[error("missing access to channel")]
    Forbidden,
    #[error("transport error: {0}")]
    Other(String),
}

impl From<serenity::Error> for TransportError {
    fn from(err: serenity::Error) -> Self {
        if let serenity::Error::Http(http) = &err {
            match http.status_code().map(|s| s.as_u16()) {
                Some(404) => return TransportError::NotFound,
                Some(403) => return TransportError::Forbidden,
                _ => {}
            }
        }
        TransportError::Other(err.to_string())
    }
}

#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn resolve_channel(&self, channel_id: u64) -> Result<ChannelHandle, TransportError>;

    /// Up to `limit` messages whose ids are strictly greater than `after`.
    /// Order within the page is unspecified.
    async fn fetch_page(
        &self,
        channel: &ChannelHandle,
        after: u64,
        limit: u8,
    ) -> Result<Vec<Message>, TransportError>;
}

/// Smallest snowflake whose creation instant is strictly after `at`, minus one,
/// so that an "after" filter with it returns only newer messages.
pub fn snowflake_after(at: DateTime<Utc>) -> u64 {
    let relative = (at.timestamp_millis() - DISCORD_EPOCH_MS + 1).max(0) as u64;
    (relative << 22).saturating_sub(1).max(1)
}

/// Snowflake for a message created at `at` (worker/sequence bits zero).
pub fn snowflake_at(at: DateTime<Utc>) -> u64 {
    let relative = (at.timestamp_millis() - DISCORD_EPOCH_MS).max(0) as u64;
    relative << 22
}

pub struct SerenityHistory {
    http: Arc<Http>,
    channels: ChannelCache,
}

impl SerenityHistory {
    pub fn new(http: Arc<Http>) -> Self {
        Self {
            http,
            channels: ChannelCache::new(64),
        }
    }
}

#[async_trait]
impl MessageSource for SerenityHistory {
    async fn resolve_channel(&self, channel_id: u64) -> Result<ChannelHandle, TransportError> {
        if let Some(name) = self.channels.get(channel_id) {
            return Ok(ChannelHandle { id: channel_id, name });
        }

        let channel = match ChannelId::new(channel_id).to_channel(&self.http).await {
            Ok(channel) => channel,
            Err(e) => {
                self.channels.invalidate(channel_id);
                return Err(e.into());
            }
        };
        let name = channel
            .guild()
            .map(|c| c.name)
            .unwrap_or_else(|| channel_id.to_string());
        self.channels.insert(channel_id, name.clone());
        Ok(ChannelHandle { id: channel_id, name })
    }

    async fn fetch_page(
        &self,
        channel: &ChannelHandle,
        after: u64,
        limit: u8,
    ) -> Result<Vec<Message>, TransportError> {
        let builder = GetMessages::new()
            .after(MessageId::new(after.max(1)))
            .limit(limit);
        let page = ChannelId::new(channel.id)
            .messages(&self.http, builder)
            .await?;
        debug!(
            "Fetched {} messages from #{} after {}",
            page.len(),
            channel.name,
            after
        );
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snowflake_after_excludes_the_boundary_millisecond() {
        let at = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        let boundary = snowflake_at(at);
        let after = snowflake_after(at);

        // Any message created in the boundary millisecond sits at or below `after`.
        assert!(boundary <= after);
        assert!(boundary + (1 << 22) - 1 <= after);
        // The first id of the next millisecond is strictly greater.
        let next = snowflake_at(at + chrono::Duration::milliseconds(1));
        assert!(next > after);
    }

    #[test]
    fn snowflake_after_clamps_pre_epoch_instants() {
        let at = DateTime::from_timestamp(0, 0).unwrap();
        assert_eq!(snowflake_after(at), 1);
    }
}
