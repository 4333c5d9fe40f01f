#![allow(dead_code)]

use async_trait::async_trait;
use chronicle::ask::{Responder, SendError, SummaryCard};
use chronicle::db::{Archive, ArchiveError, Database, QueryRow};
use chronicle::llm::{Completion, CompletionRequest, LanguageModel, LlmError, TokenUsage};
use chronicle::record::MessageRecord;
use chronicle::transport::{snowflake_at, ChannelHandle, MessageSource, TransportError};
use chrono::{DateTime, Utc};
use serenity::all::{ChannelId, GuildId, Message, MessageId, Timestamp, User, UserId};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const GUILD: u64 = 900;
pub const CHANNEL: u64 = 700;

pub fn memory_db() -> Database {
    let db = Database::open(":memory:", Duration::from_secs(5)).unwrap();
    db.execute_init().unwrap();
    db
}

/// Whole-second instant `secs_ago` seconds before now.
pub fn seconds_ago(secs_ago: i64) -> DateTime<Utc> {
    let now = Utc::now().timestamp();
    DateTime::from_timestamp(now - secs_ago, 0).unwrap()
}

pub fn message(at: DateTime<Utc>, seq: u64, content: &str) -> Message {
    let mut msg = Message::default();
    msg.id = MessageId::new(snowflake_at(at) + seq + 1);
    msg.channel_id = ChannelId::new(CHANNEL);
    msg.guild_id = Some(GuildId::new(GUILD));
    msg.author = User::default();
    msg.author.id = UserId::new(5);
    msg.author.name = "flyxowl".to_string();
    msg.content = content.to_string();
    msg.timestamp = Timestamp::from_unix_timestamp(at.timestamp()).unwrap();
    msg
}

/// In-memory channel history honouring `after` and `limit` like the real endpoint.
/// Pages come back newest first to make sure callers sort them.
pub struct FakeHistory {
    pub messages: Mutex<Vec<Message>>,
    pub ignore_after: bool,
    pub fail_after_pages: Option<usize>,
    pub pages_served: AtomicUsize,
}

impl FakeHistory {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages: Mutex::new(messages),
            ignore_after: false,
            fail_after_pages: None,
            pages_served: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, message: Message) {
        self.messages.lock().unwrap().push(message);
    }
}

#[async_trait]
impl MessageSource for FakeHistory {
    async fn resolve_channel(&self, channel_id: u64) -> Result<ChannelHandle, TransportError> {
        if channel_id != CHANNEL {
            return Err(TransportError::NotFound);
        }
        Ok(ChannelHandle {
            id: channel_id,
            name: "archive-me".to_string(),
        })
    }

    async fn fetch_page(
        &self,
        _channel: &ChannelHandle,
        after: u64,
        limit: u8,
    ) -> Result<Vec<Message>, TransportError> {
        let served = self.pages_served.fetch_add(1, Ordering::SeqCst);
        if self.fail_after_pages.is_some_and(|max| served >= max) {
            return Err(TransportError::Other("connection reset".to_string()));
        }
        let mut matching: Vec<Message> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| self.ignore_after || m.id.get() > after)
            .cloned()
            .collect();
        matching.sort_by_key(|m| m.id);
        if self.ignore_after {
            // Re-serving everything forever would never end; one full pass only.
            if served > 0 {
                return Ok(Vec::new());
            }
        }
        matching.truncate(limit as usize);
        matching.reverse();
        Ok(matching)
    }
}

/// Archive wrapper counting every call and optionally failing some of them.
pub struct CountingArchive {
    pub inner: Database,
    pub calls: AtomicUsize,
    pub fail_upsert_ids: Vec<String>,
    pub fail_queries_with: Option<fn() -> ArchiveError>,
}

impl CountingArchive {
    pub fn new(inner: Database) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
            fail_upsert_ids: Vec::new(),
            fail_queries_with: None,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Archive for CountingArchive {
    async fn ping(&self) -> Result<(), ArchiveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.ping().await
    }

    async fn upsert(&self, record: MessageRecord) -> Result<(), ArchiveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_upsert_ids.contains(&record.id) {
            return Err(ArchiveError::Store("disk full".to_string()));
        }
        self.inner.upsert(record).await
    }

    async fn max_timestamp_epoch(&self, channel_id: &str) -> Result<Option<i64>, ArchiveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.max_timestamp_epoch(channel_id).await
    }

    async fn query(&self, text: &str) -> Result<Vec<QueryRow>, ArchiveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(fail) = self.fail_queries_with {
            return Err(fail());
        }
        self.inner.query(text).await
    }

    async fn count(&self, channel_id: &str) -> Result<u64, ArchiveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.count(channel_id).await
    }
}

/// Language model answering from a script and recording every request.
#[derive(Default)]
pub struct ScriptedModel {
    pub answers: Mutex<VecDeque<Result<Completion, LlmError>>>,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub fn new(answers: Vec<Result<Completion, LlmError>>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

pub fn text(answer: &str) -> Result<Completion, LlmError> {
    Ok(Completion {
        text: Some(answer.to_string()),
        usage: Some(TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 20,
            total_tokens: 120,
        }),
    })
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        self.requests.lock().unwrap().push(request);
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(LlmError::Unknown))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text(String),
    Card(SummaryCard),
}

#[derive(Default)]
pub struct RecordingResponder {
    pub sent: Mutex<Vec<Sent>>,
}

impl RecordingResponder {
    pub fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| match s {
                Sent::Text(t) => Some(t.clone()),
                Sent::Card(_) => None,
            })
            .collect()
    }

    pub fn cards(&self) -> Vec<SummaryCard> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| match s {
                Sent::Card(c) => Some(c.clone()),
                Sent::Text(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl Responder for RecordingResponder {
    async fn say(&self, text: &str) -> Result<(), SendError> {
        self.sent.lock().unwrap().push(Sent::Text(text.to_string()));
        Ok(())
    }

    async fn send_card(&self, card: &SummaryCard) -> Result<(), SendError> {
        self.sent.lock().unwrap().push(Sent::Card(card.clone()));
        Ok(())
    }
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
