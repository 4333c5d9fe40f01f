pub mod access;
pub mod ask;
pub mod cache;
pub mod commands;
pub mod config;
pub mod db;
pub mod diagnostics;
pub mod discord_text;
pub mod ingest;
pub mod llm;
pub mod record;
pub mod time_reference;
pub mod transport;
pub mod watermark;

use std::sync::Arc;

/// Application context shared by all commands, built once at startup.
pub struct Data {
    pub diagnostics: diagnostics::Diagnostics,
    pub allow_list: access::AllowList,
    pub pipeline: ask::AskPipeline,
    pub ingestion: Arc<ingest::IngestionEngine>,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
