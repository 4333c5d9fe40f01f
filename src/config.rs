use chrono_tz::Tz;
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::time::Duration;
use tracing::warn;

/// Maps a set of chat pseudonyms to the name the summaries should use.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct AliasEntry {
    pub pseudonyms: Vec<String>,
    pub name: String,
}

#[derive(Clone)]
pub struct Config {
    pub discord_token: String,
    pub database_url: String,
    pub target_channel_id: Option<u64>,
    pub log_channel_id: Option<u64>,
    pub allowed_user_ids: Vec<u64>,
    pub llm_url: String,
    pub llm_api_key: Option<String>,
    pub llm_model: Option<String>,
    pub llm_timeout_secs: u64,

    // Ingestion
    pub ingest_interval: Duration,
    pub ingest_lookback_days: i64,

    // Ask pipeline
    pub summary_max_messages: usize,
    pub display_timezone: Tz,
    pub answer_language: String,
    pub community_name: String,
    pub query_timeout_ms: u64,
    pub aliases: Vec<AliasEntry>,
}

const DEFAULT_TIMEZONE: Tz = chrono_tz::Europe::Paris;
const DEFAULT_LOOKBACK_DAYS: i64 = 14;
/// Upper bound on the empty-archive lookback, about ten years.
pub const MAX_LOOKBACK_DAYS: i64 = 3650;
const ALIASES_FILE: &str = "aliases.toml";

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        Ok(Config {
            discord_token: env::var("DISCORD_TOKEN")
                .map_err(|_| anyhow::anyhow!("DISCORD_TOKEN must be set"))?,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "data/chronicle.db".to_string()),
            target_channel_id: parse_channel_id("TARGET_CHANNEL_ID"),
            log_channel_id: parse_channel_id("LOG_CHANNEL_ID"),
            allowed_user_ids: env::var("ALLOWED_USER_IDS")
                .map(|raw| parse_allow_list(&raw))
                .unwrap_or_default(),
            llm_url: env::var("LLM_URL").unwrap_or_else(|_| "http://localhost:8080/v1".to_string()),
            llm_api_key: env::var("LLM_API_KEY").ok().filter(|k| !k.is_empty()),
            llm_model: env::var("LLM_MODEL").ok().filter(|m| !m.is_empty()),
            llm_timeout_secs: env::var("LLM_TIMEOUT_SECS")
                .unwrap_or_else(|_| "120".to_string())
                .parse()
                .unwrap_or(120),
            ingest_interval: env::var("INGEST_INTERVAL")
                .ok()
                .and_then(|raw| humantime::parse_duration(raw.trim()).ok())
                .filter(|d| !d.is_zero())
                .unwrap_or(Duration::from_secs(12 * 60 * 60)),
            ingest_lookback_days: parse_lookback_days(env::var("INGEST_LOOKBACK_DAYS").ok().as_deref())?,
            summary_max_messages: env::var("SUMMARY_MAX_MESSAGES")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .unwrap_or(100),
            display_timezone: env::var("DISPLAY_TIMEZONE")
                .ok()
                .map(|raw| parse_timezone(&raw))
                .unwrap_or(DEFAULT_TIMEZONE),
            answer_language: env::var("ANSWER_LANGUAGE").unwrap_or_else(|_| "English".to_string()),
            community_name: env::var("COMMUNITY_NAME")
                .unwrap_or_else(|_| "the community".to_string()),
            query_timeout_ms: env::var("QUERY_TIMEOUT_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .unwrap_or(5000),
            aliases: Self::load_aliases()?,
        })
    }

    /// Reads the alias table from `aliases.toml`, falling back to the `ALIASES`
    /// env variable (JSON array). Missing or unreadable sources yield an empty table.
    pub fn load_aliases() -> anyhow::Result<Vec<AliasEntry>> {
        if let Ok(content) = fs::read_to_string(ALIASES_FILE) {
            #[derive(Deserialize)]
            struct AliasWrapper {
                aliases: Vec<AliasEntry>,
            }
            match toml::from_str::<AliasWrapper>(&content) {
                Ok(wrapper) => return Ok(wrapper.aliases),
                Err(e) => warn!("Ignoring malformed {}: {}", ALIASES_FILE, e),
            }
        }

        if let Ok(env_aliases) = env::var("ALIASES") {
            if let Ok(aliases) = serde_json::from_str(&env_aliases) {
                return Ok(aliases);
            }
            warn!("Ignoring malformed ALIASES variable");
        }

        Ok(Vec::new())
    }
}

fn parse_channel_id(var: &str) -> Option<u64> {
    let raw = env::var(var).ok()?;
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse::<u64>() {
        Ok(id) if id > 0 => Some(id),
        _ => {
            warn!("{} is not a valid channel id: '{}'", var, raw);
            None
        }
    }
}

/// Unset or blank means the default; anything else must be a whole number of days in range.
fn parse_lookback_days(raw: Option<&str>) -> anyhow::Result<i64> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(DEFAULT_LOOKBACK_DAYS);
    };
    let days: i64 = raw
        .parse()
        .map_err(|_| anyhow::anyhow!("INGEST_LOOKBACK_DAYS is not a number: '{}'", raw))?;
    if !(1..=MAX_LOOKBACK_DAYS).contains(&days) {
        anyhow::bail!(
            "INGEST_LOOKBACK_DAYS must be between 1 and {}, got {}",
            MAX_LOOKBACK_DAYS,
            days
        );
    }
    Ok(days)
}

/// Parses a comma-separated list of user ids. Invalid entries are skipped.
pub fn parse_allow_list(raw: &str) -> Vec<u64> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse::<u64>() {
            Ok(id) => Some(id),
            Err(_) => {
                warn!("Ignoring invalid user id in ALLOWED_USER_IDS: '{}'", s);
                None
            }
        })
        .collect()
}

fn parse_timezone(raw: &str) -> Tz {
    raw.trim().parse::<Tz>().unwrap_or_else(|_| {
        warn!("Unknown DISPLAY_TIMEZONE '{}', using {}", raw, DEFAULT_TIMEZONE);
        DEFAULT_TIMEZONE
    })
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("discord_token", &"[REDACTED]")
            .field("database_url", &self.database_url)
            .field("target_channel_id", &self.target_channel_id)
            .field("log_channel_id", &self.log_channel_id)
            .field("allowed_user_ids", &self.allowed_user_ids)
            .field("llm_url", &self.llm_url)
            .field("llm_api_key", &self.llm_api_key.as_ref().map(|_| "[REDACTED]"))
            .field("llm_model", &self.llm_model)
            .field("llm_timeout_secs", &self.llm_timeout_secs)
            .field("ingest_interval", &humantime::format_duration(self.ingest_interval).to_string())
            .field("ingest_lookback_days", &self.ingest_lookback_days)
            .field("summary_max_messages", &self.summary_max_messages)
            .field("display_timezone", &self.display_timezone)
            .field("answer_language", &self.answer_language)
            .field("community_name", &self.community_name)
            .field("query_timeout_ms", &self.query_timeout_ms)
            .field("aliases", &self.aliases.len())
            .finish()
    }
}

/// Plain message content cap used for fallbacks and diagnostics mirroring.
pub const PLAIN_MESSAGE_CAP: usize = 1900;
/// Embed description cap used for summaries and log digests.
pub const EMBED_DESCRIPTION_CAP: usize = 4000;
