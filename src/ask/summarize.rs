//! Row set -> natural-language summary through a second model call.

use super::synth::report_llm_failure;
use crate::config::{AliasEntry, Config};
use crate::diagnostics::{Diagnostics, TOKEN_USAGE_SOURCE};
use crate::llm::{CompletionRequest, LanguageModel};
use crate::record::PartialRecord;
use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;

const SOURCE: &str = "AI-SUMMARY";
const TEMPERATURE: f32 = 0.3;
const MAX_TOKENS: u32 = 1500;
const LINE_SEPARATOR: &str = "\n---\n";
const UNKNOWN_DATE: &str = "unknown date";

#[derive(Debug, Clone)]
pub struct SummarySettings {
    pub max_messages: usize,
    pub display_timezone: Tz,
    pub language: String,
    pub community: String,
    pub aliases: Vec<AliasEntry>,
}

impl From<&Config> for SummarySettings {
    fn from(config: &Config) -> Self {
        Self {
            max_messages: config.summary_max_messages,
            display_timezone: config.display_timezone,
            language: config.answer_language.clone(),
            community: config.community_name.clone(),
            aliases: config.aliases.clone(),
        }
    }
}

/// What actually goes to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryBatch {
    pub lines: String,
    pub forwarded: usize,
    pub deep_link: Option<String>,
}

pub fn prepare_batch(rows: &[PartialRecord], max_messages: usize, tz: Tz) -> SummaryBatch {
    let selected = &rows[..rows.len().min(max_messages)];
    let mut lines = String::new();
    for record in selected {
        lines.push_str(&format_line(record, tz));
        lines.push_str(LINE_SEPARATOR);
    }
    SummaryBatch {
        lines,
        forwarded: selected.len(),
        deep_link: selected.first().and_then(deep_link),
    }
}

/// `[speaker] (YYYY-MM-DD HH:MM): content` in the display time zone.
pub fn format_line(record: &PartialRecord, tz: Tz) -> String {
    let when = match record.timestamp.as_deref() {
        Some(raw) => parse_timestamp(raw)
            .map(|at| at.with_timezone(&tz).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| raw.to_string()),
        None => UNKNOWN_DATE.to_string(),
    };
    format!(
        "[{}] ({}): {}",
        record.speaker(),
        when,
        record.content.as_deref().unwrap_or_default()
    )
}

/// RFC 3339, or a naive ISO timestamp read as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Link to a message, only when guild, channel and message id are all known.
pub fn deep_link(record: &PartialRecord) -> Option<String> {
    let present = |v: &Option<String>| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
    let guild = present(&record.guild_id)?;
    let channel = present(&record.channel_id)?;
    let message = present(&record.id)?;
    Some(format!("https://discord.com/channels/{}/{}/{}", guild, channel, message))
}

/// Aliases with at least one pseudonym appearing in the batch (case-insensitive).
pub fn relevant_aliases<'a>(aliases: &'a [AliasEntry], rows: &[PartialRecord]) -> Vec<&'a AliasEntry> {
    let haystack = rows
        .iter()
        .flat_map(|r| [r.author_name.as_deref(), r.author_display_name.as_deref(), r.content.as_deref()])
        .flatten()
        .collect::<Vec<_>>()
        .join("\n")
        .to_lowercase();
    aliases
        .iter()
        .filter(|alias| {
            alias
                .pseudonyms
                .iter()
                .any(|p| !p.trim().is_empty() && haystack.contains(&p.trim().to_lowercase()))
        })
        .collect()
}

pub fn build_instruction(settings: &SummarySettings, forwarded: usize, aliases: &[&AliasEntry]) -> String {
    let mut text = format!(
        "You summarize conversations from the chat of {community}.\n\
         You will receive about {count} messages, each formatted as [Author] (YYYY-MM-DD HH:MM): content, separated by lines containing ---.\n\
         Write a concise, coherent summary of the discussion based ONLY on the messages provided below.\n\
         Do not mention any participant or topic that is not explicitly present in these messages, and ignore any prior knowledge about the members.\n\
         Highlight the main topics, key points, and important information shared in these messages without quoting them verbatim.\n\
         Write the summary in {language} as flowing prose. Keep it short (a few sentences, around 300 words) unless there are many messages.\n\
         Do not include links or message ids; they are added separately.",
        community = settings.community,
        count = forwarded,
        language = settings.language,
    );
    if !aliases.is_empty() {
        text.push_str(
            "\nKnown pseudonyms and the names to use for them (only for people whose messages are present):\n",
        );
        for alias in aliases {
            text.push_str(&format!("- {}: {}\n", alias.pseudonyms.join("/"), alias.name));
        }
    }
    text
}

pub struct Summarizer<'a> {
    pub llm: &'a dyn LanguageModel,
    pub diagnostics: &'a Diagnostics,
    pub settings: &'a SummarySettings,
}

impl Summarizer<'_> {
    /// Summary text with the deep link appended, or `None` on failure.
    pub async fn summarize(&self, rows: &[PartialRecord], requester_label: &str, question: &str) -> Option<String> {
        let batch = prepare_batch(rows, self.settings.max_messages, self.settings.display_timezone);
        if batch.forwarded == 0 {
            return Some("No messages to summarize.".to_string());
        }
        let aliases = relevant_aliases(&self.settings.aliases, &rows[..batch.forwarded]);

        let request = CompletionRequest {
            system: build_instruction(self.settings, batch.forwarded, &aliases),
            user: format!(
                "Here are the messages to summarize:\n\n{}\nSummary of the discussion:",
                batch.lines
            ),
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let completion = match self.llm.complete(request).await {
            Ok(completion) => completion,
            Err(e) => {
                report_llm_failure(self.diagnostics, SOURCE, "Summary", &e, requester_label, question);
                return None;
            }
        };

        if let Some(usage) = completion.usage {
            self.diagnostics.info(
                TOKEN_USAGE_SOURCE,
                format!(
                    "Summary: prompt={}, completion={}, total={} for {} messages. Requested by {}",
                    usage.prompt_tokens, usage.completion_tokens, usage.total_tokens, batch.forwarded, requester_label
                ),
            );
        }

        let Some(summary) = completion.text else {
            self.diagnostics.alert(
                SOURCE,
                format!("Empty summary answer for '{}'. Requested by {}", question, requester_label),
            );
            return None;
        };

        let summary = summary.trim().to_string();
        Some(match batch.deep_link {
            Some(link) => format!("{}\n\n[Jump to the first message]({})", summary, link),
            None => summary,
        })
    }
}
