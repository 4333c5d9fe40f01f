//! Delivery of the summary within the platform's size limits.
//!
//! The card (embed) is tried first, then a plain message with header and
//! footer, then a short apology. Every cut is logged with both lengths.

use crate::config::{EMBED_DESCRIPTION_CAP, PLAIN_MESSAGE_CAP};
use crate::diagnostics::Diagnostics;
use crate::discord_text::{char_len, take_chars, truncate_with_suffix};
use async_trait::async_trait;

pub const SUMMARY_TRUNCATION_MARKER: &str = "\n... (summary truncated)";
/// Kept free below each cap on top of the marker itself.
const TRUNCATION_SLACK: usize = 5;
const FOOTER_QUESTION_CHARS: usize = 200;
const SOURCE: &str = "ASK-CMD";

pub const APOLOGY: &str =
    "Sorry, the generated summary is too long to display, even after shortening it.";

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("message rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryCard {
    pub title: String,
    pub description: String,
    pub footer: String,
}

/// Where user-facing replies go.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn say(&self, text: &str) -> Result<(), SendError>;
    async fn send_card(&self, card: &SummaryCard) -> Result<(), SendError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Card,
    PlainText,
    Apology,
    Undelivered,
}

pub fn card_for(summary: &str, result_count: usize, question: &str) -> SummaryCard {
    let description = truncate_with_suffix(summary, EMBED_DESCRIPTION_CAP, SUMMARY_TRUNCATION_MARKER, TRUNCATION_SLACK)
        .unwrap_or_else(|| summary.to_string());
    let question = if char_len(question) > FOOTER_QUESTION_CHARS {
        format!("{}...", take_chars(question, FOOTER_QUESTION_CHARS))
    } else {
        question.to_string()
    };
    SummaryCard {
        title: format!("Summary of matching messages ({} messages)", result_count),
        description,
        footer: format!("Question: \"{}\"", question),
    }
}

pub fn fallback_header(result_count: usize) -> String {
    format!("**Summary ({} msgs):**\n", result_count)
}

pub const FALLBACK_FOOTER: &str = "\n*(The summary was too long for an embed; plain-text version above.)*";

pub fn fallback_text(summary: &str, result_count: usize) -> String {
    let header = fallback_header(result_count);
    let room = PLAIN_MESSAGE_CAP.saturating_sub(char_len(&header) + char_len(FALLBACK_FOOTER));
    let body = truncate_with_suffix(summary, room, SUMMARY_TRUNCATION_MARKER, TRUNCATION_SLACK)
        .unwrap_or_else(|| summary.to_string());
    format!("{}{}{}", header, body, FALLBACK_FOOTER)
}

pub struct Renderer<'a> {
    pub responder: &'a dyn Responder,
    pub diagnostics: &'a Diagnostics,
    pub requester_label: &'a str,
}

impl Renderer<'_> {
    pub async fn deliver(&self, summary: &str, result_count: usize, question: &str) -> Delivery {
        let original_len = char_len(summary);
        let card = card_for(summary, result_count, question);
        self.log_cut("card", original_len, char_len(&card.description), question);

        let card_error = match self.responder.send_card(&card).await {
            Ok(()) => return Delivery::Card,
            Err(e) => e,
        };
        self.diagnostics.warn(
            SOURCE,
            format!(
                "Summary card rejected ({}), retrying as plain text. Requested by {} for '{}'",
                card_error, self.requester_label, question
            ),
        );

        let text = fallback_text(summary, result_count);
        let header_footer = char_len(&fallback_header(result_count)) + char_len(FALLBACK_FOOTER);
        self.log_cut("plain message", original_len, char_len(&text) - header_footer, question);

        let plain_error = match self.responder.say(&text).await {
            Ok(()) => return Delivery::PlainText,
            Err(e) => e,
        };
        self.diagnostics.warn(
            SOURCE,
            format!(
                "Plain summary rejected ({}). Requested by {} for '{}'",
                plain_error, self.requester_label, question
            ),
        );

        match self.responder.say(APOLOGY).await {
            Ok(()) => Delivery::Apology,
            Err(e) => {
                self.diagnostics.error(SOURCE, format!("Could not deliver apology: {}", e));
                Delivery::Undelivered
            }
        }
    }

    fn log_cut(&self, target: &str, original: usize, kept: usize, question: &str) {
        if kept < original {
            self.diagnostics.info(
                SOURCE,
                format!(
                    "Summary truncated for {} (original: {}, truncated: {}). Requested by {} for '{}'",
                    target, original, kept, self.requester_label, question
                ),
            );
        }
    }
}
