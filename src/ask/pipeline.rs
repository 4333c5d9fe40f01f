use super::executor::{execute, ExecutionFailure, ResultSet};
use super::render::{Delivery, Renderer, Responder};
use super::summarize::{Summarizer, SummarySettings};
use super::synth::{QueryPlan, Synthesizer};
use crate::access::{AllowList, RESTRICTED_MESSAGE};
use crate::db::Archive;
use crate::diagnostics::Diagnostics;
use crate::llm::LanguageModel;
use crate::time_reference::TimeReference;
use chrono::{DateTime, Utc};
use std::sync::Arc;

const SOURCE: &str = "ASK-CMD";

pub const NOT_CONFIGURED_MESSAGE: &str = "Sorry, the AI module is not configured.";
pub const ARCHIVE_INACTIVE_MESSAGE: &str = "Sorry, the archive connection is not active.";
pub const NOT_UNDERSTOOD_MESSAGE: &str = "I couldn't interpret your question.";
pub const NO_QUERY_MESSAGE: &str = "I can't build a search for that. Try rephrasing your question.";
pub const UNEXPECTED_ANSWER_MESSAGE: &str = "The AI returned an unexpected answer. Try rephrasing your question.";
pub const NO_MATCHES_MESSAGE: &str = "No messages match your request.";
pub const SUMMARY_FAILED_MESSAGE: &str = "Sorry, I couldn't summarize these messages.";

#[derive(Debug, Clone)]
pub struct AskRequest {
    pub question: String,
    pub requester_id: u64,
    pub requester_name: String,
    /// Reference instant for relative dates in the question.
    pub received_at: DateTime<Utc>,
}

impl AskRequest {
    pub fn requester_label(&self) -> String {
        format!("{} (ID: {})", self.requester_name, self.requester_id)
    }
}

/// Terminal state of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AskOutcome {
    Restricted,
    NotConfigured,
    ArchiveInactive,
    NotUnderstood,
    NoQueryPossible,
    UnexpectedAnswer,
    NoMatches,
    Counted(u64),
    ExecutionFailed(ExecutionFailure),
    SummaryFailed,
    Summarized {
        found: usize,
        forwarded: usize,
        delivery: Delivery,
    },
}

pub struct AskPipeline {
    archive: Option<Arc<dyn Archive>>,
    llm: Option<Arc<dyn LanguageModel>>,
    allow_list: AllowList,
    settings: SummarySettings,
    diagnostics: Diagnostics,
}

impl AskPipeline {
    pub fn new(
        archive: Option<Arc<dyn Archive>>,
        llm: Option<Arc<dyn LanguageModel>>,
        allow_list: AllowList,
        settings: SummarySettings,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            archive,
            llm,
            allow_list,
            settings,
            diagnostics,
        }
    }

    pub async fn handle(&self, request: &AskRequest, responder: &dyn Responder) -> AskOutcome {
        let label = request.requester_label();
        let question = request.question.trim();
        self.diagnostics.info(
            "ASK-CMD-INIT",
            format!("ask received from {}. Question: '{}'", label, question),
        );

        if !self.allow_list.permits(request.requester_id) {
            self.diagnostics
                .info(SOURCE, format!("ask denied for {}. Question: '{}'", label, question));
            self.reply(responder, RESTRICTED_MESSAGE).await;
            return AskOutcome::Restricted;
        }

        self.reply(responder, &format!("Searching for: \"{}\" ... please wait.", question))
            .await;

        let Some(llm) = self.llm.as_deref() else {
            self.reply(responder, NOT_CONFIGURED_MESSAGE).await;
            self.diagnostics.alert(
                SOURCE,
                format!("ask by {} failed: language model not configured. Question: '{}'", label, question),
            );
            return AskOutcome::NotConfigured;
        };
        let Some(archive) = self.archive.as_deref() else {
            self.reply(responder, ARCHIVE_INACTIVE_MESSAGE).await;
            self.diagnostics.alert(
                SOURCE,
                format!("ask by {} failed: archive not available. Question: '{}'", label, question),
            );
            return AskOutcome::ArchiveInactive;
        };

        let reference = TimeReference::new(request.received_at, self.settings.display_timezone);
        let synthesizer = Synthesizer {
            llm,
            diagnostics: &self.diagnostics,
            community: &self.settings.community,
        };
        let sql = match synthesizer
            .synthesize(question, &request.requester_name, &label, &reference)
            .await
        {
            None => {
                self.reply(responder, NOT_UNDERSTOOD_MESSAGE).await;
                return AskOutcome::NotUnderstood;
            }
            Some(QueryPlan::NoQueryPossible) => {
                self.reply(responder, NO_QUERY_MESSAGE).await;
                return AskOutcome::NoQueryPossible;
            }
            Some(QueryPlan::Malformed(_)) => {
                self.reply(responder, UNEXPECTED_ANSWER_MESSAGE).await;
                return AskOutcome::UnexpectedAnswer;
            }
            Some(QueryPlan::Query(sql)) => sql,
        };
        self.diagnostics.info(
            "ASK-CMD-SQL-READY",
            format!("Query for '{}' by {} ready: {}", question, label, sql),
        );

        let rows = match execute(archive, &sql, &label, &self.diagnostics).await {
            Ok(ResultSet::Empty) => {
                self.reply(responder, NO_MATCHES_MESSAGE).await;
                self.diagnostics
                    .info(SOURCE, format!("No results for '{}'. Requested by {}", sql, label));
                return AskOutcome::NoMatches;
            }
            Ok(ResultSet::Scalar(count)) => {
                self.reply(
                    responder,
                    &format!("I found {} message(s) matching your request.", count),
                )
                .await;
                self.diagnostics.info(
                    SOURCE,
                    format!("Count result for '{}': {}. Requested by {}", sql, count, label),
                );
                return AskOutcome::Counted(count);
            }
            Ok(ResultSet::Rows(rows)) => rows,
            Err(failure) => {
                self.reply(responder, failure.user_message()).await;
                return AskOutcome::ExecutionFailed(failure);
            }
        };

        let found = rows.len();
        self.reply(
            responder,
            &format!("I found {} message(s). Generating summary...", found),
        )
        .await;

        let summarizer = Summarizer {
            llm,
            diagnostics: &self.diagnostics,
            settings: &self.settings,
        };
        let Some(summary) = summarizer.summarize(&rows, &label, question).await else {
            self.reply(responder, SUMMARY_FAILED_MESSAGE).await;
            return AskOutcome::SummaryFailed;
        };

        let renderer = Renderer {
            responder,
            diagnostics: &self.diagnostics,
            requester_label: &label,
        };
        let delivery = renderer.deliver(&summary, found, question).await;

        let forwarded = found.min(self.settings.max_messages);
        self.diagnostics.info(
            SOURCE,
            format!(
                "Summary done for {} messages, based on the first {}. Requested by {} for '{}'",
                found, forwarded, label, question
            ),
        );
        AskOutcome::Summarized {
            found,
            forwarded,
            delivery,
        }
    }

    async fn reply(&self, responder: &dyn Responder, text: &str) {
        if let Err(e) = responder.say(text).await {
            self.diagnostics.warn(SOURCE, format!("Could not send reply: {}", e));
        }
    }
}
