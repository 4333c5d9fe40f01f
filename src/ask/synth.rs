//! Question -> single read-only SQL statement over the `messages` table.

use crate::diagnostics::{Diagnostics, TOKEN_USAGE_SOURCE};
use crate::llm::{CompletionRequest, LanguageModel, LlmError};
use crate::time_reference::TimeReference;

pub const NO_QUERY_SENTINEL: &str = "NO_QUERY_POSSIBLE";
const SOURCE: &str = "AI-QUERY-SQL-GEN";
const TEMPERATURE: f32 = 0.2;
const MAX_TOKENS: u32 = 350;

/// Columns every non-count query must return.
pub const MIN_PROJECTION: &str =
    "id, channel_id, guild_id, author_name, author_display_name, content, timestamp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryPlan {
    Query(String),
    NoQueryPossible,
    /// The model answered with something that is not a single SELECT.
    Malformed(String),
}

pub struct Synthesizer<'a> {
    pub llm: &'a dyn LanguageModel,
    pub diagnostics: &'a Diagnostics,
    pub community: &'a str,
}

impl Synthesizer<'_> {
    /// `None` when the model call itself failed; details go to diagnostics only.
    pub async fn synthesize(
        &self,
        question: &str,
        requester: &str,
        requester_label: &str,
        reference: &TimeReference,
    ) -> Option<QueryPlan> {
        let request = CompletionRequest {
            system: build_instruction(requester, reference, self.community),
            user: question.to_string(),
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let completion = match self.llm.complete(request).await {
            Ok(completion) => completion,
            Err(e) => {
                report_llm_failure(self.diagnostics, SOURCE, "SQL generation", &e, requester_label, question);
                return None;
            }
        };

        if let Some(usage) = completion.usage {
            self.diagnostics.info(
                TOKEN_USAGE_SOURCE,
                format!(
                    "SQL generation: prompt={}, completion={}, total={}. Requested by {} for '{}'",
                    usage.prompt_tokens, usage.completion_tokens, usage.total_tokens, requester_label, question
                ),
            );
        }

        let Some(raw) = completion.text else {
            self.diagnostics.alert(
                SOURCE,
                format!("Empty SQL generation answer for '{}'. Requested by {}", question, requester_label),
            );
            return None;
        };

        let plan = classify(&raw);
        match &plan {
            QueryPlan::NoQueryPossible => self.diagnostics.alert(
                SOURCE,
                format!("Model found no possible query for '{}'. Requested by {}", question, requester_label),
            ),
            QueryPlan::Malformed(text) => self.diagnostics.alert(
                SOURCE,
                format!(
                    "Model returned a non-SELECT answer '{}' for '{}'. Requested by {}",
                    text, question, requester_label
                ),
            ),
            QueryPlan::Query(sql) => {
                self.diagnostics
                    .info(SOURCE, format!("Generated query for '{}': {}", question, sql));
            }
        }
        Some(plan)
    }
}

/// Logs a failed model call. Content-policy refusals carry their category and severity.
pub fn report_llm_failure(
    diagnostics: &Diagnostics,
    source: &str,
    stage: &str,
    error: &LlmError,
    requester_label: &str,
    question: &str,
) {
    let text = match error {
        LlmError::ContentPolicy { category, severity } => format!(
            "{} blocked by content filter (category: {}, severity: {}). Requested by {} for '{}'",
            stage, category, severity, requester_label, question
        ),
        LlmError::ContextTooLarge => format!(
            "{} input exceeds the model context window. Requested by {} for '{}'",
            stage, requester_label, question
        ),
        other => format!("{} failed: {}. Requested by {} for '{}'", stage, other, requester_label, question),
    };
    if error.is_content_policy() {
        diagnostics.policy_alert(source, text);
    } else {
        diagnostics.alert(source, text);
    }
}

pub fn build_instruction(requester: &str, reference: &TimeReference, community: &str) -> String {
    format!(
        "You translate questions about the archived chat of {community} into one SQLite query.\n\
         The archive is a single table `messages` with these columns:\n\
         - id TEXT: unique message id\n\
         - channel_id TEXT\n\
         - guild_id TEXT (may be NULL)\n\
         - author_id TEXT\n\
         - author_name TEXT: account username, e.g. 'flyxowl'\n\
         - author_display_name TEXT: nickname shown in the community\n\
         - content TEXT: message text\n\
         - timestamp TEXT: ISO 8601 UTC, e.g. '2023-10-15T12:30:45.123Z'\n\
         - timestamp_epoch INTEGER: unix seconds\n\
         - attachment_count INTEGER\n\
         - reaction_count INTEGER\n\
         - edited_timestamp TEXT (may be NULL)\n\
         \n\
         {time_rules}\n\
         \n\
         Rules:\n\
         1. Output ONLY the query, on a single line. No explanation, no code fence, no trailing text.\n\
         2. Text searches on content use case-insensitive substring matching: content LIKE '%term%'.\n\
         3. Author filters match either name column: (author_name LIKE '%name%' OR author_display_name LIKE '%name%').\n\
         4. When the user refers to themselves (I, me, my, mine), use the name \"{requester}\".\n\
         5. Always select at least: {projection}.\n\
         6. If the question asks how many, answer exactly in the form SELECT COUNT(*) AS message_count FROM messages WHERE ...\n\
         7. Order by timestamp DESC by default. Use ASC when the question asks for the first or oldest messages.\n\
         8. When a number of results is requested (\"the last message\", \"the 5 messages\", \"top 10\"), end with LIMIT N.\n\
         9. Only read from the table. Never modify it.\n\
         10. If the question is too vague to be turned into a query, answer exactly {sentinel}.",
        community = community,
        time_rules = reference.describe(),
        requester = requester,
        projection = MIN_PROJECTION,
        sentinel = NO_QUERY_SENTINEL,
    )
}

/// Classifies a raw model answer. Every input maps to exactly one plan.
pub fn classify(raw: &str) -> QueryPlan {
    if raw.contains(NO_QUERY_SENTINEL) {
        return QueryPlan::NoQueryPossible;
    }
    let sql = normalize(raw);
    if sql.is_empty() || !sql.to_ascii_uppercase().starts_with("SELECT") {
        return QueryPlan::Malformed(sql);
    }
    if has_statement_separator(&sql) {
        return QueryPlan::Malformed(sql);
    }
    QueryPlan::Query(sql)
}

/// Strips a surrounding code fence and trailing `;`, and joins lines with a single space.
pub fn normalize(raw: &str) -> String {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        // Drop the info string (```sql) along with the fence.
        text = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
        text = text.trim_end().strip_suffix("```").unwrap_or(text);
    }
    let joined = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    joined.trim_end_matches(|c: char| c == ';' || c.is_whitespace()).to_string()
}

/// A `;` outside string literals means more than one statement.
fn has_statement_separator(sql: &str) -> bool {
    let mut in_string = false;
    for c in sql.chars() {
        match c {
            '\'' => in_string = !in_string,
            ';' if !in_string => return true,
            _ => {}
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    #[test]
    fn plain_select_is_a_query() {
        let plan = classify("SELECT id, content FROM messages ORDER BY timestamp DESC LIMIT 5");
        assert_eq!(
            plan,
            QueryPlan::Query("SELECT id, content FROM messages ORDER BY timestamp DESC LIMIT 5".to_string())
        );
    }

    #[test]
    fn fences_semicolons_and_lines_are_normalised() {
        let raw = "```sql\nSELECT COUNT(*) AS message_count\n  FROM messages\n WHERE content LIKE '%a;b%';\n```";
        assert_eq!(
            classify(raw),
            QueryPlan::Query(
                "SELECT COUNT(*) AS message_count FROM messages WHERE content LIKE '%a;b%'".to_string()
            )
        );
    }

    #[test]
    fn sentinel_wins_anywhere() {
        assert_eq!(classify("Sorry: NO_QUERY_POSSIBLE"), QueryPlan::NoQueryPossible);
    }

    #[test]
    fn everything_else_is_malformed() {
        assert!(matches!(classify("Here is your query"), QueryPlan::Malformed(_)));
        assert!(matches!(classify(""), QueryPlan::Malformed(_)));
        assert!(matches!(
            classify("SELECT id FROM messages; DELETE FROM messages"),
            QueryPlan::Malformed(_)
        ));
        assert!(matches!(classify("DELETE FROM messages"), QueryPlan::Malformed(_)));
    }

    #[test]
    fn instruction_embeds_requester_and_time_rules() {
        let now = DateTime::parse_from_rfc3339("2024-03-15T10:00:00Z").unwrap().with_timezone(&Utc);
        let reference = TimeReference::new(now, chrono_tz::Europe::Paris);
        let text = build_instruction("Fly", &reference, "the test server");
        assert!(text.contains("use the name \"Fly\""));
        assert!(text.contains("timestamp >= '2024-03-13T23:00:00.000Z' AND timestamp < '2024-03-14T23:00:00.000Z'"));
        assert!(text.contains(MIN_PROJECTION));
        assert!(text.contains(NO_QUERY_SENTINEL));
        assert!(text.contains("SELECT COUNT(*) AS message_count"));
    }
}
