use regex::Regex;
use serde_json::Value;

/// Closed classification of language-model failures. Built from provider
/// payloads by [`classify_error_body`]; optional fields are never assumed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LlmError {
    #[error("language model unreachable: {0}")]
    Connectivity(String),
    #[error("language model rate limit reached")]
    RateLimit,
    #[error("content policy refusal (category: {category}, severity: {severity})")]
    ContentPolicy { category: String, severity: String },
    #[error("input too large for the model context window")]
    ContextTooLarge,
    #[error("language model error: {detail}")]
    Generic { detail: String },
    #[error("unknown language model failure")]
    Unknown,
}

impl LlmError {
    pub fn is_content_policy(&self) -> bool {
        matches!(self, LlmError::ContentPolicy { .. })
    }
}

pub const UNSPECIFIED_CATEGORY: &str = "unspecified";
pub const UNKNOWN_SEVERITY: &str = "unknown";

const CONTENT_FILTER_CODES: [&str; 3] = ["content_filter", "ResponsibleAIPolicyViolation", "content_policy_violation"];
const RATE_LIMIT_CODES: [&str; 3] = ["rate_limit_exceeded", "429", "RateLimitReached"];
const CONTEXT_CODES: [&str; 2] = ["context_length_exceeded", "string_above_max_length"];

/// Classifies an error payload. Accepts the body with or without the
/// top-level `error` wrapper.
pub fn classify_error_body(body: &Value) -> LlmError {
    let error = body.get("error").unwrap_or(body);
    let code = field_text(error, "code");
    let kind = field_text(error, "type");
    let message = error.get("message").and_then(Value::as_str).unwrap_or_default();

    let is_code = |list: &[&str]| {
        code.as_deref().is_some_and(|c| list.contains(&c)) || kind.as_deref().is_some_and(|t| list.contains(&t))
    };

    let inner_result = error
        .get("innererror")
        .and_then(|inner| inner.get("content_filter_result"));
    let mentions_policy = message.contains("content management policy") || message.contains("content filter");

    if is_code(&CONTENT_FILTER_CODES) || inner_result.is_some() || mentions_policy {
        if let Some((category, severity)) = inner_result.and_then(filtered_category) {
            return LlmError::ContentPolicy { category, severity };
        }
        if let Some(causes) = extract_causes(message) {
            return LlmError::ContentPolicy {
                category: causes,
                severity: UNKNOWN_SEVERITY.to_string(),
            };
        }
        return LlmError::ContentPolicy {
            category: UNSPECIFIED_CATEGORY.to_string(),
            severity: UNKNOWN_SEVERITY.to_string(),
        };
    }

    if is_code(&RATE_LIMIT_CODES) || kind.as_deref() == Some("rate_limit_error") {
        return LlmError::RateLimit;
    }

    if is_code(&CONTEXT_CODES) || message.contains("maximum context length") {
        return LlmError::ContextTooLarge;
    }

    if !message.trim().is_empty() {
        return LlmError::Generic {
            detail: message.trim().to_string(),
        };
    }

    LlmError::Unknown
}

fn field_text(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First category flagged `filtered: true`, with its severity.
fn filtered_category(result: &Value) -> Option<(String, String)> {
    let categories = result.as_object()?;
    categories.iter().find_map(|(name, detail)| {
        if detail.get("filtered").and_then(Value::as_bool) != Some(true) {
            return None;
        }
        let severity = detail
            .get("severity")
            .and_then(Value::as_str)
            .unwrap_or(UNKNOWN_SEVERITY)
            .to_string();
        Some((name.clone(), severity))
    })
}

/// `... Causes: [hate, violence] ...` -> `hate, violence`
fn extract_causes(message: &str) -> Option<String> {
    let re = Regex::new(r"Causes:\s*\[([^\]]+)\]").ok()?;
    let causes = re.captures(message)?.get(1)?.as_str().trim();
    if causes.is_empty() {
        None
    } else {
        Some(causes.to_string())
    }
}
