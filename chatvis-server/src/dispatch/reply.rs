//! Parsing of the raw text an agent's language model returns.
//!
//! The model is asked for `{"answer_id": <number|null>, "content": "<text>"}`. Models get
//! this wrong in creative ways, so `answer_id` is decided once, here, into an
//! [`AnswerTarget`]; nothing downstream sees the dynamically typed value.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

/// Which earlier message, if any, a reply answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnswerTarget {
    #[default]
    Absent,
    Message(i64),
}

impl AnswerTarget {
    #[must_use]
    pub const fn message_id(self) -> Option<i64> {
        match self {
            Self::Absent => None,
            Self::Message(id) => Some(id),
        }
    }
}

/// An `answer_id` that could not be used and was collapsed to [`AnswerTarget::Absent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerIdWarning {
    /// The offending value, rendered as JSON.
    pub raw: String,
    pub reason: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    pub content: String,
    pub answer: AnswerTarget,
    pub warning: Option<AnswerIdWarning>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReplyParseError {
    #[error("reply is not a JSON object: {0}")]
    NotJson(String),
    #[error("reply is missing a string 'content' field")]
    MissingContent,
    #[error("reply content is empty")]
    EmptyContent,
}

/// Parse `raw` into a reply.
///
/// With `json_required` unset (the agent was never told about the JSON contract), text
/// that is not a JSON object is taken verbatim as the content.
///
/// # Errors
/// Returns [`ReplyParseError`] when no usable content can be extracted.
pub fn parse_reply(raw: &str, json_required: bool) -> Result<ParsedReply, ReplyParseError> {
    let body = strip_code_fence(raw.trim());

    let object = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(object)) => object,
        Ok(_) | Err(_) if !json_required => return plain_reply(body),
        Ok(other) => return Err(ReplyParseError::NotJson(truncate(&other.to_string()))),
        Err(err) => return Err(ReplyParseError::NotJson(err.to_string())),
    };

    let content = match object.get("content") {
        Some(Value::String(content)) => content.trim().to_string(),
        _ => return Err(ReplyParseError::MissingContent),
    };
    if content.is_empty() {
        return Err(ReplyParseError::EmptyContent);
    }

    let (answer, warning) = answer_target(&object);
    if let Some(warning) = &warning {
        warn!(raw = %warning.raw, reason = warning.reason, "ignoring invalid answer_id in agent reply");
    }

    Ok(ParsedReply {
        content,
        answer,
        warning,
    })
}

fn plain_reply(body: &str) -> Result<ParsedReply, ReplyParseError> {
    if body.is_empty() {
        return Err(ReplyParseError::EmptyContent);
    }
    Ok(ParsedReply {
        content: body.to_string(),
        answer: AnswerTarget::Absent,
        warning: None,
    })
}

fn answer_target(object: &Map<String, Value>) -> (AnswerTarget, Option<AnswerIdWarning>) {
    let Some(value) = object.get("answer_id") else {
        return (AnswerTarget::Absent, None);
    };

    let invalid = |reason| {
        (
            AnswerTarget::Absent,
            Some(AnswerIdWarning {
                raw: value.to_string(),
                reason,
            }),
        )
    };

    match value {
        Value::Null => (AnswerTarget::Absent, None),
        Value::String(text) if text.trim().is_empty() => (AnswerTarget::Absent, None),
        Value::String(text) => match text.trim().parse::<i64>() {
            Ok(id) if id >= 0 => (AnswerTarget::Message(id), None),
            Ok(_) => invalid("negative id"),
            Err(_) => invalid("not a number"),
        },
        Value::Number(number) => {
            if let Some(id) = number.as_i64() {
                if id >= 0 {
                    (AnswerTarget::Message(id), None)
                } else {
                    invalid("negative id")
                }
            } else {
                match number.as_f64() {
                    Some(float) if float >= 0.0 && float.fract() == 0.0 && float <= MAX_EXACT_ID => {
                        #[allow(clippy::cast_possible_truncation)]
                        let id = float as i64;
                        (AnswerTarget::Message(id), None)
                    }
                    Some(float) if float < 0.0 => invalid("negative id"),
                    _ => invalid("not an integer"),
                }
            }
        }
        Value::Bool(_) | Value::Array(_) | Value::Object(_) => invalid("unexpected type"),
    }
}

/// Largest integral `f64` that still maps to a distinct id.
const MAX_EXACT_ID: f64 = 9_007_199_254_740_992.0;

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let Some(rest) = rest.strip_suffix("```") else {
        return text;
    };
    // The info string (e.g. `json`) may share a line with the object.
    let object = strip_info_tag(rest).trim_start();
    if object.starts_with('{') {
        return object.trim_end();
    }
    match rest.split_once('\n') {
        Some((_, body)) => body.trim(),
        None => rest.trim(),
    }
}

fn strip_info_tag(text: &str) -> &str {
    let end = text
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(text.len());
    &text[end..]
}

fn truncate(text: &str) -> String {
    const LIMIT: usize = 80;
    if text.chars().count() <= LIMIT {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(LIMIT).collect();
        out.push('…');
        out
    }
}
