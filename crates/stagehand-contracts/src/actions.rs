use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One remote invocation: a request type plus optional payload.
///
/// An absent payload stays `None`; callers treat `None` and an empty
/// map the same way, but the distinction is preserved on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionCall {
    pub request_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_data: Option<Map<String, Value>>,
}

impl ActionCall {
    pub fn new(request_type: impl Into<String>) -> Self {
        Self {
            request_type: request_type.into(),
            request_data: None,
        }
    }

    pub fn with_data(request_type: impl Into<String>, request_data: Map<String, Value>) -> Self {
        Self {
            request_type: request_type.into(),
            request_data: Some(request_data),
        }
    }

    /// Compact human-readable form: the request type, followed by the
    /// payload when one is present.
    pub fn describe(&self) -> String {
        match &self.request_data {
            Some(data) => format!(
                "{} {}",
                self.request_type,
                serde_json::to_string(&Value::Object(data.clone())).unwrap_or_default()
            ),
            None => self.request_type.clone(),
        }
    }
}

/// Result of executing one [`ActionCall`]; `error: None` means success.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    pub call: ActionCall,
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn success(call: ActionCall) -> Self {
        Self { call, error: None }
    }

    pub fn failure(call: ActionCall, error: impl Into<String>) -> Self {
        Self {
            call,
            error: Some(error.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }

    /// Line fed back to the translator on retry: `<call>: <error>`.
    pub fn feedback_line(&self) -> String {
        match &self.error {
            Some(error) => format!("{}: {error}", self.call.describe()),
            None => self.call.describe(),
        }
    }
}

/// The translator produced something that is not an action batch.
/// Terminal for the whole operation; only execution failures retry.
#[derive(Debug)]
pub struct MalformedBatch {
    message: String,
}

impl MalformedBatch {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for MalformedBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed action batch: {}", self.message)
    }
}

impl std::error::Error for MalformedBatch {}

/// Parse a raw translator response into an ordered action batch.
///
/// Accepts an optional fenced-code-block wrapper (tagged or not)
/// around a JSON array of `{requestType, requestData?}` objects. An
/// empty array is a valid batch meaning "nothing to do".
pub fn parse_action_batch(raw: &str) -> Result<Vec<ActionCall>, MalformedBatch> {
    let body = strip_code_fence(raw);
    let parsed: Value = serde_json::from_str(body)
        .map_err(|err| MalformedBatch::new(format!("response is not valid JSON ({err})")))?;
    let Value::Array(items) = parsed else {
        return Err(MalformedBatch::new("top-level value is not an array"));
    };

    let mut calls = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let Value::Object(mut entry) = item else {
            return Err(MalformedBatch::new(format!(
                "element {index} is not an object"
            )));
        };
        let request_type = match entry.remove("requestType") {
            Some(Value::String(value)) if !value.trim().is_empty() => value,
            _ => {
                return Err(MalformedBatch::new(format!(
                    "element {index} lacks a requestType string"
                )))
            }
        };
        let request_data = match entry.remove("requestData") {
            Some(Value::Object(data)) => Some(data),
            Some(Value::Null) | None => None,
            Some(_) => {
                return Err(MalformedBatch::new(format!(
                    "element {index} has a non-object requestData"
                )))
            }
        };
        calls.push(ActionCall {
            request_type,
            request_data,
        });
    }
    Ok(calls)
}

/// Drop a single leading/trailing fenced-code-block wrapper, if any.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip an optional language tag on the opening fence line.
    let after_tag = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => return trimmed,
    };
    match after_tag.rfind("```") {
        Some(closing) => after_tag[..closing].trim(),
        None => after_tag.trim(),
    }
}
