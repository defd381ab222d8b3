use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};
use stagehand_contracts::actions::{parse_action_batch, ActionCall, ActionOutcome};
use stagehand_contracts::conversation::{opening_turn, retry_turn, Turn};
use stagehand_contracts::session_log::{LogPayload, SessionLog};

use crate::remote::RemoteCall;
use crate::snapshot;

/// Translation attempts per instruction, counting the first.
pub const MAX_ATTEMPTS: usize = 3;

const SYSTEM_INSTRUCTIONS: &str = "\
You translate an operator's instruction into remote calls for a live \
video production app that speaks the obs-websocket protocol. You are \
given the current state of the app and one instruction. Reply with a \
JSON array of calls, each an object with a \"requestType\" string and \
an optional \"requestData\" object, in the exact order they must run. \
Later calls may rely on objects created by earlier calls. Use only \
request types the protocol defines. If the instruction requires no \
changes, reply with an empty array. Reply with the JSON array only, \
no commentary.";

/// One-shot text completion against a conversation of role-tagged
/// turns under a fixed system instruction.
pub trait TextCompletion {
    fn complete(&mut self, system: &str, conversation: &[Turn]) -> Result<String>;
}

/// Chat-completions client for an OpenAI-compatible endpoint.
pub struct OpenAiCompleter {
    http: HttpClient,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiCompleter {
    pub fn new(api_base: &str, api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("failed to build translator http client")?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", api_base.trim_end_matches('/')),
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

impl TextCompletion for OpenAiCompleter {
    fn complete(&mut self, system: &str, conversation: &[Turn]) -> Result<String> {
        let mut messages = Vec::with_capacity(conversation.len() + 1);
        messages.push(json!({"role": "system", "content": system}));
        for turn in conversation {
            messages.push(json!({"role": turn.role.as_str(), "content": turn.content}));
        }
        let payload = json!({"model": self.model, "messages": messages});

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .with_context(|| format!("translator request failed ({})", self.endpoint))?;
        if !response.status().is_success() {
            let code = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            let brief: String = body.chars().take(512).collect();
            bail!("translator request failed ({code}): {brief}");
        }
        let payload: Value = response
            .json()
            .context("translator response body was not JSON")?;
        payload
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .context("translator response carries no content")
    }
}

/// Why a translated instruction could not be completed.
#[derive(Debug)]
pub enum TranslateError {
    /// The translator's reply was not an action batch. Terminal; a
    /// parse failure never drives a retry.
    MalformedOutput(String),
    /// Every attempt left failing calls behind.
    Exhausted { failures: Vec<ActionOutcome> },
}

impl std::fmt::Display for TranslateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranslateError::MalformedOutput(detail) => write!(f, "{detail}"),
            TranslateError::Exhausted { failures } => {
                write!(
                    f,
                    "gave up after {MAX_ATTEMPTS} attempts with {} failing call(s)",
                    failures.len()
                )
            }
        }
    }
}

impl std::error::Error for TranslateError {}

/// All calls issued by one attempt, in execution order.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptReport {
    pub attempt: usize,
    pub outcomes: Vec<ActionOutcome>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranslateSummary {
    pub attempts: Vec<AttemptReport>,
}

impl TranslateSummary {
    pub fn calls_succeeded(&self) -> usize {
        self.attempts
            .iter()
            .flat_map(|report| &report.outcomes)
            .filter(|outcome| !outcome.is_failure())
            .count()
    }
}

/// Translate a free-form instruction into remote calls and execute
/// them, retrying translation with the failure list fed back, up to
/// [`MAX_ATTEMPTS`].
///
/// The full conversation is retained and resent on every attempt; the
/// raw translator reply is appended as an assistant turn before
/// parsing so a later retry keeps conversational coherence even after
/// an unusable reply.
pub fn translate_and_execute(
    remote: &mut dyn RemoteCall,
    completer: &mut dyn TextCompletion,
    log: &SessionLog,
    instruction: &str,
) -> Result<TranslateSummary> {
    let mut conversation: Vec<Turn> = Vec::new();
    let mut attempts: Vec<AttemptReport> = Vec::new();
    let mut pending_failures: Vec<ActionOutcome> = Vec::new();

    for attempt in 1..=MAX_ATTEMPTS {
        let state = snapshot::describe_state(remote);
        conversation.push(if attempt == 1 {
            opening_turn(&state, instruction)
        } else {
            retry_turn(&pending_failures, &state)
        });

        let response = completer
            .complete(SYSTEM_INSTRUCTIONS, &conversation)
            .with_context(|| format!("translation attempt {attempt} failed"))?;
        conversation.push(Turn::assistant(response.clone()));

        let calls = match parse_action_batch(&response) {
            Ok(calls) => calls,
            Err(err) => {
                let _ = log.emit("translator_rejected", {
                    let mut payload = LogPayload::new();
                    payload.insert("attempt".to_string(), json!(attempt));
                    payload.insert("detail".to_string(), json!(err.to_string()));
                    payload
                });
                return Err(TranslateError::MalformedOutput(err.to_string()).into());
            }
        };

        if calls.is_empty() {
            let _ = log.emit("translator_idle", {
                let mut payload = LogPayload::new();
                payload.insert("attempt".to_string(), json!(attempt));
                payload
            });
            attempts.push(AttemptReport {
                attempt,
                outcomes: Vec::new(),
            });
            return Ok(TranslateSummary { attempts });
        }

        let outcomes = execute_batch(remote, log, attempt, calls);
        let failures: Vec<ActionOutcome> = outcomes
            .iter()
            .filter(|outcome| outcome.is_failure())
            .cloned()
            .collect();
        attempts.push(AttemptReport { attempt, outcomes });

        if failures.is_empty() {
            return Ok(TranslateSummary { attempts });
        }
        pending_failures = failures;
    }

    Err(TranslateError::Exhausted {
        failures: pending_failures,
    }
    .into())
}

/// Run every call in array order, once each, regardless of individual
/// failures. A failing call never short-circuits the rest of the
/// batch; later calls may not depend on it.
fn execute_batch(
    remote: &mut dyn RemoteCall,
    log: &SessionLog,
    attempt: usize,
    calls: Vec<ActionCall>,
) -> Vec<ActionOutcome> {
    let mut outcomes = Vec::with_capacity(calls.len());
    for call in calls {
        let result = remote.call(&call.request_type, call.request_data.clone());
        let outcome = match result {
            Ok(_) => ActionOutcome::success(call),
            Err(err) => ActionOutcome::failure(call, format!("{err:#}")),
        };

        let mut payload = LogPayload::new();
        payload.insert("attempt".to_string(), json!(attempt));
        payload.insert("call".to_string(), json!(outcome.call.describe()));
        if let Some(error) = &outcome.error {
            payload.insert("error".to_string(), json!(error));
        }
        let _ = log.emit(
            if outcome.is_failure() {
                "call_failed"
            } else {
                "call_executed"
            },
            payload,
        );
        outcomes.push(outcome);
    }
    outcomes
}
