//! Generate → validate → retry state machine
//!
//! `Drafting → Validating → {Accepted | Retrying | Rejected}` with a hard ceiling on
//! the number of capability calls. Every transition is recorded so retry counts and
//! reasons are observable.

use super::prompt::{amend_instructions, build_system_prompt};
use super::validation::{validate_output, Verdict, MALFORMED_CORRECTION};
use super::{GenerationCapability, GenerationRequest, PolicyQueryResult};
use crate::error::Nl2SqlError;
use crate::schema::{with_reference_table, SchemaDocument};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub const DEFAULT_MAX_ATTEMPTS: u8 = 3;
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GenerationState {
    Drafting,
    Validating,
    Retrying,
    Accepted,
    Rejected,
}

impl fmt::Display for GenerationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GenerationState::Drafting => "Drafting",
            GenerationState::Validating => "Validating",
            GenerationState::Retrying => "Retrying",
            GenerationState::Accepted => "Accepted",
            GenerationState::Rejected => "Rejected",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub attempt: u8,
    pub from: GenerationState,
    pub to: GenerationState,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub result: PolicyQueryResult,
    /// Capability invocations made
    pub attempts: u8,
    pub transitions: Vec<Transition>,
}

impl GenerationOutcome {
    pub fn retries(&self) -> u8 {
        self.attempts.saturating_sub(1)
    }

    pub fn final_state(&self) -> Option<GenerationState> {
        self.transitions.last().map(|t| t.to)
    }
}

#[derive(Default)]
struct Trace {
    state: Option<GenerationState>,
    transitions: Vec<Transition>,
}

impl Trace {
    fn current(&self) -> GenerationState {
        self.state.unwrap_or(GenerationState::Drafting)
    }

    fn move_to(&mut self, attempt: u8, to: GenerationState, reason: Option<String>) {
        let from = self.current();
        info!(
            "Generation attempt {}: {} -> {}{}",
            attempt,
            from,
            to,
            reason.as_deref().map(|r| format!(" ({})", r)).unwrap_or_default()
        );
        self.transitions.push(Transition {
            attempt,
            from,
            to,
            reason,
        });
        self.state = Some(to);
    }
}

/// Drives a [`GenerationCapability`] until it yields an acceptable query.
#[derive(Clone)]
pub struct QueryGenerator {
    capability: Arc<dyn GenerationCapability>,
    schema: SchemaDocument,
    max_attempts: u8,
    attempt_timeout: Duration,
}

impl QueryGenerator {
    pub fn new(capability: Arc<dyn GenerationCapability>, schema: SchemaDocument) -> Self {
        Self {
            capability,
            schema,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    /// Total capability calls allowed per request (at least one)
    pub fn with_max_attempts(mut self, max_attempts: u8) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn max_attempts(&self) -> u8 {
        self.max_attempts
    }

    /// Build the per-request input: widened focus tables and the filtered schema.
    pub fn prepare(&self, prompt: &str, extracted_tables: &[String]) -> GenerationRequest {
        let focus_tables = with_reference_table(extracted_tables);
        let schema = self.schema.filter(&focus_tables);
        if focus_tables.is_empty() {
            info!("Using full schema (no relevant tables specified)");
        } else {
            info!("Using filtered schema for tables: {:?}", focus_tables);
        }
        GenerationRequest {
            prompt: prompt.to_string(),
            focus_tables,
            schema,
        }
    }

    /// Generate a validated SELECT query for `prompt`.
    pub async fn generate(&self, prompt: &str, extracted_tables: &[String]) -> GenerationOutcome {
        info!("Running policy SQL generation with prompt: {}", prompt);

        if prompt.trim().is_empty() {
            return rejected_before_drafting(PolicyQueryResult::failure("Prompt cannot be empty.", ""));
        }
        if self.schema.is_empty() {
            error!("Policy schema is not available");
            return rejected_before_drafting(PolicyQueryResult::failure(
                "Could not load policy schema",
                "Check POLICY_SCHEMA_PATH points at the schema file",
            ));
        }

        let request = self.prepare(prompt, extracted_tables);
        let today = chrono::Local::now().date_naive();
        let base_instructions = build_system_prompt(&request, today);
        self.run(&request, &base_instructions).await
    }

    async fn invoke(&self, instructions: &str, prompt: &str) -> Result<PolicyQueryResult, Nl2SqlError> {
        match tokio::time::timeout(self.attempt_timeout, self.capability.generate(instructions, prompt)).await {
            Ok(result) => result,
            Err(_) => Err(Nl2SqlError::Timeout(self.attempt_timeout, "generation")),
        }
    }

    async fn run(&self, request: &GenerationRequest, base_instructions: &str) -> GenerationOutcome {
        let mut trace = Trace::default();
        let mut corrections: Vec<String> = Vec::new();

        for attempt in 1..=self.max_attempts {
            let instructions = amend_instructions(base_instructions, &corrections);

            let output = match self.invoke(&instructions, &request.prompt).await {
                Ok(output) => output,
                Err(Nl2SqlError::FormatViolation(reason)) => {
                    warn!("Malformed generation output: {}", reason);
                    trace.move_to(attempt, GenerationState::Retrying, Some(reason));
                    corrections.push(MALFORMED_CORRECTION.to_string());
                    continue;
                }
                Err(e) => {
                    error!("Generation capability {} failed: {}", self.capability.name(), e);
                    trace.move_to(attempt, GenerationState::Rejected, Some(e.to_string()));
                    return GenerationOutcome {
                        result: failure_from_error(&e),
                        attempts: attempt,
                        transitions: trace.transitions,
                    };
                }
            };

            trace.move_to(attempt, GenerationState::Validating, None);
            match validate_output(&request.prompt, output) {
                Verdict::Accept(result) => {
                    trace.move_to(attempt, GenerationState::Accepted, None);
                    return GenerationOutcome {
                        result,
                        attempts: attempt,
                        transitions: trace.transitions,
                    };
                }
                Verdict::Reject(result) => {
                    trace.move_to(attempt, GenerationState::Rejected, Some("generation refusal".to_string()));
                    return GenerationOutcome {
                        result,
                        attempts: attempt,
                        transitions: trace.transitions,
                    };
                }
                Verdict::Retry(correction) => {
                    trace.move_to(attempt, GenerationState::Retrying, Some(correction.clone()));
                    corrections.push(correction);
                }
            }
        }

        warn!("Max attempts ({}) exceeded without a valid query", self.max_attempts);
        trace.move_to(
            self.max_attempts,
            GenerationState::Rejected,
            Some("retry ceiling reached".to_string()),
        );
        GenerationOutcome {
            result: PolicyQueryResult::failure(
                format!(
                    "Could not produce a valid SELECT query after {} attempts",
                    self.max_attempts
                ),
                corrections.last().cloned().unwrap_or_default(),
            ),
            attempts: self.max_attempts,
            transitions: trace.transitions,
        }
    }
}

fn rejected_before_drafting(result: PolicyQueryResult) -> GenerationOutcome {
    let reason = match &result {
        PolicyQueryResult::Failure { error_message, .. } => Some(error_message.clone()),
        PolicyQueryResult::Success { .. } => None,
    };
    GenerationOutcome {
        result,
        attempts: 0,
        transitions: vec![Transition {
            attempt: 0,
            from: GenerationState::Drafting,
            to: GenerationState::Rejected,
            reason,
        }],
    }
}

fn failure_from_error(e: &Nl2SqlError) -> PolicyQueryResult {
    match e {
        Nl2SqlError::Configuration(msg) => {
            PolicyQueryResult::failure(msg.clone(), "Check the service configuration")
        }
        Nl2SqlError::Timeout(..) => {
            PolicyQueryResult::failure(e.to_string(), "Try again or simplify the question")
        }
        other => PolicyQueryResult::failure(other.to_string(), ""),
    }
}
