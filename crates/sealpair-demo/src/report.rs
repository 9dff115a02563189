//! Scenario report.

use std::fmt;

use sealpair_client::{Operation, SessionError};

/// Outcome of one scenario step.
#[derive(Debug)]
pub enum StepOutcome {
    /// The step completed; the string describes the result.
    Succeeded(String),
    /// The step failed.
    Failed(SessionError),
    /// The step did not run because an earlier step it depends on failed.
    Skipped(String),
}

/// One participant's step and its outcome.
#[derive(Debug)]
pub struct StepRecord {
    /// Identity performing the step.
    pub participant: String,
    /// Operation performed.
    pub step: Operation,
    /// What happened.
    pub outcome: StepOutcome,
}

impl fmt::Display for StepRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            StepOutcome::Succeeded(detail) => write!(f, "[{}] {}: {detail}", self.participant, self.step),
            StepOutcome::Failed(error) => write!(f, "[{}] {} failed: {error}", self.participant, self.step),
            StepOutcome::Skipped(reason) => {
                write!(f, "[{}] {} skipped: {reason}", self.participant, self.step)
            },
        }
    }
}

/// A message a participant decrypted and verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedMessage {
    /// Recipient that decrypted the message.
    pub recipient: String,
    /// Sender whose signature verified.
    pub sender: String,
    /// Plaintext.
    pub plaintext: String,
}

/// Everything that happened during a scenario run, in order.
#[derive(Debug, Default)]
pub struct ScenarioReport {
    steps: Vec<StepRecord>,
    messages: Vec<DecryptedMessage>,
}

impl ScenarioReport {
    /// Record the result of a step and log it, passing through the value.
    pub(crate) fn record<T>(
        &mut self,
        participant: &str,
        step: Operation,
        result: Result<T, SessionError>,
        describe: impl FnOnce(&T) -> String,
    ) -> Option<T> {
        let (outcome, value) = match result {
            Ok(value) => (StepOutcome::Succeeded(describe(&value)), Some(value)),
            Err(error) => (StepOutcome::Failed(error), None),
        };
        self.push(StepRecord { participant: participant.to_string(), step, outcome });
        value
    }

    /// Record a step that did not run.
    pub(crate) fn skip(&mut self, participant: &str, step: Operation, reason: impl Into<String>) {
        let outcome = StepOutcome::Skipped(reason.into());
        self.push(StepRecord { participant: participant.to_string(), step, outcome });
    }

    pub(crate) fn add_message(&mut self, message: DecryptedMessage) {
        self.messages.push(message);
    }

    fn push(&mut self, record: StepRecord) {
        match &record.outcome {
            StepOutcome::Succeeded(_) => tracing::info!("{record}"),
            StepOutcome::Failed(_) => tracing::error!("{record}"),
            StepOutcome::Skipped(_) => tracing::warn!("{record}"),
        }
        self.steps.push(record);
    }

    /// All steps in execution order.
    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    /// Messages decrypted and verified during the run.
    pub fn messages(&self) -> &[DecryptedMessage] {
        &self.messages
    }

    /// Number of failed steps.
    pub fn failures(&self) -> usize {
        self.steps.iter().filter(|s| matches!(s.outcome, StepOutcome::Failed(_))).count()
    }

    /// Number of skipped steps.
    pub fn skipped(&self) -> usize {
        self.steps.iter().filter(|s| matches!(s.outcome, StepOutcome::Skipped(_))).count()
    }

    /// Check whether every step succeeded.
    pub fn is_success(&self) -> bool {
        self.failures() == 0 && self.skipped() == 0
    }

    /// Outcome of `participant`'s first `step`.
    pub fn outcome(&self, participant: &str, step: Operation) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|s| s.participant == participant && s.step == step)
            .map(|s| &s.outcome)
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} steps, {} failed, {} skipped, {} messages verified",
            self.steps.len(),
            self.failures(),
            self.skipped(),
            self.messages.len()
        )
    }
}
