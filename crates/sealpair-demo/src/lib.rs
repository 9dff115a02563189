//! Two-party end-to-end encryption walk-through.
//!
//! Alice and Bob each get a [`sealpair_client::Session`]; the
//! [`Orchestrator`] runs them through registration, key lookup, a message
//! exchange and key backup maintenance, and returns a [`ScenarioReport`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod orchestrator;
mod report;

pub use orchestrator::{ALICE_MESSAGE, BOB_MESSAGE, Orchestrator, ScenarioConfig};
pub use report::{DecryptedMessage, ScenarioReport, StepOutcome, StepRecord};
