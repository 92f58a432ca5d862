//! Screenshot-driven desktop automation.
//!
//! Each cycle perceives the screen ([`eyes`]), asks a planning model for the
//! next small step ([`brain`]), turns that step into a click or a script
//! ([`dispatch`]), runs it ([`hands`]) and records the result in a short
//! history window ([`history`]). [`controller::LoopController`] owns the cycle.

pub mod archive;
pub mod brain;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod eyes;
pub mod grid;
pub mod hands;
pub mod history;
pub mod llm;
pub mod logging;
pub mod platform;
pub mod types;

mod deadline;

#[cfg(test)]
mod test_support;

pub use archive::TaskArchive;
pub use config::{AgentArgs, AgentConfig};
pub use controller::{CancelFlag, Capabilities, LoopConfig, LoopController, LoopOutcome, Oracles};
pub use error::LoopError;
pub use types::LoopEvent;
