//! Seams between the engine and the outside world.
//!
//! The engine never touches a live session directly. Everything it learns
//! comes through a [`DriverPort`] (perform steps, observe the result) and a
//! [`ClassifierPort`] (decide what the observed surface is and what to try
//! next). Both are injected, so the whole engine runs against in-memory fakes
//! in tests.

use crate::step::{ExplorationPath, InteractionStep};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// What the environment shows after an action: where it is and what it
/// rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Surface {
    pub address: String,
    pub content: String,
}

impl Surface {
    pub fn new(address: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            content: content.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("timed out after {millis}ms: {operation}")]
    Timeout { operation: String, millis: u64 },

    #[error("element not found: {locator}")]
    StepNotFound { locator: String },

    #[error("action failed: {0}")]
    ActionFailed(String),

    #[error("session lost: {0}")]
    SessionLost(String),
}

impl DriverError {
    /// Only a lost session invalidates the whole run. Everything else is
    /// local to the path being replayed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DriverError::SessionLost(_))
    }
}

#[async_trait]
pub trait DriverPort: Send {
    /// Reload the root address. The environment has no partial rewind.
    async fn reset_to_root(&mut self) -> Result<Surface, DriverError>;

    async fn execute(&mut self, step: &InteractionStep) -> Result<Surface, DriverError>;

    async fn capture_surface(&mut self) -> Result<Surface, DriverError>;
}

/// The classifier's verdict on one surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub is_entity: bool,
    pub entity_name: Option<String>,
    pub relationship_field_names: Vec<String>,
    pub candidate_next_steps: Vec<InteractionStep>,
}

impl Classification {
    /// "Not an entity, nothing to try". Used whenever the classifier fails.
    pub fn nothing() -> Self {
        Self::default()
    }

    pub fn navigation(candidates: Vec<InteractionStep>) -> Self {
        Self {
            candidate_next_steps: candidates,
            ..Self::default()
        }
    }

    pub fn entity(name: impl Into<String>, relationship_field_names: Vec<String>) -> Self {
        Self {
            is_entity: true,
            entity_name: Some(name.into()),
            relationship_field_names,
            candidate_next_steps: Vec::new(),
        }
    }

    pub fn with_candidates(mut self, candidates: Vec<InteractionStep>) -> Self {
        self.candidate_next_steps = candidates;
        self
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifierError {
    #[error("malformed classifier response: {0}")]
    Malformed(String),

    #[error("classifier unavailable: {0}")]
    Unavailable(String),

    #[error("classifier timed out after {0}ms")]
    Timeout(u64),
}

#[async_trait]
pub trait ClassifierPort: Send {
    async fn classify(
        &mut self,
        surface: &Surface,
        path: &ExplorationPath,
        discovered_addresses: &HashSet<String>,
    ) -> Result<Classification, ClassifierError>;

    /// Find a step on `surface` with the same intended effect as `failing`
    /// (same label) but a different locator. `None` when no alternative
    /// exists.
    async fn resolve_step(
        &mut self,
        _surface: &Surface,
        _failing: &InteractionStep,
    ) -> Result<Option<InteractionStep>, ClassifierError> {
        Ok(None)
    }
}
