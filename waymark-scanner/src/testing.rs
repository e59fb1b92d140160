//! In-memory driver and classifier for exercising the engine without a
//! live session.

use crate::port::{
    Classification, ClassifierError, ClassifierPort, DriverError, DriverPort, Surface,
};
use crate::step::{ExplorationPath, InteractionStep, StepKind};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// A site modelled as pages joined by clickable locators.
pub struct FakeDriver {
    root: String,
    current: String,
    links: HashMap<(String, String), String>,
    fields: HashSet<(String, String)>,
    renamed: HashMap<String, String>,
    slow: HashMap<String, Duration>,
    lose_after: Option<usize>,
    lost: bool,
    resets: usize,
    executed: usize,
}

impl FakeDriver {
    pub fn new(root: &str) -> Self {
        Self {
            root: root.to_string(),
            current: root.to_string(),
            links: HashMap::new(),
            fields: HashSet::new(),
            renamed: HashMap::new(),
            slow: HashMap::new(),
            lose_after: None,
            lost: false,
            resets: 0,
            executed: 0,
        }
    }

    pub fn link(mut self, page: &str, locator: &str, target: &str) -> Self {
        self.links
            .insert((page.to_string(), locator.to_string()), target.to_string());
        self
    }

    pub fn field(mut self, page: &str, locator: &str) -> Self {
        self.fields.insert((page.to_string(), locator.to_string()));
        self
    }

    /// The element behind `old` is now only reachable as `new`.
    pub fn rename_locator(mut self, old: &str, new: &str) -> Self {
        self.renamed.insert(old.to_string(), new.to_string());
        self
    }

    pub fn slow(mut self, locator: &str, delay: Duration) -> Self {
        self.slow.insert(locator.to_string(), delay);
        self
    }

    /// Resets beyond the first `resets` fail with `SessionLost`, and so does
    /// every call after that.
    pub fn lose_session_after(mut self, resets: usize) -> Self {
        self.lose_after = Some(resets);
        self
    }

    pub fn resets(&self) -> usize {
        self.resets
    }

    pub fn executed(&self) -> usize {
        self.executed
    }

    fn surface(&self) -> Surface {
        Surface::new(self.current.clone(), format!("<html>{}</html>", self.current))
    }

    fn check_session(&self) -> Result<(), DriverError> {
        if self.lost {
            return Err(DriverError::SessionLost("browser closed".to_string()));
        }
        Ok(())
    }

    fn resolve_locator(&self, locator: &str) -> Option<String> {
        if self.renamed.contains_key(locator) {
            return None;
        }
        let original = self
            .renamed
            .iter()
            .find(|(_, new)| new.as_str() == locator)
            .map(|(old, _)| old.clone());
        Some(original.unwrap_or_else(|| locator.to_string()))
    }
}

#[async_trait]
impl DriverPort for FakeDriver {
    async fn reset_to_root(&mut self) -> Result<Surface, DriverError> {
        if self.lose_after.is_some_and(|limit| self.resets >= limit) {
            self.lost = true;
        }
        self.check_session()?;
        self.resets += 1;
        self.current = self.root.clone();
        Ok(self.surface())
    }

    async fn execute(&mut self, step: &InteractionStep) -> Result<Surface, DriverError> {
        self.check_session()?;
        self.executed += 1;
        if let Some(delay) = self.slow.get(&step.locator) {
            tokio::time::sleep(*delay).await;
        }

        let not_found = || DriverError::StepNotFound {
            locator: step.locator.clone(),
        };

        match step.kind {
            StepKind::NavigateRoot => self.current = self.root.clone(),
            StepKind::Wait => {}
            StepKind::Click => {
                let locator = self.resolve_locator(&step.locator).ok_or_else(not_found)?;
                let target = self
                    .links
                    .get(&(self.current.clone(), locator))
                    .cloned()
                    .ok_or_else(not_found)?;
                self.current = target;
            }
            StepKind::Fill | StepKind::Select => {
                let locator = self.resolve_locator(&step.locator).ok_or_else(not_found)?;
                if !self.fields.contains(&(self.current.clone(), locator)) {
                    return Err(not_found());
                }
            }
        }
        Ok(self.surface())
    }

    async fn capture_surface(&mut self) -> Result<Surface, DriverError> {
        self.check_session()?;
        Ok(self.surface())
    }
}

/// Classifies by address from a fixed table.
#[derive(Default)]
pub struct FakeClassifier {
    pages: HashMap<String, Classification>,
    failing: HashSet<String>,
    relocations: HashMap<String, String>,
    pub calls: Vec<(String, usize)>,
}

impl FakeClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, address: &str, classification: Classification) -> Self {
        self.pages.insert(address.to_string(), classification);
        self
    }

    pub fn fail_on(mut self, address: &str) -> Self {
        self.failing.insert(address.to_string());
        self
    }

    /// Resolve the step labelled `label` to `locator` during repair.
    pub fn relocate(mut self, label: &str, locator: &str) -> Self {
        self.relocations
            .insert(label.to_string(), locator.to_string());
        self
    }
}

#[async_trait]
impl ClassifierPort for FakeClassifier {
    async fn classify(
        &mut self,
        surface: &Surface,
        path: &ExplorationPath,
        _discovered_addresses: &HashSet<String>,
    ) -> Result<Classification, ClassifierError> {
        self.calls.push((surface.address.clone(), path.depth()));
        if self.failing.contains(&surface.address) {
            return Err(ClassifierError::Malformed("not json".to_string()));
        }
        Ok(self
            .pages
            .get(&surface.address)
            .cloned()
            .unwrap_or_default())
    }

    async fn resolve_step(
        &mut self,
        _surface: &Surface,
        failing: &InteractionStep,
    ) -> Result<Option<InteractionStep>, ClassifierError> {
        Ok(self
            .relocations
            .get(&failing.label)
            .map(|locator| failing.relocated(locator.clone())))
    }
}

pub fn click(locator: &str, label: &str) -> InteractionStep {
    InteractionStep::click(locator, label)
}
