use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of interactions the driver knows how to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Click,
    Fill,
    Select,
    Wait,
    NavigateRoot,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Click => "click",
            StepKind::Fill => "fill",
            StepKind::Select => "select",
            StepKind::Wait => "wait",
            StepKind::NavigateRoot => "navigate_root",
        }
    }

    /// Whether executing this step may move the session to another address.
    pub fn navigates(&self) -> bool {
        matches!(self, StepKind::Click | StepKind::NavigateRoot)
    }
}

/// One replayable instruction for the driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InteractionStep {
    pub kind: StepKind,
    pub locator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub label: String,
}

impl InteractionStep {
    pub fn new(kind: StepKind, locator: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            kind,
            locator: locator.into(),
            value: None,
            label: label.into(),
        }
    }

    pub fn click(locator: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(StepKind::Click, locator, label)
    }

    pub fn fill(
        locator: impl Into<String>,
        value: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self::new(StepKind::Fill, locator, label).with_value(value)
    }

    pub fn select(
        locator: impl Into<String>,
        value: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self::new(StepKind::Select, locator, label).with_value(value)
    }

    /// Pause for `millis` milliseconds.
    pub fn wait(millis: u64) -> Self {
        Self::new(StepKind::Wait, "", format!("wait {}ms", millis)).with_value(millis.to_string())
    }

    pub fn navigate_root() -> Self {
        Self::new(StepKind::NavigateRoot, "", "home")
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Same intended effect, different locator. Used by step repair.
    pub fn relocated(&self, locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            ..self.clone()
        }
    }
}

impl fmt::Display for InteractionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} \"{}\"", self.kind.as_str(), self.label)
    }
}

/// An ordered, append-only sequence of steps starting from the root.
///
/// Paths are never mutated in place: extending or repairing a path always
/// produces a new value, so a path handed to the navigator stays replayable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExplorationPath {
    steps: Vec<InteractionStep>,
}

impl ExplorationPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_steps(steps: Vec<InteractionStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[InteractionStep] {
        &self.steps
    }

    pub fn depth(&self) -> usize {
        self.steps.len()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn last(&self) -> Option<&InteractionStep> {
        self.steps.last()
    }

    pub fn extend(&self, step: InteractionStep) -> Self {
        let mut steps = Vec::with_capacity(self.steps.len() + 1);
        steps.extend_from_slice(&self.steps);
        steps.push(step);
        Self { steps }
    }

    /// The trailing `len` steps (the whole path when `len >= self.len()`).
    pub fn suffix(&self, len: usize) -> Self {
        let start = self.steps.len().saturating_sub(len);
        Self {
            steps: self.steps[start..].to_vec(),
        }
    }

    /// The leading `len` steps.
    pub fn prefix(&self, len: usize) -> Self {
        let end = len.min(self.steps.len());
        Self {
            steps: self.steps[..end].to_vec(),
        }
    }

    pub fn with_step_replaced(&self, index: usize, step: InteractionStep) -> Self {
        let mut steps = self.steps.clone();
        if let Some(slot) = steps.get_mut(index) {
            *slot = step;
        }
        Self { steps }
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.label.as_str())
    }
}

impl fmt::Display for ExplorationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.steps.is_empty() {
            return write!(f, "<root>");
        }
        let labels: Vec<&str> = self.labels().collect();
        write!(f, "{}", labels.join(" > "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extend_leaves_original_untouched() {
        let root = ExplorationPath::root();
        let child = root.extend(InteractionStep::click("#admin", "Admin"));
        let grandchild = child.extend(InteractionStep::click("#add", "Add"));

        assert_eq!(root.depth(), 0);
        assert_eq!(child.depth(), 1);
        assert_eq!(grandchild.depth(), 2);
        assert_eq!(grandchild.len(), grandchild.steps().len());
    }

    #[test]
    fn test_suffix_and_prefix() {
        let path = ExplorationPath::from_steps(vec![
            InteractionStep::click("#a", "A"),
            InteractionStep::click("#b", "B"),
            InteractionStep::click("#c", "C"),
        ]);

        assert_eq!(path.suffix(1).labels().collect::<Vec<_>>(), vec!["C"]);
        assert_eq!(path.suffix(2).labels().collect::<Vec<_>>(), vec!["B", "C"]);
        assert_eq!(path.suffix(10), path);
        assert_eq!(path.prefix(1).labels().collect::<Vec<_>>(), vec!["A"]);
        assert_eq!(path.prefix(0), ExplorationPath::root());
    }

    #[test]
    fn test_with_step_replaced_keeps_label() {
        let path = ExplorationPath::from_steps(vec![
            InteractionStep::click("#old", "Users"),
            InteractionStep::click("#add", "Add"),
        ]);
        let fixed = path.with_step_replaced(0, path.steps()[0].relocated("#new"));

        assert_eq!(path.steps()[0].locator, "#old");
        assert_eq!(fixed.steps()[0].locator, "#new");
        assert_eq!(fixed.steps()[0].label, "Users");
    }

    #[test]
    fn test_display() {
        let path = ExplorationPath::root()
            .extend(InteractionStep::click("#admin", "Admin"))
            .extend(InteractionStep::click("#users", "Users"));
        assert_eq!(path.to_string(), "Admin > Users");
        assert_eq!(ExplorationPath::root().to_string(), "<root>");
        assert_eq!(
            InteractionStep::click("#x", "Add").to_string(),
            "click \"Add\""
        );
    }

    #[test]
    fn test_step_serializes_kind_snake_case() {
        let json = serde_json::to_string(&InteractionStep::navigate_root()).unwrap();
        assert!(json.contains("\"navigate_root\""));
        assert!(!json.contains("\"value\""));
    }
}
