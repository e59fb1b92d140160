use crate::step::ExplorationPath;
use std::collections::HashSet;
use std::fmt;

/// Dedup key for an exploration state: the ordered display labels of the
/// steps that reach it.
///
/// Rendered surfaces are not stable across replays, so the label sequence
/// stands in for state identity. Two states reached through identical label
/// sequences are treated as one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathSignature(Vec<String>);

impl PathSignature {
    pub fn of(path: &ExplorationPath) -> Self {
        Self(path.labels().map(str::to_string).collect())
    }

    pub fn labels(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for PathSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(" > "))
    }
}

pub fn signature(path: &ExplorationPath) -> PathSignature {
    PathSignature::of(path)
}

/// Queued and visited signature sets owned by one exploration run.
#[derive(Debug, Default)]
pub struct StateTracker {
    queued: HashSet<PathSignature>,
    visited: HashSet<PathSignature>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the signature has been neither queued nor visited.
    pub fn is_new(&self, signature: &PathSignature) -> bool {
        !self.queued.contains(signature) && !self.visited.contains(signature)
    }

    pub fn mark_queued(&mut self, signature: PathSignature) {
        self.queued.insert(signature);
    }

    /// Returns false if the signature was already visited.
    pub fn mark_visited(&mut self, signature: PathSignature) -> bool {
        self.visited.insert(signature)
    }

    pub fn is_visited(&self, signature: &PathSignature) -> bool {
        self.visited.contains(signature)
    }

    pub fn queued_count(&self) -> usize {
        self.queued.len()
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::InteractionStep;

    fn path(labels: &[(&str, &str)]) -> ExplorationPath {
        ExplorationPath::from_steps(
            labels
                .iter()
                .map(|(locator, label)| InteractionStep::click(*locator, *label))
                .collect(),
        )
    }

    #[test]
    fn test_signature_ignores_locators() {
        let a = path(&[("#admin", "Admin"), ("#users", "Users")]);
        let b = path(&[("nav > a:nth-child(2)", "Admin"), ("a[href='/u']", "Users")]);
        assert_eq!(signature(&a), signature(&b));
    }

    #[test]
    fn test_signature_is_order_sensitive() {
        let a = path(&[("#a", "Admin"), ("#u", "Users")]);
        let b = path(&[("#u", "Users"), ("#a", "Admin")]);
        assert_ne!(signature(&a), signature(&b));
    }

    #[test]
    fn test_signature_does_not_merge_on_separator() {
        // "A > B" as a single label must not collide with the two labels A, B.
        let joined = path(&[("#x", "A > B")]);
        let split = path(&[("#a", "A"), ("#b", "B")]);
        assert_ne!(signature(&joined), signature(&split));
    }

    #[test]
    fn test_tracker_queued_then_visited() {
        let mut tracker = StateTracker::new();
        let sig = signature(&path(&[("#add", "Add")]));

        assert!(tracker.is_new(&sig));
        tracker.mark_queued(sig.clone());
        assert!(!tracker.is_new(&sig));
        assert!(!tracker.is_visited(&sig));

        assert!(tracker.mark_visited(sig.clone()));
        assert!(!tracker.mark_visited(sig.clone()));
        assert_eq!(tracker.queued_count(), 1);
        assert_eq!(tracker.visited_count(), 1);
    }
}
