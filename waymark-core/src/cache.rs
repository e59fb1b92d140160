use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use tracing::debug;
use waymark_scanner::port::{Classification, ClassifierError, ClassifierPort, Surface};
use waymark_scanner::step::{ExplorationPath, InteractionStep};

/// Memoizes a classifier by page content.
///
/// The key is a SHA-256 over the surface address, its content and the label
/// of the step that led there (the label feeds the entity name). Failures
/// are never cached.
pub struct CachedClassifier<C> {
    inner: C,
    cache: HashMap<String, Classification>,
    hits: usize,
    misses: usize,
}

impl<C> CachedClassifier<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            cache: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

pub fn surface_key(surface: &Surface, path: &ExplorationPath) -> String {
    let mut hasher = Sha256::new();
    hasher.update(surface.address.as_bytes());
    hasher.update([0u8]);
    hasher.update(surface.content.as_bytes());
    hasher.update([0u8]);
    if let Some(step) = path.last() {
        hasher.update(step.label.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[async_trait]
impl<C: ClassifierPort> ClassifierPort for CachedClassifier<C> {
    async fn classify(
        &mut self,
        surface: &Surface,
        path: &ExplorationPath,
        discovered_addresses: &HashSet<String>,
    ) -> Result<Classification, ClassifierError> {
        let key = surface_key(surface, path);
        if let Some(hit) = self.cache.get(&key) {
            debug!(address = %surface.address, "Classification cache hit");
            self.hits += 1;
            return Ok(hit.clone());
        }

        self.misses += 1;
        let classification = self
            .inner
            .classify(surface, path, discovered_addresses)
            .await?;
        self.cache.insert(key, classification.clone());
        Ok(classification)
    }

    async fn resolve_step(
        &mut self,
        surface: &Surface,
        failing: &InteractionStep,
    ) -> Result<Option<InteractionStep>, ClassifierError> {
        self.inner.resolve_step(surface, failing).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counting {
        calls: usize,
        fail: bool,
    }

    #[async_trait]
    impl ClassifierPort for Counting {
        async fn classify(
            &mut self,
            _surface: &Surface,
            _path: &ExplorationPath,
            _discovered: &HashSet<String>,
        ) -> Result<Classification, ClassifierError> {
            self.calls += 1;
            if self.fail {
                return Err(ClassifierError::Unavailable("down".to_string()));
            }
            Ok(Classification::entity("widget", vec![]))
        }
    }

    #[tokio::test]
    async fn test_same_surface_is_classified_once() {
        let mut cached = CachedClassifier::new(Counting::default());
        let surface = Surface::new("http://x.test/new", "<form></form>");
        let path = ExplorationPath::root();

        cached.classify(&surface, &path, &HashSet::new()).await.unwrap();
        let second = cached.classify(&surface, &path, &HashSet::new()).await.unwrap();

        assert!(second.is_entity);
        assert_eq!(cached.hits(), 1);
        assert_eq!(cached.misses(), 1);
        assert_eq!(cached.into_inner().calls, 1);
    }

    #[tokio::test]
    async fn test_changed_content_misses() {
        let mut cached = CachedClassifier::new(Counting::default());
        let path = ExplorationPath::root();

        cached
            .classify(&Surface::new("/a", "one"), &path, &HashSet::new())
            .await
            .unwrap();
        cached
            .classify(&Surface::new("/a", "two"), &path, &HashSet::new())
            .await
            .unwrap();

        assert_eq!(cached.misses(), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let mut cached = CachedClassifier::new(Counting {
            calls: 0,
            fail: true,
        });
        let surface = Surface::new("/a", "x");
        let path = ExplorationPath::root();

        assert!(cached.classify(&surface, &path, &HashSet::new()).await.is_err());
        assert!(cached.classify(&surface, &path, &HashSet::new()).await.is_err());
        assert_eq!(cached.into_inner().calls, 2);
    }

    #[test]
    fn test_key_depends_on_arriving_label() {
        let surface = Surface::new("/a", "x");
        let via_add = ExplorationPath::root().extend(InteractionStep::click("#a", "Add widget"));
        let via_new = ExplorationPath::root().extend(InteractionStep::click("#b", "New gadget"));

        assert_ne!(surface_key(&surface, &via_add), surface_key(&surface, &via_new));
        assert_eq!(surface_key(&surface, &via_add).len(), 64);
    }
}
