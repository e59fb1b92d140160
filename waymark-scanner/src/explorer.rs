use crate::hierarchy::{Hierarchy, build_hierarchy};
use crate::navigator::{Navigator, RepairOutcome, Timeouts};
use crate::port::{Classification, ClassifierPort, DriverError, DriverPort, Surface};
use crate::registry::{DiscoveredEntity, EntityId, EntityRegistry, NewEntity, normalize_address};
use crate::signature::{StateTracker, signature};
use crate::step::{ExplorationPath, InteractionStep};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Called with the number of states explored so far and the path about to
/// be replayed.
pub type ProgressCallback = Arc<dyn Fn(usize, &ExplorationPath) + Send + Sync>;

/// Called once per newly registered entity.
pub type EntityCallback = Arc<dyn Fn(&DiscoveredEntity) + Send + Sync>;

/// Shared stop switch, checked before each path is popped.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorerConfig {
    pub max_depth: usize,
    pub max_entities: usize,
    pub max_repairs: usize,
    pub timeouts: Timeouts,
    pub settle_delay: Duration,
    pub shorten_paths: bool,
    pub verify_paths: bool,
    pub expand_each_address_once: bool,
    pub target_names: Vec<String>,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            max_depth: 5,
            max_entities: 20,
            max_repairs: 3,
            timeouts: Timeouts::default(),
            settle_delay: Duration::from_millis(300),
            shorten_paths: true,
            verify_paths: false,
            expand_each_address_once: false,
            target_names: Vec::new(),
        }
    }
}

impl ExplorerConfig {
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_entities(mut self, entities: usize) -> Self {
        self.max_entities = entities;
        self
    }

    pub fn with_max_repairs(mut self, repairs: usize) -> Self {
        self.max_repairs = repairs;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_shorten_paths(mut self, shorten: bool) -> Self {
        self.shorten_paths = shorten;
        self
    }

    pub fn with_verify_paths(mut self, verify: bool) -> Self {
        self.verify_paths = verify;
        self
    }

    pub fn with_expand_each_address_once(mut self, once: bool) -> Self {
        self.expand_each_address_once = once;
        self
    }

    pub fn with_target_names(mut self, targets: Vec<String>) -> Self {
        self.target_names = targets;
        self
    }
}

/// `Idle -> Running -> {Exhausted, BoundReached, Aborted}`. The terminal
/// state is kept after `run` so callers can inspect it until `reset`
/// returns the explorer to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExplorerState {
    Idle,
    Running,
    Exhausted,
    BoundReached,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bound {
    MaxDepth,
    MaxEntities,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    Cancelled,
    SessionLost(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Exhausted,
    BoundReached(Bound),
    Aborted(AbortReason),
}

impl Termination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Termination::Exhausted => "exhausted",
            Termination::BoundReached(Bound::MaxDepth) => "max_depth_reached",
            Termination::BoundReached(Bound::MaxEntities) => "max_entities_reached",
            Termination::Aborted(AbortReason::Cancelled) => "cancelled",
            Termination::Aborted(AbortReason::SessionLost(_)) => "session_lost",
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Termination::Aborted(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub entities_found: usize,
    pub states_explored: usize,
    pub paths_enqueued: usize,
    pub duplicates_skipped: usize,
    pub depth_rejections: usize,
    pub replay_failures: usize,
    pub classifier_failures: usize,
    pub repairs: usize,
    pub paths_shortened: usize,
    pub stale_paths: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorationOutcome {
    pub entities: Vec<DiscoveredEntity>,
    pub hierarchy: Hierarchy,
    pub stats: RunStats,
    pub termination: Termination,
}

impl ExplorationOutcome {
    /// Results of a run that stopped before finishing on its own.
    pub fn is_partial(&self) -> bool {
        self.termination.is_aborted()
    }
}

/// Breadth-first scheduler over exploration paths.
///
/// Owns the driver, classifier, queue, signature sets and registry of one
/// run. Everything is sequential: the environment is a single session.
pub struct Explorer<D, C> {
    driver: D,
    classifier: C,
    navigator: Navigator,
    config: ExplorerConfig,
    known_addresses: Vec<String>,
    queue: VecDeque<ExplorationPath>,
    tracker: StateTracker,
    registry: EntityRegistry,
    expanded: HashSet<String>,
    state: ExplorerState,
    stats: RunStats,
    cancel: CancelFlag,
    progress_callback: Option<ProgressCallback>,
    entity_callback: Option<EntityCallback>,
}

impl<D, C> Explorer<D, C>
where
    D: DriverPort,
    C: ClassifierPort,
{
    pub fn new(driver: D, classifier: C, config: ExplorerConfig) -> Self {
        let navigator = Navigator::new(config.timeouts, config.settle_delay);
        Self {
            driver,
            classifier,
            navigator,
            config,
            known_addresses: Vec::new(),
            queue: VecDeque::new(),
            tracker: StateTracker::new(),
            registry: EntityRegistry::new(),
            expanded: HashSet::new(),
            state: ExplorerState::Idle,
            stats: RunStats::default(),
            cancel: CancelFlag::new(),
            progress_callback: None,
            entity_callback: None,
        }
    }

    /// Addresses registered by earlier runs. They are never registered again.
    pub fn with_known_addresses(mut self, addresses: Vec<String>) -> Self {
        self.known_addresses = addresses;
        self
    }

    pub fn with_cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = flag;
        self
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn with_entity_callback(mut self, callback: EntityCallback) -> Self {
        self.entity_callback = Some(callback);
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn state(&self) -> ExplorerState {
        self.state
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &StateTracker {
        &self.tracker
    }

    pub fn into_parts(self) -> (D, C) {
        (self.driver, self.classifier)
    }

    /// Explore from the root until the queue empties, a bound trips, the
    /// cancel flag is set or the session dies. Results gathered so far are
    /// always returned.
    pub async fn run(&mut self) -> ExplorationOutcome {
        info!(
            max_depth = self.config.max_depth,
            max_entities = self.config.max_entities,
            "Starting exploration"
        );
        self.begin();

        let mut termination = loop {
            if self.cancel.is_cancelled() {
                info!("Exploration cancelled");
                break Termination::Aborted(AbortReason::Cancelled);
            }
            if self.registry.len() >= self.config.max_entities {
                info!(entities = self.registry.len(), "Entity limit reached");
                break Termination::BoundReached(Bound::MaxEntities);
            }
            let Some(path) = self.queue.pop_front() else {
                break if self.stats.depth_rejections > 0 {
                    Termination::BoundReached(Bound::MaxDepth)
                } else {
                    Termination::Exhausted
                };
            };
            if let Err(fatal) = self.process(path).await {
                error!("Session unusable, stopping exploration: {}", fatal);
                break Termination::Aborted(AbortReason::SessionLost(fatal.to_string()));
            }
        };

        if self.config.verify_paths && !termination.is_aborted() {
            if let Err(fatal) = self.verify_canonical_paths().await {
                error!("Session lost while verifying paths: {}", fatal);
                termination = Termination::Aborted(AbortReason::SessionLost(fatal.to_string()));
            }
        }

        self.finish(termination)
    }

    /// Leave a finished run's terminal state and go back to `Idle`. Has no
    /// effect while running.
    pub fn reset(&mut self) {
        if self.state != ExplorerState::Running {
            self.state = ExplorerState::Idle;
        }
    }

    fn begin(&mut self) {
        self.state = ExplorerState::Running;
        self.queue.clear();
        self.tracker = StateTracker::new();
        self.registry = EntityRegistry::new().with_known_addresses(&self.known_addresses);
        self.expanded.clear();
        self.stats = RunStats::default();

        let root = ExplorationPath::root();
        self.tracker.mark_queued(signature(&root));
        self.queue.push_back(root);
        self.stats.paths_enqueued = 1;
    }

    fn finish(&mut self, termination: Termination) -> ExplorationOutcome {
        let hierarchy = build_hierarchy(&mut self.registry);
        self.stats.entities_found = self.registry.len();
        self.state = match termination {
            Termination::Exhausted => ExplorerState::Exhausted,
            Termination::BoundReached(_) => ExplorerState::BoundReached,
            Termination::Aborted(_) => ExplorerState::Aborted,
        };

        info!(
            entities = self.stats.entities_found,
            states = self.stats.states_explored,
            termination = termination.as_str(),
            "Exploration complete"
        );

        ExplorationOutcome {
            entities: self.registry.entities().to_vec(),
            hierarchy,
            stats: self.stats.clone(),
            termination,
        }
    }

    /// Replay one path, classify where it lands and enqueue its extensions.
    /// Only a lost session is returned as an error.
    async fn process(&mut self, path: ExplorationPath) -> Result<(), DriverError> {
        if !self.tracker.mark_visited(signature(&path)) {
            debug!("Already visited {}", path);
            self.stats.duplicates_skipped += 1;
            return Ok(());
        }

        self.stats.states_explored += 1;
        if let Some(callback) = &self.progress_callback {
            callback(self.stats.states_explored, &path);
        }
        debug!(depth = path.depth(), "Exploring {}", path);

        let outcome = self
            .navigator
            .replay_with_repair(
                &mut self.driver,
                &mut self.classifier,
                &path,
                self.config.max_repairs,
            )
            .await;

        let (path, surface) = match outcome {
            RepairOutcome::Replayed {
                path,
                surface,
                repairs,
            } => {
                self.stats.repairs += repairs;
                (path, surface)
            }
            RepairOutcome::Broken { at, error, .. } => {
                warn!(step = ?at, "Dropping {}: {}", path, error);
                self.stats.replay_failures += 1;
                return Ok(());
            }
            RepairOutcome::Fatal(error) => return Err(error),
        };

        let classification = self.classify(&surface, &path).await;

        if classification.is_entity {
            self.consider_entity(&path, &surface, &classification).await?;
        }

        if self.config.expand_each_address_once
            && !self.expanded.insert(normalize_address(&surface.address))
        {
            debug!(address = %surface.address, "Address already expanded");
            return Ok(());
        }

        self.enqueue_candidates(&path, classification.candidate_next_steps);
        Ok(())
    }

    async fn classify(&mut self, surface: &Surface, path: &ExplorationPath) -> Classification {
        let discovered = self.registry.addresses();
        let limit = self.config.timeouts.classification;

        let call = self.classifier.classify(surface, path, &discovered);
        match tokio::time::timeout(limit, call).await {
            Ok(Ok(classification)) => classification,
            Ok(Err(e)) => {
                warn!(address = %surface.address, "Classifier failed: {}", e);
                self.stats.classifier_failures += 1;
                Classification::nothing()
            }
            Err(_) => {
                warn!(address = %surface.address, "Classifier timed out");
                self.stats.classifier_failures += 1;
                Classification::nothing()
            }
        }
    }

    async fn consider_entity(
        &mut self,
        path: &ExplorationPath,
        surface: &Surface,
        classification: &Classification,
    ) -> Result<(), DriverError> {
        let name = classification
            .entity_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| fallback_name(path, &surface.address));

        if !self.matches_target(&name) {
            debug!(%name, "Entity does not match targets");
            return Ok(());
        }
        if self.registry.contains_address(&surface.address) {
            debug!(address = %surface.address, "Entity address already registered");
            return Ok(());
        }

        let shortened = if self.config.shorten_paths {
            self.navigator
                .shorten_towards(&mut self.driver, path, Some(&surface.address))
                .await
        } else {
            Ok(path.clone())
        };
        // A session lost while shortening still keeps the entity, on its
        // unshortened path.
        let (canonical, fatal) = match shortened {
            Ok(canonical) => (canonical, None),
            Err(error) => (path.clone(), Some(error)),
        };
        if canonical.len() < path.len() {
            self.stats.paths_shortened += 1;
        }

        let registration = self.registry.register(NewEntity {
            name,
            address: surface.address.clone(),
            path: canonical,
            relationship_field_names: classification.relationship_field_names.clone(),
            depth: path.depth(),
        });

        if let Some(entity) = registration.id.and_then(|id| self.registry.get(id)) {
            info!(
                name = %entity.name,
                depth = entity.depth,
                "Entity found at {} via {}",
                entity.address,
                entity.path
            );
            if let Some(callback) = &self.entity_callback {
                callback(entity);
            }
        }
        fatal.map_or(Ok(()), Err)
    }

    fn enqueue_candidates(&mut self, path: &ExplorationPath, candidates: Vec<InteractionStep>) {
        for step in candidates {
            let next = path.extend(step);
            if next.depth() > self.config.max_depth {
                self.stats.depth_rejections += 1;
                continue;
            }

            let sig = signature(&next);
            if !self.tracker.is_new(&sig) {
                debug!("Skipping duplicate {}", sig);
                self.stats.duplicates_skipped += 1;
                continue;
            }

            self.tracker.mark_queued(sig);
            self.queue.push_back(next);
            self.stats.paths_enqueued += 1;
        }
    }

    fn matches_target(&self, name: &str) -> bool {
        if self.config.target_names.is_empty() {
            return true;
        }
        let name = name.to_lowercase();
        self.config
            .target_names
            .iter()
            .any(|target| name.contains(&target.to_lowercase()))
    }

    /// Replay every canonical path, repairing where possible. Entities whose
    /// path no longer reaches their address are flagged stale.
    async fn verify_canonical_paths(&mut self) -> Result<(), DriverError> {
        for index in 0..self.registry.len() {
            let id = EntityId(index as u32);
            let Some(entity) = self.registry.get(id) else {
                continue;
            };
            let path = entity.path.clone();
            let expected = entity.normalized_address();

            let outcome = self
                .navigator
                .replay_with_repair(
                    &mut self.driver,
                    &mut self.classifier,
                    &path,
                    self.config.max_repairs,
                )
                .await;

            let (repaired, stale) = match outcome {
                RepairOutcome::Replayed {
                    path,
                    surface,
                    repairs,
                } => {
                    self.stats.repairs += repairs;
                    let lands = normalize_address(&surface.address) == expected;
                    if !lands {
                        warn!(
                            "Canonical path for {} now lands on {}",
                            expected, surface.address
                        );
                    }
                    ((repairs > 0 && lands).then_some(path), !lands)
                }
                RepairOutcome::Broken { at, error, .. } => {
                    warn!(step = ?at, "Canonical path for {} is broken: {}", expected, error);
                    (None, true)
                }
                RepairOutcome::Fatal(error) => return Err(error),
            };

            if stale {
                self.stats.stale_paths += 1;
            }
            if let Some(entity) = self.registry.get_mut(id) {
                entity.stale = stale;
                if let Some(path) = repaired {
                    entity.path = path;
                }
            }
        }
        Ok(())
    }
}

fn fallback_name(path: &ExplorationPath, address: &str) -> String {
    if let Some(step) = path.last() {
        return step.label.clone();
    }
    normalize_address(address)
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("root")
        .to_string()
}
