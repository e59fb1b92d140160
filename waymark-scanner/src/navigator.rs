use crate::port::{ClassifierPort, DriverError, DriverPort, Surface};
use crate::registry::normalize_address;
use crate::step::{ExplorationPath, InteractionStep, StepKind};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-call time limits. A limit that trips is a step failure, never a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    pub navigation: Duration,
    pub element_wait: Duration,
    pub classification: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            navigation: Duration::from_secs(15),
            element_wait: Duration::from_secs(5),
            classification: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplayResult {
    Success(Surface),
    /// `at` is the index of the failing step, `None` when the reset to root
    /// itself failed.
    Failed {
        at: Option<usize>,
        error: DriverError,
    },
}

impl ReplayResult {
    pub fn success(&self) -> bool {
        matches!(self, ReplayResult::Success(_))
    }

    pub fn final_surface(&self) -> Option<&Surface> {
        match self {
            ReplayResult::Success(surface) => Some(surface),
            ReplayResult::Failed { .. } => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ReplayResult::Failed { error, .. } if error.is_fatal())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RepairOutcome {
    /// The path (possibly with repaired steps) replays end to end.
    Replayed {
        path: ExplorationPath,
        surface: Surface,
        repairs: usize,
    },
    /// The path cannot be made to work within the repair budget.
    Broken {
        path: ExplorationPath,
        at: Option<usize>,
        error: DriverError,
    },
    /// The session died while replaying or repairing.
    Fatal(DriverError),
}

/// Drives a [`DriverPort`] through whole paths, always starting from root.
#[derive(Debug, Clone)]
pub struct Navigator {
    timeouts: Timeouts,
    settle_delay: Duration,
}

impl Navigator {
    pub fn new(timeouts: Timeouts, settle_delay: Duration) -> Self {
        Self {
            timeouts,
            settle_delay,
        }
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Reset to root, then execute every step in order. Stops at the first
    /// failing step; retrying is the caller's business.
    pub async fn replay<D>(&self, driver: &mut D, path: &ExplorationPath) -> ReplayResult
    where
        D: DriverPort + ?Sized,
    {
        let mut surface = match bounded(
            self.timeouts.navigation,
            "reset to root",
            driver.reset_to_root(),
        )
        .await
        {
            Ok(surface) => surface,
            Err(error) => {
                warn!("Reset to root failed: {}", error);
                return ReplayResult::Failed { at: None, error };
            }
        };
        self.settle().await;

        for (index, step) in path.steps().iter().enumerate() {
            let limit = self.timeout_for(step);
            match bounded(limit, step.to_string(), driver.execute(step)).await {
                Ok(next) => surface = next,
                Err(error) => {
                    debug!(step = index, %step, "Replay failed: {}", error);
                    return ReplayResult::Failed {
                        at: Some(index),
                        error,
                    };
                }
            }
            self.settle().await;
        }

        ReplayResult::Success(surface)
    }

    /// Shortest working suffix of `path`, or `path` itself.
    pub async fn shorten<D>(
        &self,
        driver: &mut D,
        path: &ExplorationPath,
    ) -> Result<ExplorationPath, DriverError>
    where
        D: DriverPort + ?Sized,
    {
        self.shorten_towards(driver, path, None).await
    }

    /// Try suffixes of `path` from shortest to longest and adopt the first
    /// one that replays end to end. When `target` is given the suffix must
    /// also land on the same normalized address.
    ///
    /// Only a lost session is an error; the original path is returned when
    /// no shorter suffix works.
    pub async fn shorten_towards<D>(
        &self,
        driver: &mut D,
        path: &ExplorationPath,
        target: Option<&str>,
    ) -> Result<ExplorationPath, DriverError>
    where
        D: DriverPort + ?Sized,
    {
        if path.len() <= 1 {
            return Ok(path.clone());
        }

        let target = target.map(normalize_address);
        for len in 1..path.len() {
            let candidate = path.suffix(len);
            match self.replay(driver, &candidate).await {
                ReplayResult::Success(surface) => {
                    let lands = target
                        .as_ref()
                        .is_none_or(|t| *t == normalize_address(&surface.address));
                    if lands {
                        info!(
                            from = path.len(),
                            to = candidate.len(),
                            "Shortened path to {}",
                            candidate
                        );
                        return Ok(candidate);
                    }
                    debug!(len, "Suffix replays but lands on {}", surface.address);
                }
                ReplayResult::Failed { error, .. } if error.is_fatal() => return Err(error),
                ReplayResult::Failed { .. } => {}
            }
        }

        Ok(path.clone())
    }

    /// Replay the prefix before `index`, then ask the classifier for a step
    /// with the same label but a different locator. Returns the repaired
    /// path, or `None` when no alternative was found.
    pub async fn repair_step<D, C>(
        &self,
        driver: &mut D,
        classifier: &mut C,
        path: &ExplorationPath,
        index: usize,
    ) -> Result<Option<ExplorationPath>, DriverError>
    where
        D: DriverPort + ?Sized,
        C: ClassifierPort + ?Sized,
    {
        let Some(failing) = path.steps().get(index) else {
            return Ok(None);
        };

        let surface = match self.replay(driver, &path.prefix(index)).await {
            ReplayResult::Success(surface) => surface,
            ReplayResult::Failed { error, .. } if error.is_fatal() => return Err(error),
            ReplayResult::Failed { .. } => return Ok(None),
        };

        let resolved = tokio::time::timeout(
            self.timeouts.classification,
            classifier.resolve_step(&surface, failing),
        )
        .await;

        match resolved {
            Ok(Ok(Some(step)))
                if step.label == failing.label && step.locator != failing.locator =>
            {
                info!(
                    step = index,
                    old = %failing.locator,
                    new = %step.locator,
                    "Repaired step \"{}\"",
                    failing.label
                );
                Ok(Some(path.with_step_replaced(index, step)))
            }
            Ok(Ok(_)) => {
                debug!(step = index, "No alternative for \"{}\"", failing.label);
                Ok(None)
            }
            Ok(Err(e)) => {
                warn!(step = index, "Locator resolution failed: {}", e);
                Ok(None)
            }
            Err(_) => {
                warn!(step = index, "Locator resolution timed out");
                Ok(None)
            }
        }
    }

    /// Replay `path`, repairing step-not-found failures up to `max_repairs`
    /// times. Each repair produces a new path; `path` is never modified.
    pub async fn replay_with_repair<D, C>(
        &self,
        driver: &mut D,
        classifier: &mut C,
        path: &ExplorationPath,
        max_repairs: usize,
    ) -> RepairOutcome
    where
        D: DriverPort + ?Sized,
        C: ClassifierPort + ?Sized,
    {
        let mut current = path.clone();
        let mut repairs = 0;

        loop {
            let (at, error) = match self.replay(driver, &current).await {
                ReplayResult::Success(surface) => {
                    return RepairOutcome::Replayed {
                        path: current,
                        surface,
                        repairs,
                    };
                }
                ReplayResult::Failed { error, .. } if error.is_fatal() => {
                    return RepairOutcome::Fatal(error);
                }
                ReplayResult::Failed { at, error } => (at, error),
            };

            let index = match (at, &error) {
                (Some(index), DriverError::StepNotFound { .. }) if repairs < max_repairs => index,
                _ => {
                    return RepairOutcome::Broken {
                        path: current,
                        at,
                        error,
                    };
                }
            };

            match self.repair_step(driver, classifier, &current, index).await {
                Ok(Some(repaired)) => {
                    repairs += 1;
                    current = repaired;
                }
                Ok(None) => {
                    return RepairOutcome::Broken {
                        path: current,
                        at,
                        error,
                    };
                }
                Err(fatal) => return RepairOutcome::Fatal(fatal),
            }
        }
    }

    fn timeout_for(&self, step: &InteractionStep) -> Duration {
        match step.kind {
            StepKind::Click | StepKind::NavigateRoot => self.timeouts.navigation,
            StepKind::Fill | StepKind::Select => self.timeouts.element_wait,
            StepKind::Wait => {
                let millis = step
                    .value
                    .as_deref()
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(0);
                self.timeouts.element_wait + Duration::from_millis(millis)
            }
        }
    }

    async fn settle(&self) {
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
    }
}

impl Default for Navigator {
    fn default() -> Self {
        Self::new(Timeouts::default(), Duration::from_millis(300))
    }
}

async fn bounded<T>(
    limit: Duration,
    operation: impl Into<String>,
    call: impl Future<Output = Result<T, DriverError>>,
) -> Result<T, DriverError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(DriverError::Timeout {
            operation: operation.into(),
            millis: limit.as_millis() as u64,
        }),
    }
}
