//! Retry orchestration around a single engine.
//!
//! The [`Orchestrator`] drives one [`DownloadRequest`] against an [`Engine`] until it
//! succeeds, runs out of attempts, hits a failure the engine marks as hopeless, or is
//! cancelled. Between failed attempts it optionally rotates the request identity and
//! sleeps for a bounded backoff.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engines::{DownloadMetadata, DownloadRequest, Engine, EngineFailure};
use crate::progress::ProgressReporter;
use crate::CrystalError;

pub mod policy;

pub use policy::{Backoff, ErrorClass, IdentityPool, RetryPolicy, Vocabulary};

/// Bookkeeping for one request's attempt sequence
#[derive(Debug, Clone, PartialEq)]
pub struct RetryState {
    /// Attempts started so far
    pub attempt: u32,

    pub ceiling: u32,

    /// Backoff computed for the most recent failure
    pub current_backoff: Option<Duration>,

    pub last_class: Option<ErrorClass>,

    /// Diagnostic of the most recent failure
    pub last_message: Option<String>,
}

impl RetryState {
    fn new(ceiling: u32) -> Self {
        Self {
            attempt: 0,
            ceiling,
            current_backoff: None,
            last_class: None,
            last_message: None,
        }
    }

    pub fn exhausted(&self) -> bool {
        self.attempt >= self.ceiling
    }
}

/// Result of a single engine invocation
#[derive(Debug)]
pub enum AttemptOutcome {
    Success(DownloadMetadata),
    Failure {
        class: ErrorClass,
        message: String,
        launch_failed: bool,
    },
}

impl AttemptOutcome {
    pub fn from_result(result: Result<DownloadMetadata, EngineFailure>, vocabulary: &Vocabulary) -> Self {
        match result {
            Ok(metadata) => AttemptOutcome::Success(metadata),
            Err(failure) => AttemptOutcome::Failure {
                class: vocabulary.classify(&failure.message),
                message: failure.message,
                launch_failed: failure.launch_failed,
            },
        }
    }
}

/// Why an attempt sequence ended without success
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Every allowed attempt failed
    Exhausted,

    /// A failure that retrying cannot fix
    Abandoned,
}

/// Terminal result of [`Orchestrator::run`]
#[derive(Debug)]
pub enum Outcome {
    Completed {
        metadata: DownloadMetadata,
        state: RetryState,
    },
    Failed {
        reason: FailureReason,
        state: RetryState,
    },
}

impl Outcome {
    pub fn state(&self) -> &RetryState {
        match self {
            Outcome::Completed { state, .. } | Outcome::Failed { state, .. } => state,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Completed { .. })
    }
}

/// Hooks for surfacing retry activity to the user
pub trait RetryObserver: Send + Sync {
    fn on_attempt_started(&self, _state: &RetryState) {}

    fn on_attempt_failed(&self, _state: &RetryState, _class: ErrorClass, _message: &str) {}

    fn on_identity_rotated(&self, _identity: &str) {}

    fn on_backoff(&self, _state: &RetryState, _delay: Duration) {}
}

/// Observer that ignores everything
pub struct SilentObserver;

impl RetryObserver for SilentObserver {}

/// Drives attempts of a download request until a terminal outcome
pub struct Orchestrator {
    policy: RetryPolicy,
    identities: Option<IdentityPool>,
    cancel: CancellationToken,
    rng: StdRng,
}

impl Orchestrator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            identities: None,
            cancel: CancellationToken::new(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Use a deterministic random source for backoff and identity selection
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Rotate through `identities` on throttling; the starting identity is random
    pub fn with_identities(mut self, identities: Option<IdentityPool>) -> Self {
        self.identities = identities.map(|mut pool| {
            pool.randomize(&mut self.rng);
            pool
        });
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the request to completion.
    ///
    /// Engine failures never escape as errors; they end in [`Outcome::Failed`]. The only
    /// errors are cancellation and an unusable destination directory.
    pub async fn run(
        &mut self,
        engine: &dyn Engine,
        request: &DownloadRequest,
        reporter: &ProgressReporter,
        observer: &dyn RetryObserver,
    ) -> Result<Outcome, CrystalError> {
        fs_err::create_dir_all(&request.destination)
            .map_err(|e| CrystalError::FileError(e.to_string()))?;

        let mut state = RetryState::new(self.policy.max_attempts);
        info!(engine = engine.name(), url = %request.url, ceiling = state.ceiling, "starting acquisition");

        loop {
            if self.cancel.is_cancelled() {
                reporter.abandon("cancelled");
                return Err(CrystalError::Cancelled {
                    attempts: state.attempt,
                });
            }

            state.attempt += 1;
            reporter.begin_attempt(state.attempt, state.ceiling);
            observer.on_attempt_started(&state);

            let identity = self.identities.as_ref().map(|pool| pool.current().to_string());
            debug!(attempt = state.attempt, identity = ?identity, "invoking engine");

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    reporter.abandon("cancelled");
                    return Err(CrystalError::Cancelled { attempts: state.attempt });
                }
                result = engine.attempt(request, identity.as_deref(), reporter) => result,
            };

            let (class, message, launch_failed) =
                match AttemptOutcome::from_result(result, &self.policy.vocabulary) {
                    AttemptOutcome::Success(metadata) => {
                        reporter.finish();
                        info!(attempt = state.attempt, "acquisition complete");
                        return Ok(Outcome::Completed { metadata, state });
                    }
                    AttemptOutcome::Failure {
                        class,
                        message,
                        launch_failed,
                    } => (class, message, launch_failed),
                };

            warn!(attempt = state.attempt, ceiling = state.ceiling, %class, "attempt failed: {}", message);
            reporter.abandon(format!("failed ({})", class));
            state.last_class = Some(class);
            state.last_message = Some(message);
            observer.on_attempt_failed(&state, class, state.last_message.as_deref().unwrap_or_default());

            if launch_failed || (class == ErrorClass::Permanent && self.policy.abort_on_permanent) {
                return Ok(Outcome::Failed {
                    reason: FailureReason::Abandoned,
                    state,
                });
            }

            let delay = self.policy.backoff.delay(state.attempt, &mut self.rng);
            state.current_backoff = Some(delay);

            if state.exhausted() {
                return Ok(Outcome::Failed {
                    reason: FailureReason::Exhausted,
                    state,
                });
            }

            if class.is_transient() {
                if let Some(pool) = self.identities.as_mut() {
                    let identity = pool.rotate(&mut self.rng);
                    debug!(identity, "rotated request identity");
                    observer.on_identity_rotated(identity);
                }
            }

            observer.on_backoff(&state, delay);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(CrystalError::Cancelled { attempts: state.attempt });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
