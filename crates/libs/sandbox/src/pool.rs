//! The pre-warmed sandbox pool.
//!
//! The interactive language pays its interpreter warmup once, ahead of
//! time: a background replenisher keeps `target` sandboxes Ready so that
//! acquisition is a queue pop. Sandboxes are strictly single-use — release
//! always destroys — and waiting acquirers are served in FIFO order when
//! the queue runs dry. Every other language bypasses the pool and gets a
//! fresh one-shot sandbox built on demand.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::oneshot;
use tokio::sync::Notify;
use tokio::time::{Instant, interval, sleep, timeout};
use tracing::{debug, info, warn};

use crucible_core::language::Language;

use crate::error::{Result, SandboxError};
use crate::manager::{Sandbox, SandboxManager};
use crate::repl::ReplExecutor;

/// Initial backoff after a failed sandbox launch.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Builds sandboxes for the pool. Implemented by [`SandboxManager`]; tests
/// drive the pool with stub factories.
#[async_trait]
pub trait SandboxFactory: Send + Sync + 'static {
    /// Build one Ready sandbox for `language`.
    async fn create(&self, language: Language) -> Result<Sandbox>;
}

#[async_trait]
impl SandboxFactory for SandboxManager {
    async fn create(&self, language: Language) -> Result<Sandbox> {
        Self::create(self, language).await
    }
}

/// Pool tuning knobs.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Target Ready population for the interactive language.
    pub target: usize,
    /// How long `acquire` waits for a Ready sandbox before
    /// [`SandboxError::PoolExhausted`].
    pub acquire_timeout: Duration,
    /// Maximum concurrent launchers.
    pub launch_parallelism: usize,
    /// Interval of the maintenance pass (TTL eviction, top-up).
    pub maintenance_interval: Duration,
    /// Ready sandboxes older than this are evicted and replaced.
    pub sandbox_ttl: Duration,
    /// Backoff ceiling for failed launches.
    pub max_backoff: Duration,
    /// Whether acquisition probes the interpreter before handing out.
    pub health_check: bool,
    /// Deadline for the acquisition liveness probe.
    pub health_check_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            target: 2,
            acquire_timeout: Duration::from_secs(10),
            launch_parallelism: 2,
            maintenance_interval: Duration::from_secs(30),
            sandbox_ttl: Duration::from_secs(15 * 60),
            max_backoff: Duration::from_secs(60),
            health_check: true,
            health_check_timeout: Duration::from_secs(2),
        }
    }
}

/// A point-in-time view of the pool, for the health surface.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    /// Sandboxes waiting to be acquired.
    pub ready: usize,
    /// Launches in flight.
    pub warming: usize,
    /// Configured population target.
    pub target: usize,
}

struct PoolState {
    ready: VecDeque<Sandbox>,
    warming: usize,
    waiters: VecDeque<oneshot::Sender<Sandbox>>,
    shutdown: bool,
}

struct Shared {
    factory: Arc<dyn SandboxFactory>,
    config: PoolConfig,
    state: Mutex<PoolState>,
    replenish: Notify,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().expect("pool lock poisoned")
    }
}

/// The process-wide sandbox pool.
#[derive(Clone)]
pub struct SandboxPool {
    shared: Arc<Shared>,
}

impl SandboxPool {
    /// Create a pool over `factory`. Call [`SandboxPool::start`] to launch
    /// the replenisher before acquiring.
    #[must_use]
    pub fn new(factory: Arc<dyn SandboxFactory>, config: PoolConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                factory,
                config,
                state: Mutex::new(PoolState {
                    ready: VecDeque::new(),
                    warming: 0,
                    waiters: VecDeque::new(),
                    shutdown: false,
                }),
                replenish: Notify::new(),
            }),
        }
    }

    /// Start the background replenisher and maintenance loop.
    pub fn start(&self) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let mut ticker = interval(shared.config.maintenance_interval);
            loop {
                tokio::select! {
                    () = shared.replenish.notified() => {}
                    _ = ticker.tick() => {
                        evict_expired(&shared).await;
                    }
                }
                if shared.lock().shutdown {
                    debug!("Pool replenisher stopping");
                    return;
                }
                spawn_launchers(&shared);
            }
        });
    }

    /// Trigger the initial fill and wait up to `wait` for the pool to
    /// reach its target. Returns the stats observed last.
    pub async fn warmup(&self, wait: Duration) -> PoolStats {
        self.shared.replenish.notify_one();
        let deadline = Instant::now() + wait;
        loop {
            let stats = self.stats();
            if stats.ready >= stats.target || Instant::now() >= deadline {
                return stats;
            }
            sleep(Duration::from_millis(50)).await;
        }
    }

    /// Acquire a sandbox for `language`.
    ///
    /// The interactive language pops a pre-warmed sandbox or waits FIFO
    /// for the next one; every other language gets a fresh one-shot
    /// sandbox immediately.
    ///
    /// # Errors
    ///
    /// [`SandboxError::PoolExhausted`] when no sandbox arrived within the
    /// acquire timeout, [`SandboxError::ShuttingDown`] during shutdown, or
    /// the factory's error for non-pooled languages.
    pub async fn acquire(&self, language: Language) -> Result<Sandbox> {
        if self.shared.lock().shutdown {
            return Err(SandboxError::ShuttingDown);
        }

        if !language.is_interactive() {
            let mut sandbox = self.shared.factory.create(language).await?;
            sandbox.mark_in_use();
            return Ok(sandbox);
        }

        let deadline = Instant::now() + self.shared.config.acquire_timeout;
        let mut probe_retried = false;

        loop {
            enum Next {
                Sandbox(Sandbox),
                Wait(oneshot::Receiver<Sandbox>),
            }

            // Pop-or-enqueue atomically, so a sandbox installed between the
            // two can never strand a waiter.
            let next = {
                let mut state = self.shared.lock();
                if state.shutdown {
                    return Err(SandboxError::ShuttingDown);
                }
                match state.ready.pop_front() {
                    Some(sandbox) => Next::Sandbox(sandbox),
                    None => {
                        let (tx, rx) = oneshot::channel();
                        state.waiters.push_back(tx);
                        Next::Wait(rx)
                    }
                }
            };
            self.shared.replenish.notify_one();

            let mut sandbox = match next {
                Next::Sandbox(sandbox) => sandbox,
                Next::Wait(rx) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match timeout(remaining, rx).await {
                        Ok(Ok(sandbox)) => sandbox,
                        Ok(Err(_)) => return Err(SandboxError::ShuttingDown),
                        Err(_) => {
                            debug!(%language, "Acquire timed out waiting for a sandbox");
                            return Err(SandboxError::PoolExhausted);
                        }
                    }
                }
            };

            // TTL eviction also applies at hand-out time.
            if sandbox.is_expired(self.shared.config.sandbox_ttl) {
                debug!(sandbox_id = %sandbox.id(), "Evicting expired sandbox at acquire");
                sandbox.destroy().await;
                continue;
            }

            if self.shared.config.health_check
                && !ReplExecutor::probe(&mut sandbox, self.shared.config.health_check_timeout).await
            {
                warn!(sandbox_id = %sandbox.id(), "Health probe failed, destroying sandbox");
                sandbox.destroy().await;
                self.shared.replenish.notify_one();
                if probe_retried {
                    return Err(SandboxError::Unhealthy(
                        "pooled sandbox failed its health probe twice".to_string(),
                    ));
                }
                probe_retried = true;
                continue;
            }

            sandbox.mark_in_use();
            return Ok(sandbox);
        }
    }

    /// Destroy a sandbox and schedule replenishment.
    ///
    /// Sandboxes are never returned to the queue: single-use isolation is
    /// an invariant, not an optimization.
    pub async fn release(&self, mut sandbox: Sandbox) {
        sandbox.destroy().await;
        self.shared.replenish.notify_one();
    }

    /// Stop replenishment and destroy every Ready sandbox. Waiting
    /// acquirers are woken with [`SandboxError::ShuttingDown`].
    pub async fn shutdown(&self) {
        let (sandboxes, waiters) = {
            let mut state = self.shared.lock();
            state.shutdown = true;
            (
                state.ready.drain(..).collect::<Vec<_>>(),
                state.waiters.drain(..).collect::<Vec<_>>(),
            )
        };
        // Dropping the senders wakes the waiters.
        drop(waiters);
        self.shared.replenish.notify_waiters();

        let count = sandboxes.len();
        join_all(sandboxes.into_iter().map(|mut sandbox| async move {
            sandbox.destroy().await;
        }))
        .await;
        info!(destroyed = count, "Sandbox pool shut down");
    }

    /// Current pool gauges.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.lock();
        PoolStats {
            ready: state.ready.len(),
            warming: state.warming,
            target: self.shared.config.target,
        }
    }
}

/// Launch up to the missing population, bounded by the configured
/// parallelism. At most one launcher runs per missing slot.
fn spawn_launchers(shared: &Arc<Shared>) {
    let mut state = shared.lock();
    if state.shutdown {
        return;
    }
    let population = state.ready.len() + state.warming;
    let missing = shared.config.target.saturating_sub(population);
    let slots = shared
        .config
        .launch_parallelism
        .saturating_sub(state.warming)
        .min(missing);

    for _ in 0..slots {
        state.warming += 1;
        let shared = Arc::clone(shared);
        tokio::spawn(async move {
            launch_one(&shared).await;
        });
    }
}

/// Build one sandbox, retrying with exponential backoff until it succeeds
/// or the pool shuts down.
async fn launch_one(shared: &Arc<Shared>) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        {
            let mut state = shared.lock();
            if state.shutdown {
                state.warming -= 1;
                return;
            }
        }

        match shared.factory.create(Language::Python).await {
            Ok(sandbox) => {
                install(shared, sandbox).await;
                // More slots may still be missing.
                shared.replenish.notify_one();
                return;
            }
            Err(e) => {
                warn!(error = %e, backoff_secs = backoff.as_secs(), "Sandbox launch failed, retrying");
                sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, shared.config.max_backoff);
            }
        }
    }
}

/// Hand a fresh sandbox to the first live waiter, or queue it as Ready.
async fn install(shared: &Arc<Shared>, sandbox: Sandbox) {
    let leftover = {
        let mut state = shared.lock();
        state.warming -= 1;
        if state.shutdown {
            Some(sandbox)
        } else {
            let mut sandbox = sandbox;
            loop {
                match state.waiters.pop_front() {
                    Some(waiter) => match waiter.send(sandbox) {
                        // Waiter already timed out; try the next one.
                        Err(returned) => sandbox = returned,
                        Ok(()) => break None,
                    },
                    None => {
                        state.ready.push_back(sandbox);
                        break None;
                    }
                }
            }
        }
    };

    if let Some(mut sandbox) = leftover {
        sandbox.destroy().await;
    }
}

/// Destroy Ready sandboxes past their TTL.
async fn evict_expired(shared: &Arc<Shared>) {
    let expired = {
        let mut state = shared.lock();
        let ttl = shared.config.sandbox_ttl;
        let mut expired = Vec::new();
        while let Some(front) = state.ready.front() {
            if front.is_expired(ttl) {
                if let Some(sandbox) = state.ready.pop_front() {
                    expired.push(sandbox);
                }
            } else {
                break;
            }
        }
        expired
    };

    join_all(expired.into_iter().map(|mut sandbox| async move {
        debug!(sandbox_id = %sandbox.id(), "Evicting expired sandbox");
        sandbox.destroy().await;
    }))
    .await;
}
