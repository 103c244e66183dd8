//! CBS token refresh scheduler
//!
//! Keeps the security token of a long-lived authenticated connection valid:
//! - `initialize` performs one awaited negotiation and then starts a detached
//!   renewal loop that sleeps until shortly before expiry and renegotiates
//! - calling `initialize` again (for example after a reconnect) supersedes the
//!   running loop
//! - `stop` cancels the loop, `dispose` releases the scheduler's resources
//!
//! Only the swap of the active cancellation handle is serialized. Negotiations
//! themselves run concurrently.

use crate::auth::expiry::{next_refresh_delay, Clock, SystemClock, TokenExpiry};
use crate::auth::identity::ConnectionIdentity;
use crate::auth::negotiator::{NegotiationRequest, TokenNegotiator};
use crate::config::RefreshConfig;
use crate::error::{RefreshError, Result};
use arc_swap::ArcSwapOption;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Lifecycle notifications published by the scheduler and its renewal loops
#[derive(Debug, Clone)]
pub enum RefreshEvent {
    /// A renewal loop was spawned after a successful initialize
    LoopStarted { cycle_id: Uuid, expiry: TokenExpiry },
    /// A background renewal succeeded
    TokenRenewed {
        cycle_id: Uuid,
        expiry: TokenExpiry,
        next_refresh_in: Duration,
    },
    /// A background renewal failed and will be retried immediately
    TransientFailure {
        cycle_id: Uuid,
        category: &'static str,
        message: String,
    },
    /// A renewal loop ended
    LoopExited { cycle_id: Uuid, exit: LoopExit },
}

/// Why a renewal loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// The loop's cancellation handle fired (stop or supersession)
    Cancelled,
    /// The token never expires, so nothing is left to schedule
    NeverExpires,
    /// Unrecoverable negotiation failure
    Failed { category: &'static str, message: String },
}

/// Snapshot of scheduler counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshStats {
    /// Calls to `initialize` that got past the gate
    pub initializations: u64,
    /// Calls to `initialize` that returned an error
    pub initialize_failures: u64,
    /// Successful background renewals
    pub renewals: u64,
    /// Background renewals that failed and were retried
    pub transient_failures: u64,
    /// Renewal loops spawned
    pub loops_started: u64,
    /// Renewal loops that have ended, for any reason
    pub loops_exited: u64,
    /// Renewal loops that ended on an unrecoverable error
    pub fatal_exits: u64,
}

#[derive(Debug, Default)]
struct RefreshCounters {
    initializations: AtomicU64,
    initialize_failures: AtomicU64,
    renewals: AtomicU64,
    transient_failures: AtomicU64,
    loops_started: AtomicU64,
    loops_exited: AtomicU64,
    fatal_exits: AtomicU64,
}

impl RefreshCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RefreshStats {
        RefreshStats {
            initializations: self.initializations.load(Ordering::Relaxed),
            initialize_failures: self.initialize_failures.load(Ordering::Relaxed),
            renewals: self.renewals.load(Ordering::Relaxed),
            transient_failures: self.transient_failures.load(Ordering::Relaxed),
            loops_started: self.loops_started.load(Ordering::Relaxed),
            loops_exited: self.loops_exited.load(Ordering::Relaxed),
            fatal_exits: self.fatal_exits.load(Ordering::Relaxed),
        }
    }
}

/// Keeps one connection's CBS token renewed in the background
#[derive(Debug)]
pub struct RefreshScheduler {
    identity: ConnectionIdentity,
    negotiator: Arc<dyn TokenNegotiator>,
    clock: Arc<dyn Clock>,
    /// Serializes replacement of `active`
    gate: Semaphore,
    /// Cancellation handle of the current renewal loop
    active: ArcSwapOption<CancellationToken>,
    buffer_period: Duration,
    disposed: AtomicBool,
    events: broadcast::Sender<RefreshEvent>,
    counters: Arc<RefreshCounters>,
}

impl RefreshScheduler {
    /// Create a scheduler with the default refresh configuration
    pub fn new(identity: ConnectionIdentity, negotiator: Arc<dyn TokenNegotiator>) -> Self {
        Self::from_config(identity, negotiator, &RefreshConfig::default())
    }

    /// Create a scheduler from refresh configuration
    pub fn from_config(
        identity: ConnectionIdentity,
        negotiator: Arc<dyn TokenNegotiator>,
        config: &RefreshConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            identity,
            negotiator,
            clock: Arc::new(SystemClock),
            gate: Semaphore::new(1),
            active: ArcSwapOption::empty(),
            buffer_period: config.buffer_period(),
            disposed: AtomicBool::new(false),
            events,
            counters: Arc::new(RefreshCounters::default()),
        }
    }

    /// Replace the wall clock used for expiry arithmetic
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Override the buffer period
    pub fn with_buffer_period(mut self, buffer_period: Duration) -> Self {
        self.buffer_period = buffer_period;
        self
    }

    pub fn identity(&self) -> &ConnectionIdentity {
        &self.identity
    }

    pub fn buffer_period(&self) -> Duration {
        self.buffer_period
    }

    /// Negotiate a token within `timeout` and (re)start the renewal loop.
    ///
    /// Any previously running loop is cancelled once the new cancellation
    /// handle is installed. Returns after the first negotiation succeeds; the
    /// renewal loop keeps running detached.
    ///
    /// # Errors
    ///
    /// - [`RefreshError::Timeout`] if the gate or the negotiation does not
    ///   complete within `timeout`
    /// - [`RefreshError::CredentialRejected`] if the granted token has already
    ///   expired; no loop is started
    /// - [`RefreshError::Disposed`] after [`dispose`](Self::dispose)
    /// - any error returned by the negotiator
    pub async fn initialize(&self, timeout: Duration) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(RefreshError::Disposed);
        }

        let deadline = deadline_after(timeout);
        let cancel = Arc::new(CancellationToken::new());

        let previous = {
            let _permit = match tokio::time::timeout_at(deadline, self.gate.acquire()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(RefreshError::Disposed),
                Err(_) => {
                    RefreshCounters::bump(&self.counters.initialize_failures);
                    return Err(RefreshError::timeout(format!(
                        "refresh gate not acquired within {:?}",
                        timeout
                    )));
                }
            };
            // dispose may have run between the first check and the acquire.
            if self.disposed.load(Ordering::Acquire) {
                return Err(RefreshError::Disposed);
            }
            self.active.swap(Some(Arc::clone(&cancel)))
        };
        // The permit is released before the superseded loop is told to stop.
        if let Some(previous) = previous {
            previous.cancel();
        }
        RefreshCounters::bump(&self.counters.initializations);

        match self.negotiate_first(deadline, timeout).await {
            Ok(expiry) => {
                self.spawn_renewal_loop(expiry, (*cancel).clone());
                Ok(())
            }
            Err(e) => {
                RefreshCounters::bump(&self.counters.initialize_failures);
                // Nothing will ever run under this handle.
                cancel.cancel();
                warn!(
                    identity = %self.identity.label(),
                    category = e.category(),
                    "Initial token negotiation failed: {}", e
                );
                Err(e)
            }
        }
    }

    async fn negotiate_first(&self, deadline: Instant, timeout: Duration) -> Result<TokenExpiry> {
        let request = NegotiationRequest::device_connect(&self.identity);
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(RefreshError::timeout(format!(
                "no time left for token negotiation within {:?}",
                timeout
            )));
        }

        // The caller bounds the first negotiation by dropping the future or by
        // the deadline; supersession does not abort it.
        let expiry = negotiate_within(
            self.negotiator.as_ref(),
            &self.identity,
            &request,
            remaining,
            &CancellationToken::new(),
        )
        .await?;

        if expiry.has_expired(self.clock.now()) {
            return Err(RefreshError::credential_rejected(format!(
                "token for {} expired at {}; the identity may have been disabled",
                self.identity.label(),
                expiry
            )));
        }

        debug!(identity = %self.identity.label(), %expiry, "Initial token negotiated");
        Ok(expiry)
    }

    fn spawn_renewal_loop(&self, expiry: TokenExpiry, cancel: CancellationToken) {
        let renewal = RenewalLoop {
            cycle_id: Uuid::new_v4(),
            identity: self.identity.clone(),
            negotiator: Arc::clone(&self.negotiator),
            clock: Arc::clone(&self.clock),
            buffer_period: self.buffer_period,
            cancel,
            events: self.events.clone(),
            counters: Arc::clone(&self.counters),
        };

        RefreshCounters::bump(&self.counters.loops_started);
        let _ = self.events.send(RefreshEvent::LoopStarted {
            cycle_id: renewal.cycle_id,
            expiry,
        });
        info!(
            identity = %self.identity.label(),
            cycle_id = %renewal.cycle_id,
            %expiry,
            "Token refresh loop started"
        );

        tokio::spawn(renewal.run(expiry));
    }

    /// Cancel the active renewal loop, if any. Does not wait for it to exit.
    pub fn stop(&self) {
        if let Some(active) = self.active.load_full() {
            if !active.is_cancelled() {
                debug!(identity = %self.identity.label(), "Stopping token refresh loop");
            }
            active.cancel();
        }
    }

    /// Close the gate so no further loop can be installed.
    ///
    /// Safe to call repeatedly. A running loop is not cancelled here. Its
    /// handle stays installed, so a later [`stop`](Self::stop) or dropping the
    /// scheduler still ends it. After disposal `initialize` fails with
    /// [`RefreshError::Disposed`].
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.gate.close();
        if self.is_active() {
            warn!(
                identity = %self.identity.label(),
                "Refresh scheduler disposed while its renewal loop is still running"
            );
        }
        debug!(identity = %self.identity.label(), "Refresh scheduler disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// True when a current, not yet cancelled handle is installed
    pub fn is_active(&self) -> bool {
        self.active
            .load()
            .as_ref()
            .map(|active| !active.is_cancelled())
            .unwrap_or(false)
    }

    /// Subscribe to refresh events.
    ///
    /// Renewal loops report their exit only here and in the logs; nothing is
    /// returned to `initialize` callers.
    pub fn subscribe(&self) -> broadcast::Receiver<RefreshEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> RefreshStats {
        self.counters.snapshot()
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Roughly 30 years, the same horizon tokio uses for unbounded sleeps
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + timeout`, clamped so huge timeouts do not overflow `Instant`
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Negotiate with `budget` enforced here as well as by the negotiator
async fn negotiate_within(
    negotiator: &dyn TokenNegotiator,
    identity: &ConnectionIdentity,
    request: &NegotiationRequest,
    budget: Duration,
    cancel: &CancellationToken,
) -> Result<TokenExpiry> {
    match tokio::time::timeout(budget, negotiator.negotiate_token(identity, request, budget, cancel)).await {
        Ok(result) => result,
        Err(_) => Err(RefreshError::timeout(format!(
            "token negotiation exceeded {:?}",
            budget
        ))),
    }
}

/// State owned by one detached renewal loop
struct RenewalLoop {
    cycle_id: Uuid,
    identity: ConnectionIdentity,
    negotiator: Arc<dyn TokenNegotiator>,
    clock: Arc<dyn Clock>,
    buffer_period: Duration,
    cancel: CancellationToken,
    events: broadcast::Sender<RefreshEvent>,
    counters: Arc<RefreshCounters>,
}

impl RenewalLoop {
    async fn run(self, expiry: TokenExpiry) {
        let exit = match self.renew_until_done(expiry).await {
            Ok(exit) => exit,
            Err(e) => {
                RefreshCounters::bump(&self.counters.fatal_exits);
                error!(
                    identity = %self.identity.label(),
                    cycle_id = %self.cycle_id,
                    category = e.category(),
                    "Token refresh loop terminated: {}", e
                );
                LoopExit::Failed {
                    category: e.category(),
                    message: e.to_string(),
                }
            }
        };

        RefreshCounters::bump(&self.counters.loops_exited);
        debug!(
            identity = %self.identity.label(),
            cycle_id = %self.cycle_id,
            ?exit,
            "Token refresh loop exited"
        );
        let _ = self.events.send(RefreshEvent::LoopExited {
            cycle_id: self.cycle_id,
            exit,
        });
    }

    /// Waiting/Refreshing state machine. Returns the clean exit reason, or the
    /// error that ended the loop.
    async fn renew_until_done(&self, mut expiry: TokenExpiry) -> Result<LoopExit> {
        let request = NegotiationRequest::device_connect(&self.identity);
        let mut wait = expiry.remaining(self.clock.now()).unwrap_or(Duration::ZERO);

        loop {
            if expiry.is_never() {
                return Ok(LoopExit::NeverExpires);
            }
            if self.cancel.is_cancelled() {
                return Ok(LoopExit::Cancelled);
            }

            if !wait.is_zero() {
                debug!(cycle_id = %self.cycle_id, ?wait, "Waiting before token refresh");
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Ok(LoopExit::Cancelled),
                    _ = tokio::time::sleep(wait) => {}
                }
            }

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(LoopExit::Cancelled),
                result = negotiate_within(
                    self.negotiator.as_ref(),
                    &self.identity,
                    &request,
                    self.buffer_period,
                    &self.cancel,
                ) => result,
            };

            match result {
                Ok(renewed) => {
                    let now = self.clock.now();
                    if renewed.has_expired(now) {
                        return Err(RefreshError::credential_rejected(format!(
                            "renewed token for {} expired at {}",
                            self.identity.label(),
                            renewed
                        )));
                    }
                    expiry = renewed;
                    wait = next_refresh_delay(expiry, now, self.buffer_period);

                    RefreshCounters::bump(&self.counters.renewals);
                    info!(
                        identity = %self.identity.label(),
                        cycle_id = %self.cycle_id,
                        %expiry,
                        "Token refreshed, next refresh in {:?}", wait
                    );
                    let _ = self.events.send(RefreshEvent::TokenRenewed {
                        cycle_id: self.cycle_id,
                        expiry,
                        next_refresh_in: wait,
                    });
                }
                Err(_) if self.cancel.is_cancelled() => return Ok(LoopExit::Cancelled),
                Err(e) if e.is_transient() => {
                    RefreshCounters::bump(&self.counters.transient_failures);
                    warn!(
                        identity = %self.identity.label(),
                        cycle_id = %self.cycle_id,
                        category = e.category(),
                        "Token refresh failed, retrying: {}", e
                    );
                    let _ = self.events.send(RefreshEvent::TransientFailure {
                        cycle_id: self.cycle_id,
                        category: e.category(),
                        message: e.to_string(),
                    });
                    wait = Duration::ZERO;
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
