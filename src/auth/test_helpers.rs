//! Test helpers for exercising the refresh scheduler
//!
//! [`ScriptedNegotiator`] replays a fixed list of responses and records every
//! call, sharing a [`TokioClock`] with the scheduler so that expiry arithmetic
//! follows tokio's paused clock:
//!
//! ```rust,ignore
//! let negotiator = ScriptedNegotiator::new(vec![ScriptedResponse::ExpiresIn(Duration::from_secs(60))]);
//! let scheduler = scheduler_with(&negotiator);
//! scheduler.initialize(Duration::from_secs(5)).await?;
//! ```

use crate::auth::expiry::{Clock, TokenExpiry, TokioClock};
use crate::auth::identity::ConnectionIdentity;
use crate::auth::negotiator::{NegotiationRequest, TokenNegotiator};
use crate::auth::scheduler::{LoopExit, RefreshEvent, RefreshScheduler};
use crate::error::{RefreshError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Upper bound on how long a helper waits for an event (paused time)
const EVENT_WAIT: Duration = Duration::from_secs(30 * 86_400);

/// Response returned by the next negotiation
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Grant a token valid for the given duration
    ExpiresIn(Duration),
    /// Grant a token that expired a second ago
    Expired,
    /// Grant a token that never expires
    Never,
    /// Fail with the given error
    Fail(RefreshError),
    /// Block until cancelled
    Hang,
    /// Wait `.0`, then grant a token valid for `.1`
    Delayed(Duration, Duration),
}

/// One recorded negotiation call
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub at: Instant,
    pub timeout: Duration,
    pub audience: String,
}

/// Negotiator that replays scripted responses. Once the script runs out every
/// call grants a one-hour token.
#[derive(Debug)]
pub struct ScriptedNegotiator {
    clock: Arc<dyn Clock>,
    script: Mutex<VecDeque<ScriptedResponse>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedNegotiator {
    pub fn new(script: Vec<ScriptedResponse>) -> Arc<Self> {
        Self::with_clock(script, Arc::new(TokioClock::new()))
    }

    pub fn with_clock(script: Vec<ScriptedResponse>, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            clock,
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl TokenNegotiator for ScriptedNegotiator {
    async fn negotiate_token(
        &self,
        _identity: &ConnectionIdentity,
        request: &NegotiationRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<TokenExpiry> {
        self.calls.lock().unwrap().push(RecordedCall {
            at: Instant::now(),
            timeout,
            audience: request.audience.clone(),
        });
        let response = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ScriptedResponse::ExpiresIn(Duration::from_secs(3600)));

        match response {
            ScriptedResponse::ExpiresIn(lifetime) => Ok(TokenExpiry::after(self.clock.now(), lifetime)),
            ScriptedResponse::Expired => Ok(TokenExpiry::At(self.clock.now() - chrono::Duration::seconds(1))),
            ScriptedResponse::Never => Ok(TokenExpiry::Never),
            ScriptedResponse::Fail(e) => Err(e),
            ScriptedResponse::Hang => {
                cancel.cancelled().await;
                Err(RefreshError::Cancelled)
            }
            ScriptedResponse::Delayed(delay, lifetime) => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(RefreshError::Cancelled),
                    _ = tokio::time::sleep(delay) => Ok(TokenExpiry::after(self.clock.now(), lifetime)),
                }
            }
        }
    }
}

/// Scheduler for a test device sharing the negotiator's clock, 120s buffer
pub fn scheduler_with(negotiator: &Arc<ScriptedNegotiator>) -> RefreshScheduler {
    RefreshScheduler::new(
        ConnectionIdentity::new("hub.example.net", "sensor-7"),
        negotiator.clone(),
    )
    .with_clock(negotiator.clock())
    .with_buffer_period(Duration::from_secs(120))
}

async fn next_event(events: &mut broadcast::Receiver<RefreshEvent>) -> RefreshEvent {
    loop {
        match tokio::time::timeout(EVENT_WAIT, events.recv()).await {
            Ok(Ok(event)) => return event,
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) => panic!("event channel closed"),
            Err(_) => panic!("no refresh event within {:?}", EVENT_WAIT),
        }
    }
}

/// Wait for the next loop exit
pub async fn next_exit(events: &mut broadcast::Receiver<RefreshEvent>) -> LoopExit {
    loop {
        if let RefreshEvent::LoopExited { exit, .. } = next_event(events).await {
            return exit;
        }
    }
}

/// Wait for the next successful renewal and return the scheduled delay
pub async fn next_renewal(events: &mut broadcast::Receiver<RefreshEvent>) -> Duration {
    loop {
        match next_event(events).await {
            RefreshEvent::TokenRenewed { next_refresh_in, .. } => return next_refresh_in,
            RefreshEvent::LoopExited { exit, .. } => panic!("loop exited before renewal: {exit:?}"),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_script_replays_in_order_then_falls_back() {
        let negotiator = ScriptedNegotiator::new(vec![ScriptedResponse::Never, ScriptedResponse::Expired]);
        let identity = ConnectionIdentity::new("hub.example.net", "sensor-7");
        let request = NegotiationRequest::device_connect(&identity);
        let cancel = CancellationToken::new();
        let now = negotiator.clock().now();

        let first = negotiator.negotiate_token(&identity, &request, Duration::from_secs(1), &cancel).await;
        let second = negotiator.negotiate_token(&identity, &request, Duration::from_secs(2), &cancel).await;
        let third = negotiator.negotiate_token(&identity, &request, Duration::from_secs(3), &cancel).await;

        assert_eq!(first.unwrap(), TokenExpiry::Never);
        assert!(second.unwrap().has_expired(now));
        assert_eq!(third.unwrap().remaining(now), Some(Duration::from_secs(3600)));
        let calls = negotiator.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].timeout, Duration::from_secs(2));
        assert_eq!(calls[0].audience, "hub.example.net/devices/sensor-7");
    }
}
