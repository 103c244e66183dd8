//! Token negotiation seam
//!
//! The exchange that actually presents a token to the server and learns its
//! expiry lives behind [`TokenNegotiator`]. The scheduler only needs the
//! resulting [`TokenExpiry`].

use crate::auth::expiry::{Clock, SystemClock, TokenExpiry};
use crate::auth::identity::{ConnectionIdentity, CLAIM_DEVICE_CONNECT};
use crate::error::{RefreshError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One token negotiation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationRequest {
    /// Audience the token is issued for
    pub audience: String,
    /// Resource the token grants access to
    pub resource: String,
    /// Claims the token must carry
    pub required_claims: Vec<String>,
}

impl NegotiationRequest {
    /// Request device-connect rights on the identity's endpoint
    pub fn device_connect(identity: &ConnectionIdentity) -> Self {
        Self {
            audience: identity.audience(),
            resource: identity.resource(),
            required_claims: vec![CLAIM_DEVICE_CONNECT.to_string()],
        }
    }
}

/// Performs a single claims-based-security token negotiation.
///
/// Implementations must support concurrent calls, honour `timeout` for their
/// own network exchange and abort promptly once `cancel` fires (returning
/// [`RefreshError::Cancelled`]). Failures reported by the peer are returned as
/// [`RefreshError::Protocol`].
#[async_trait]
pub trait TokenNegotiator: Send + Sync + std::fmt::Debug {
    async fn negotiate_token(
        &self,
        identity: &ConnectionIdentity,
        request: &NegotiationRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<TokenExpiry>;
}

/// Negotiator that grants every request a token with a fixed lifetime.
///
/// Stands in for a live service when exercising the scheduler locally.
#[derive(Debug, Clone)]
pub struct FixedLifetimeNegotiator {
    lifetime: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl FixedLifetimeNegotiator {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            lifetime: Some(lifetime),
            clock: Arc::new(SystemClock),
        }
    }

    /// Grants tokens that never expire
    pub fn never_expiring() -> Self {
        Self {
            lifetime: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl TokenNegotiator for FixedLifetimeNegotiator {
    async fn negotiate_token(
        &self,
        identity: &ConnectionIdentity,
        request: &NegotiationRequest,
        _timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<TokenExpiry> {
        if cancel.is_cancelled() {
            return Err(RefreshError::Cancelled);
        }
        if request.audience != identity.audience() {
            return Err(RefreshError::protocol(
                crate::error::ProtocolCondition::UnauthorizedAccess,
                format!("audience {} does not match identity", request.audience),
            ));
        }

        let expiry = match self.lifetime {
            Some(lifetime) => TokenExpiry::after(self.clock.now(), lifetime),
            None => TokenExpiry::Never,
        };
        debug!(audience = %request.audience, %expiry, "Granted token");
        Ok(expiry)
    }
}
