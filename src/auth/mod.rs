//! Authentication module for the CBS refresh scheduler
//!
//! This module keeps the claims-based-security token of a long-lived
//! connection renewed. The negotiation exchange itself is abstracted behind
//! [`TokenNegotiator`]; [`RefreshScheduler`] owns timing, supersession and
//! cancellation.

pub mod expiry;
pub mod identity;
pub mod negotiator;
pub mod scheduler;
pub mod session;

#[cfg(test)]
pub mod test_helpers;

pub use expiry::{next_refresh_delay, Clock, SystemClock, TokenExpiry, TokioClock};
pub use identity::{ConnectionIdentity, CLAIM_DEVICE_CONNECT};
pub use negotiator::{FixedLifetimeNegotiator, NegotiationRequest, TokenNegotiator};
pub use scheduler::{LoopExit, RefreshEvent, RefreshScheduler, RefreshStats};
pub use session::{
    MessageListener, MethodHandler, PropertyListener, RetryTrigger, SessionHandlers,
    SessionHolderProvider,
};
