//! Session holder interface
//!
//! Sibling collaborator of the refresh scheduler: it owns transport sessions
//! opened over the same authenticated connection. The scheduler never calls
//! into it.

use crate::auth::identity::ConnectionIdentity;
use crate::error::{RefreshError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Invoked when the transport needs the owner to reconnect
pub type RetryTrigger = Arc<dyn Fn(&RefreshError) + Send + Sync>;
/// Handles an inbound direct method: `(method_name, payload)`
pub type MethodHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;
/// Receives desired property patches
pub type PropertyListener = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;
/// Receives cloud-to-device messages
pub type MessageListener = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Callbacks wired into a new session holder
#[derive(Clone, Default)]
pub struct SessionHandlers {
    pub retry_trigger: Option<RetryTrigger>,
    pub method_handler: Option<MethodHandler>,
    pub property_listener: Option<PropertyListener>,
    pub message_listener: Option<MessageListener>,
}

impl std::fmt::Debug for SessionHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandlers")
            .field("retry_trigger", &self.retry_trigger.is_some())
            .field("method_handler", &self.method_handler.is_some())
            .field("property_listener", &self.property_listener.is_some())
            .field("message_listener", &self.message_listener.is_some())
            .finish()
    }
}

/// Owner of the sessions multiplexed over one authenticated connection
#[async_trait]
pub trait SessionHolderProvider: Send + Sync {
    type Holder: Send + Sync;

    /// Open a session holder for `identity`
    async fn create_session_holder(
        &self,
        identity: &ConnectionIdentity,
        handlers: SessionHandlers,
    ) -> Result<Self::Holder>;

    /// Dispose the connection if no sessions remain. Returns true if disposed.
    fn dispose_on_idle(&self) -> bool;

    /// Number of sessions currently held
    fn number_of_sessions(&self) -> usize;
}
