//! Connection identity used to scope token negotiations

use crate::error::{RefreshError, Result};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Claim requested on every negotiation: permission to connect as the device
pub const CLAIM_DEVICE_CONNECT: &str = "DeviceConnect";

/// Identity of the authenticated connection.
///
/// Immutable once handed to a [`RefreshScheduler`](crate::auth::RefreshScheduler).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionIdentity {
    /// Fully qualified host name of the service endpoint
    pub host_name: String,
    /// Device identifier
    pub device_id: String,
    /// Module identifier, when the connection belongs to a module
    #[serde(default)]
    pub module_id: Option<String>,
    /// Shared access key material, if the negotiator signs tokens locally
    #[serde(default, skip_serializing)]
    pub shared_access_key: Option<SecretString>,
}

impl ConnectionIdentity {
    /// Create a device identity without key material
    pub fn new<S: Into<String>>(host_name: S, device_id: S) -> Self {
        Self {
            host_name: host_name.into(),
            device_id: device_id.into(),
            module_id: None,
            shared_access_key: None,
        }
    }

    /// Scope this identity to a module
    pub fn with_module<S: Into<String>>(mut self, module_id: S) -> Self {
        self.module_id = Some(module_id.into());
        self
    }

    /// Attach shared access key material
    pub fn with_shared_access_key(mut self, key: SecretString) -> Self {
        self.shared_access_key = Some(key);
        self
    }

    /// Audience the token is requested for
    pub fn audience(&self) -> String {
        match &self.module_id {
            Some(module_id) => format!(
                "{}/devices/{}/modules/{}",
                self.host_name, self.device_id, module_id
            ),
            None => format!("{}/devices/{}", self.host_name, self.device_id),
        }
    }

    /// Resource the token grants access to
    pub fn resource(&self) -> String {
        self.audience()
    }

    /// Short label for log fields
    pub fn label(&self) -> String {
        match &self.module_id {
            Some(module_id) => format!("{}/{}", self.device_id, module_id),
            None => self.device_id.clone(),
        }
    }

    /// Validate identity fields
    pub fn validate(&self) -> Result<()> {
        if self.host_name.trim().is_empty() {
            return Err(RefreshError::config("Identity host_name cannot be empty"));
        }
        if self.device_id.trim().is_empty() {
            return Err(RefreshError::config("Identity device_id cannot be empty"));
        }
        if matches!(&self.module_id, Some(m) if m.trim().is_empty()) {
            return Err(RefreshError::config("Identity module_id cannot be empty when set"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_audience() {
        let identity = ConnectionIdentity::new("hub.example.net", "sensor-7");
        assert_eq!(identity.audience(), "hub.example.net/devices/sensor-7");
        assert_eq!(identity.resource(), identity.audience());
        assert_eq!(identity.label(), "sensor-7");
    }

    #[test]
    fn test_module_audience() {
        let identity = ConnectionIdentity::new("hub.example.net", "gateway").with_module("edge");
        assert_eq!(identity.audience(), "hub.example.net/devices/gateway/modules/edge");
        assert_eq!(identity.label(), "gateway/edge");
    }

    #[test]
    fn test_key_material_is_not_logged() {
        let identity = ConnectionIdentity::new("hub.example.net", "sensor-7")
            .with_shared_access_key(SecretString::new("c2VjcmV0".to_string()));
        let rendered = format!("{:?}", identity);
        assert!(!rendered.contains("c2VjcmV0"));
    }

    #[test]
    fn test_validate_rejects_blank_device() {
        assert!(ConnectionIdentity::new("hub.example.net", " ").validate().is_err());
        assert!(ConnectionIdentity::new("hub.example.net", "d").with_module("").validate().is_err());
    }
}
