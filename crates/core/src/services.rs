//! Registered-service configuration loaded at startup.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Registration information about a service that may originate tasks or
/// receive device events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRegistration {
    /// Name of the service being registered.
    pub name: String,

    /// Unique identifier assigned to the service.
    pub service_id: String,

    /// The account that owns the outbound queues referenced by this entry.
    #[serde(default)]
    pub owner_account: String,

    /// Map of broker topics the service is interested in to the outbound
    /// queue topics on which it wants those messages delivered.
    #[serde(default)]
    pub topics: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RegistrationFile {
    registered_services: Vec<ServiceRegistration>,
}

/// Load registered-service configuration from the YAML file at `path`.
pub fn load_registrations(path: impl AsRef<Path>) -> Result<Vec<ServiceRegistration>, CoreError> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|e| {
        CoreError::ServiceConfig(format!("failed to read {}: {e}", path.display()))
    })?;
    let parsed: RegistrationFile = serde_yaml::from_str(&raw).map_err(|e| {
        CoreError::ServiceConfig(format!("failed to parse {}: {e}", path.display()))
    })?;
    Ok(parsed.registered_services)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_registration_yaml() {
        let yaml = r#"
registered_services:
  - name: Device Management
    service_id: hpcem
    owner_account: "123456789"
    topics:
      v1/@cloud: hpcem-events
      v1/@cloud/task_responses: hpcem-task-responses
  - name: Telemetry
    service_id: telem
"#;
        let parsed: RegistrationFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(parsed.registered_services.len(), 2);
        let dm = &parsed.registered_services[0];
        assert_eq!(dm.service_id, "hpcem");
        assert_eq!(dm.topics["v1/@cloud"], "hpcem-events");
        assert!(parsed.registered_services[1].topics.is_empty());
    }
}
