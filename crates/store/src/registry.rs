//! Registered-service persistence and the in-memory dispatch projections.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::Row;
use tracing::{debug, info};

use fahrplan_core::ServiceRegistration;

use crate::error::StoreError;
use crate::model::RegisteredService;
use crate::Store;

impl Store {
    /// Idempotently upsert a service registration.
    pub async fn register_service(&self, service: &RegisteredService) -> Result<(), StoreError> {
        let topics = serde_json::to_value(&service.topics).map_err(|_| StoreError::Internal)?;
        let pool = self.session.pool().await;
        sqlx::query(
            "INSERT INTO registered_services (service_id, name, owner_account, topics) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (service_id) DO UPDATE \
             SET name = EXCLUDED.name, owner_account = EXCLUDED.owner_account, \
                 topics = EXCLUDED.topics",
        )
        .bind(&service.service_id)
        .bind(&service.name)
        .bind(&service.owner_account)
        .bind(topics)
        .execute(&pool)
        .await?;

        debug!(service_id = %service.service_id, "registered service");
        Ok(())
    }

    /// Get a single registered service.
    pub async fn get_service(&self, service_id: &str) -> Result<RegisteredService, StoreError> {
        let pool = self.session.pool().await;
        let row = sqlx::query(
            "SELECT service_id, name, owner_account, topics \
             FROM registered_services WHERE service_id = $1",
        )
        .bind(service_id)
        .fetch_optional(&pool)
        .await?;

        match row {
            Some(row) => {
                let topics: serde_json::Value = row.get("topics");
                Ok(RegisteredService {
                    service_id: row.get("service_id"),
                    name: row.get("name"),
                    owner_account: row.get("owner_account"),
                    topics: serde_json::from_value(topics).unwrap_or_default(),
                })
            }
            None => Err(StoreError::NotFound),
        }
    }

    /// List all registered services. Used once at startup to build the
    /// in-memory projections.
    pub async fn list_services(&self) -> Result<Vec<RegisteredService>, StoreError> {
        let pool = self.session.pool().await;
        let rows = sqlx::query(
            "SELECT service_id, name, owner_account, topics FROM registered_services \
             ORDER BY service_id",
        )
        .fetch_all(&pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let topics: serde_json::Value = row.get("topics");
                RegisteredService {
                    service_id: row.get("service_id"),
                    name: row.get("name"),
                    owner_account: row.get("owner_account"),
                    topics: serde_json::from_value(topics).unwrap_or_default(),
                }
            })
            .collect())
    }
}

/// In-memory projections over the registered services.
///
/// Built once at startup and read-only thereafter, so lookups on the hot
/// message paths take no locks.
#[derive(Debug, Clone, Default)]
pub struct ServiceDirectory {
    /// `(service_id, broker_topic)` → outbound queue topic.
    dispatch_table: HashMap<(String, String), String>,
    /// `service_id` → full registration.
    config_table: HashMap<String, Arc<RegisteredService>>,
}

impl ServiceDirectory {
    /// Upsert the configured registrations into the store, then rebuild the
    /// projections from the full persisted list.
    pub async fn initialize(
        store: &Store,
        registrations: &[ServiceRegistration],
    ) -> Result<Self, StoreError> {
        for reg in registrations {
            let service = RegisteredService {
                service_id: reg.service_id.clone(),
                name: reg.name.clone(),
                owner_account: reg.owner_account.clone(),
                topics: reg.topics.clone(),
            };
            store.register_service(&service).await?;
        }

        let services = store.list_services().await?;
        let directory = Self::from_services(services);
        info!(
            services = directory.config_table.len(),
            routes = directory.dispatch_table.len(),
            "service dispatch table initialized"
        );
        Ok(directory)
    }

    pub fn from_services(services: Vec<RegisteredService>) -> Self {
        let mut dispatch_table = HashMap::new();
        let mut config_table = HashMap::new();
        for service in services {
            for (broker_topic, queue_topic) in &service.topics {
                dispatch_table.insert(
                    (service.service_id.clone(), broker_topic.clone()),
                    queue_topic.clone(),
                );
            }
            config_table.insert(service.service_id.clone(), Arc::new(service));
        }
        Self {
            dispatch_table,
            config_table,
        }
    }

    /// Outbound queue topic for a message a service wants from a broker
    /// topic, or `None` when the pair is not registered.
    pub fn queue_topic_for(&self, service_id: &str, broker_topic: &str) -> Option<&str> {
        self.dispatch_table
            .get(&(service_id.to_string(), broker_topic.to_string()))
            .map(String::as_str)
    }

    pub fn is_valid_service_id(&self, service_id: &str) -> bool {
        self.config_table.contains_key(service_id)
    }

    pub fn service_config(&self, service_id: &str) -> Option<&Arc<RegisteredService>> {
        self.config_table.get(service_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_services() -> Vec<RegisteredService> {
        vec![
            RegisteredService {
                service_id: "hpcem".into(),
                name: "Device Management".into(),
                owner_account: "123456789".into(),
                topics: HashMap::from([
                    ("v1/@cloud".to_string(), "hpcem-events".to_string()),
                    (
                        "v1/@cloud/task_responses".to_string(),
                        "hpcem-task-responses".to_string(),
                    ),
                ]),
            },
            RegisteredService {
                service_id: "telem".into(),
                name: "Telemetry".into(),
                owner_account: String::new(),
                topics: HashMap::new(),
            },
        ]
    }

    #[test]
    fn dispatch_table_routes_by_service_and_topic() {
        let dir = ServiceDirectory::from_services(sample_services());
        assert_eq!(
            dir.queue_topic_for("hpcem", "v1/@cloud/task_responses"),
            Some("hpcem-task-responses")
        );
        assert_eq!(dir.queue_topic_for("hpcem", "v1/@cloud"), Some("hpcem-events"));
        assert_eq!(dir.queue_topic_for("telem", "v1/@cloud"), None);
        assert_eq!(dir.queue_topic_for("nobody", "v1/@cloud"), None);
    }

    #[test]
    fn service_validity_follows_config_table() {
        let dir = ServiceDirectory::from_services(sample_services());
        assert!(dir.is_valid_service_id("hpcem"));
        assert!(dir.is_valid_service_id("telem"));
        assert!(!dir.is_valid_service_id("unknown"));
    }
}
