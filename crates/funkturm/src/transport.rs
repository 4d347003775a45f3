//! Transport endpoints for broker connections.

use std::path::Path;

use serde::{Deserialize, Serialize};

use fahrplan_core::config::BrokerConfig;

/// Transport layer for a single broker socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "address")]
pub enum Transport {
    /// Inter-process communication via Unix domain sockets. Used when the
    /// broker runs on the same host (`broker_type = local`).
    Ipc(String),

    /// TCP transport for a remote broker.
    Tcp { host: String, port: u16 },
}

impl Transport {
    pub fn ipc(name: &str) -> Self {
        Self::Ipc(name.to_string())
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Generate the socket endpoint address string.
    pub fn endpoint(&self) -> String {
        match self {
            Self::Ipc(name) => format!("ipc:///tmp/fahrplan/{name}.sock"),
            Self::Tcp { host, port } => format!("tcp://{host}:{port}"),
        }
    }

    /// For IPC transports, ensure the socket directory exists.
    pub fn ensure_ipc_dir(&self) -> std::io::Result<()> {
        if let Self::Ipc(_) = self {
            let endpoint = self.endpoint();
            let path = endpoint.strip_prefix("ipc://").unwrap_or(&endpoint);
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.endpoint())
    }
}

/// The broker exposes a frontend socket (where publishers connect) and a
/// backend socket (where subscribers connect).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoints {
    pub frontend: Transport,
    pub backend: Transport,
}

impl BrokerEndpoints {
    /// Derive both endpoints from broker configuration. TCP brokers use the
    /// configured port for the frontend and the next port for the backend;
    /// local brokers use a pair of named IPC sockets.
    pub fn from_config(config: &BrokerConfig) -> Self {
        if config.broker_type == "local" {
            Self {
                frontend: Transport::ipc("broker-frontend"),
                backend: Transport::ipc("broker-backend"),
            }
        } else {
            Self {
                frontend: Transport::tcp(config.host.clone(), config.port),
                backend: Transport::tcp(config.host.clone(), config.port + 1),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipc_endpoint() {
        let t = Transport::ipc("broker-frontend");
        assert_eq!(t.endpoint(), "ipc:///tmp/fahrplan/broker-frontend.sock");
    }

    #[test]
    fn tcp_endpoint() {
        let t = Transport::tcp("127.0.0.1", 1883);
        assert_eq!(t.endpoint(), "tcp://127.0.0.1:1883");
    }

    #[test]
    fn endpoints_follow_broker_type() {
        let mut config = BrokerConfig {
            broker_type: "tcp".into(),
            host: "broker.internal".into(),
            port: 1883,
            keep_alive_secs: 30,
            qos: 0,
            reconnect_delay_secs: 5,
            connect_timeout_secs: 5,
        };
        let eps = BrokerEndpoints::from_config(&config);
        assert_eq!(eps.frontend, Transport::tcp("broker.internal", 1883));
        assert_eq!(eps.backend, Transport::tcp("broker.internal", 1884));

        config.broker_type = "local".into();
        let eps = BrokerEndpoints::from_config(&config);
        assert_eq!(eps.frontend, Transport::ipc("broker-frontend"));
    }
}
