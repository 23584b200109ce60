//! Flow configuration file.
//!
//! A flow lists the hub clients (one connection each), the inbound nodes
//! that route hub events, and the outbound nodes that invoke hub methods.
//! Nodes refer to their client by id.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use hubrelay_hub_connection::Subscription;
use hubrelay_protocol::Endpoint;

use crate::error::FlowError;

/// Whole flow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowConfig {
    #[serde(default)]
    pub clients: Vec<ClientConfig>,
    #[serde(default)]
    pub inputs: Vec<InputConfig>,
    #[serde(default)]
    pub outputs: Vec<OutputConfig>,
}

/// A hub client: one endpoint, one managed connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub id: String,
    #[serde(flatten)]
    pub endpoint: Endpoint,
}

/// An inbound node and the hub events it listens to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    pub id: String,
    pub client: String,
    #[serde(default)]
    pub responses: Vec<ResponseConfig>,
}

/// One hub event routed to a data output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseConfig {
    pub method_name: String,
    /// Data output index. Defaults to the entry's position in `responses`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<usize>,
}

/// An outbound node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub id: String,
    pub client: String,
}

impl InputConfig {
    /// Subscriptions in configuration order.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.responses
            .iter()
            .enumerate()
            .map(|(i, r)| Subscription::new(r.method_name.clone(), r.output.unwrap_or(i)))
            .collect()
    }
}

impl FlowConfig {
    /// Parses and validates a JSON flow.
    pub fn from_json(json: &str) -> Result<Self, FlowError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON flow file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    /// Writes the flow as pretty JSON, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), FlowError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Checks node ids are unique and every endpoint is usable.
    ///
    /// References to unknown clients are not an error here; deployment
    /// rejects those nodes individually.
    pub fn validate(&self) -> Result<(), FlowError> {
        let mut seen = HashSet::new();
        let ids = self
            .clients
            .iter()
            .map(|c| &c.id)
            .chain(self.inputs.iter().map(|i| &i.id))
            .chain(self.outputs.iter().map(|o| &o.id));
        for id in ids {
            if !seen.insert(id) {
                return Err(FlowError::DuplicateId(id.clone()));
            }
        }

        for client in &self.clients {
            client
                .endpoint
                .validate()
                .map_err(|source| FlowError::Endpoint {
                    id: client.id.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubrelay_protocol::EndpointError;

    const FLOW: &str = r#"{
        "clients": [
            {"id": "c1", "host": "localhost", "port": "5000", "hub": "chathub", "secure": false},
            {"id": "c2", "host": "example.com", "port": 443, "hub": "/events", "secure": true}
        ],
        "inputs": [
            {"id": "in1", "client": "c1", "responses": [
                {"methodName": "ReceiveMessage"},
                {"methodName": "UserJoined"},
                {"methodName": "Pinned", "output": 5}
            ]}
        ],
        "outputs": [{"id": "out1", "client": "c1"}]
    }"#;

    #[test]
    fn parses_clients_with_string_and_numeric_ports() {
        let config = FlowConfig::from_json(FLOW).unwrap();
        assert_eq!(config.clients.len(), 2);
        assert_eq!(
            config.clients[0].endpoint.connection_url(),
            "http://localhost:5000/chathub"
        );
        assert_eq!(
            config.clients[1].endpoint.connection_url(),
            "https://example.com/events"
        );
    }

    #[test]
    fn responses_default_to_positional_outputs() {
        let config = FlowConfig::from_json(FLOW).unwrap();
        let subs = config.inputs[0].subscriptions();
        assert_eq!(
            subs,
            vec![
                Subscription::new("ReceiveMessage", 0),
                Subscription::new("UserJoined", 1),
                Subscription::new("Pinned", 5),
            ]
        );
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let config = FlowConfig::from_json("{}").unwrap();
        assert!(config.clients.is_empty());
        assert!(config.inputs.is_empty());
        assert!(config.outputs.is_empty());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let json = r#"{
            "clients": [{"id": "x", "host": "h", "port": 80}],
            "outputs": [{"id": "x", "client": "x"}]
        }"#;
        assert!(matches!(
            FlowConfig::from_json(json),
            Err(FlowError::DuplicateId(id)) if id == "x"
        ));
    }

    #[test]
    fn empty_host_is_rejected() {
        let json = r#"{"clients": [{"id": "c", "host": "", "port": 80}]}"#;
        assert!(matches!(
            FlowConfig::from_json(json),
            Err(FlowError::Endpoint { id, source: EndpointError::MissingHost }) if id == "c"
        ));
    }

    #[test]
    fn bad_port_is_a_parse_error() {
        let json = r#"{"clients": [{"id": "c", "host": "h", "port": "eighty"}]}"#;
        assert!(matches!(
            FlowConfig::from_json(json),
            Err(FlowError::Json(_))
        ));
    }

    #[test]
    fn save_and_load_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("flow.json");

        let config = FlowConfig::from_json(FLOW).unwrap();
        config.save(&path).unwrap();

        let loaded = FlowConfig::load(&path).unwrap();
        assert_eq!(loaded.clients[1].endpoint, config.clients[1].endpoint);
        assert_eq!(loaded.inputs[0].subscriptions(), config.inputs[0].subscriptions());
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            FlowConfig::load(dir.path().join("absent.json")),
            Err(FlowError::Io(_))
        ));
    }
}
