//! Deployed flow: managers per client, routers and forwarders per node.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

use hubrelay_hub_connection::{
    EventRouter, HubConnectionManager, HubError, HubListener, HubTransport, InvocationForwarder,
    InvocationRequest,
};
use hubrelay_protocol::{NodeStatus, RoutedMessage};

use crate::config::FlowConfig;

/// An inbound node: routes hub events to its output channel.
pub struct InNode {
    id: String,
    client: String,
    router: Arc<EventRouter>,
    output: Option<mpsc::Receiver<RoutedMessage>>,
}

impl InNode {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn client(&self) -> &str {
        &self.client
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    /// Takes the receiving end of the node's output. Only the first call
    /// gets it.
    pub fn take_output(&mut self) -> Option<mpsc::Receiver<RoutedMessage>> {
        self.output.take()
    }

    pub fn status(&self) -> NodeStatus {
        self.router.status()
    }
}

/// An outbound node: forwards invocation requests to its hub.
pub struct OutNode {
    id: String,
    client: String,
    forwarder: Arc<InvocationForwarder>,
}

impl OutNode {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn client(&self) -> &str {
        &self.client
    }

    pub fn forwarder(&self) -> &Arc<InvocationForwarder> {
        &self.forwarder
    }

    pub fn status(&self) -> NodeStatus {
        self.forwarder.status()
    }

    pub fn send(&self, request: &InvocationRequest) -> Result<(), HubError> {
        self.forwarder.forward_request(request)
    }
}

/// A deployed flow.
///
/// Managers are created idle; call [`Flow::start`] once the nodes are
/// wired so every listener sees the first `Opened`.
pub struct Flow {
    managers: HashMap<String, HubConnectionManager>,
    inputs: HashMap<String, InNode>,
    outputs: HashMap<String, OutNode>,
    rejected: Vec<(String, HubError)>,
}

impl Flow {
    /// Builds managers and nodes from `config`.
    ///
    /// Nodes naming an unknown client are skipped and recorded in
    /// [`Flow::rejected`]; the rest of the flow deploys normally.
    pub fn deploy(config: &FlowConfig, transport: Arc<dyn HubTransport>) -> Self {
        let managers: HashMap<_, _> = config
            .clients
            .iter()
            .map(|c| {
                let manager = HubConnectionManager::new(c.endpoint.clone(), transport.clone());
                (c.id.clone(), manager)
            })
            .collect();

        let mut flow = Self {
            managers,
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            rejected: Vec::new(),
        };

        for input in &config.inputs {
            let Some(manager) = flow.lookup(&input.id, &input.client) else {
                continue;
            };
            let (router, output) = EventRouter::attach(&manager, input.subscriptions());
            flow.inputs.insert(
                input.id.clone(),
                InNode {
                    id: input.id.clone(),
                    client: input.client.clone(),
                    router,
                    output: Some(output),
                },
            );
        }

        for output in &config.outputs {
            let Some(manager) = flow.lookup(&output.id, &output.client) else {
                continue;
            };
            let forwarder = InvocationForwarder::attach(Some(&manager));
            flow.outputs.insert(
                output.id.clone(),
                OutNode {
                    id: output.id.clone(),
                    client: output.client.clone(),
                    forwarder,
                },
            );
        }

        info!(
            clients = flow.managers.len(),
            inputs = flow.inputs.len(),
            outputs = flow.outputs.len(),
            rejected = flow.rejected.len(),
            "flow deployed"
        );
        flow
    }

    fn lookup(&mut self, node: &str, client: &str) -> Option<HubConnectionManager> {
        match self.client(client) {
            Ok(manager) => Some(manager.clone()),
            Err(e) => {
                error!(node, client, "{e}");
                self.rejected.push((node.to_string(), e));
                None
            }
        }
    }

    /// Manager for a client id.
    pub fn client(&self, id: &str) -> Result<&HubConnectionManager, HubError> {
        self.managers
            .get(id)
            .ok_or_else(|| HubError::MissingConfiguration(id.to_string()))
    }

    /// Starts every manager. Already running managers are left alone.
    pub fn start(&self) {
        for manager in self.managers.values() {
            manager.start();
        }
    }

    /// Stops every manager, then clears node statuses. Nodes stay
    /// registered so a later [`Flow::start`] resumes routing.
    pub async fn stop(&self) {
        for manager in self.managers.values() {
            manager.stop().await;
        }
        for node in self.inputs.values() {
            node.router.close(false);
        }
        for node in self.outputs.values() {
            node.forwarder.close(false);
        }
    }

    pub fn input(&self, id: &str) -> Option<&InNode> {
        self.inputs.get(id)
    }

    pub fn input_mut(&mut self, id: &str) -> Option<&mut InNode> {
        self.inputs.get_mut(id)
    }

    pub fn output(&self, id: &str) -> Option<&OutNode> {
        self.outputs.get(id)
    }

    /// Removes an in-node for good. Nothing more is delivered to its
    /// output.
    pub fn remove_input(&mut self, id: &str) -> Option<InNode> {
        let node = self.inputs.remove(id)?;
        node.router.close(true);
        info!(node = id, listener = %node.router.id(), "input removed");
        Some(node)
    }

    /// Removes an out-node for good.
    pub fn remove_output(&mut self, id: &str) -> Option<OutNode> {
        let node = self.outputs.remove(id)?;
        node.forwarder.close(true);
        info!(node = id, listener = %node.forwarder.id(), "output removed");
        Some(node)
    }

    /// Sends `request` through the out-node `output_id`.
    pub fn send(&self, output_id: &str, request: &InvocationRequest) -> Result<(), HubError> {
        self.outputs
            .get(output_id)
            .ok_or_else(|| HubError::MissingConfiguration(output_id.to_string()))?
            .send(request)
    }

    /// Nodes skipped at deploy time, with the reason.
    pub fn rejected(&self) -> &[(String, HubError)] {
        &self.rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubrelay_hub_connection::mock::MockTransport;

    fn config() -> FlowConfig {
        FlowConfig::from_json(
            r#"{
                "clients": [{"id": "c1", "host": "localhost", "port": 5000, "hub": "chathub"}],
                "inputs": [
                    {"id": "in1", "client": "c1", "responses": [{"methodName": "Msg"}]},
                    {"id": "orphan-in", "client": "nope", "responses": []}
                ],
                "outputs": [
                    {"id": "out1", "client": "c1"},
                    {"id": "orphan-out", "client": "gone"}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn unknown_clients_are_rejected_individually() {
        let flow = Flow::deploy(&config(), Arc::new(MockTransport::new()));

        assert!(flow.input("in1").is_some());
        assert!(flow.output("out1").is_some());
        assert!(flow.input("orphan-in").is_none());
        assert!(flow.output("orphan-out").is_none());

        let rejected: Vec<_> = flow.rejected().iter().map(|(id, e)| (id.as_str(), e.clone())).collect();
        assert_eq!(
            rejected,
            vec![
                ("orphan-in", HubError::MissingConfiguration("nope".into())),
                ("orphan-out", HubError::MissingConfiguration("gone".into())),
            ]
        );
    }

    #[test]
    fn deploy_wires_nodes_without_connecting() {
        let transport = MockTransport::new();
        let flow = Flow::deploy(&config(), Arc::new(transport.clone()));

        let manager = flow.client("c1").unwrap();
        assert_eq!(manager.registry().len(), 2);
        assert!(!manager.is_running());
        assert_eq!(transport.build_count(), 0);
        assert!(matches!(
            flow.client("nope"),
            Err(HubError::MissingConfiguration(_))
        ));
    }

    #[test]
    fn send_to_unknown_output_is_missing_configuration() {
        let flow = Flow::deploy(&config(), Arc::new(MockTransport::new()));
        let request = InvocationRequest::new("Send", serde_json::json!([1]));
        assert_eq!(
            flow.send("missing", &request),
            Err(HubError::MissingConfiguration("missing".into()))
        );
    }

    #[test]
    fn output_channel_is_taken_once() {
        let mut flow = Flow::deploy(&config(), Arc::new(MockTransport::new()));
        let node = flow.input_mut("in1").unwrap();
        assert!(node.take_output().is_some());
        assert!(node.take_output().is_none());
    }

    #[test]
    fn removal_unregisters() {
        let mut flow = Flow::deploy(&config(), Arc::new(MockTransport::new()));

        let input = flow.remove_input("in1").unwrap();
        let output = flow.remove_output("out1").unwrap();
        assert_eq!(input.id(), "in1");
        assert_eq!(output.client(), "c1");

        assert!(flow.client("c1").unwrap().registry().is_empty());
        assert!(flow.remove_input("in1").is_none());
        assert!(flow.remove_output("out1").is_none());
    }
}
