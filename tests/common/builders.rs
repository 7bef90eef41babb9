//! Test data builders for creating test nodes

use super::observers::RecordingObserver;
use codec_node::codec::{CodecCapabilities, SoftwareCodec};
use codec_node::config::{FenceWaitMode, ModeChangePolicy, NodeConfig};
use codec_node::node::Node;
use codec_node::types::{CommandType, NodeState};
use std::sync::Arc;

/// Builder for a node over the software codec
pub struct NodeBuilder {
    name: String,
    config: NodeConfig,
    capabilities: Option<CodecCapabilities>,
}

impl NodeBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            config: NodeConfig::default(),
            capabilities: None,
        }
    }

    pub fn ports(mut self, count: u32) -> Self {
        self.config.ports.count = count;
        self
    }

    pub fn mode_change(mut self, policy: ModeChangePolicy) -> Self {
        self.config.ports.mode_change = policy;
        self
    }

    pub fn fence_wait(mut self, mode: FenceWaitMode) -> Self {
        self.config.fences.wait_mode = mode;
        self
    }

    pub fn sync_timeout_ms(mut self, ms: u64) -> Self {
        self.config.fences.sync_timeout_ms = ms;
        self
    }

    pub fn reclaim_on_free(mut self, reclaim: bool) -> Self {
        self.config.buffers.reclaim_on_free = reclaim;
        self
    }

    pub fn capabilities(mut self, capabilities: CodecCapabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    /// Node in `Loaded`
    pub fn build(self) -> (Node, Arc<RecordingObserver>) {
        let mut codec = SoftwareCodec::new(format!("{}-codec", self.name));
        if let Some(capabilities) = self.capabilities {
            codec = codec.with_capabilities(capabilities);
        }
        let observer = RecordingObserver::new();
        let node = Node::new(self.name, self.config, Box::new(codec), observer.clone())
            .expect("node config is valid");
        (node, observer)
    }

    /// Node in `Executing`, with the state-change messages already consumed
    pub fn executing(self) -> (Node, Arc<RecordingObserver>) {
        let (node, observer) = self.build();
        set_state(&node, NodeState::Idle);
        set_state(&node, NodeState::Executing);
        assert!(node.sync_observer());
        observer.take();
        (node, observer)
    }
}

pub fn set_state(node: &Node, state: NodeState) {
    node.send_command(CommandType::StateSet, state.raw())
        .unwrap_or_else(|e| panic!("{} -> {} failed: {}", node.state(), state, e));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_builder() {
        let (node, _observer) = NodeBuilder::new("builder").ports(4).build();
        assert_eq!(node.name(), "builder");
        assert_eq!(node.state(), NodeState::Loaded);
        assert!(node.port_state(codec_node::PortIndex(3)).is_ok());
    }
}
