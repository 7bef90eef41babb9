//! Parameter and config store.
//!
//! Parameters and configs are opaque `index -> blob` pairs whose meaning is
//! defined by the codec's extension vocabulary. The node validates nothing
//! beyond the index being known to the codec and passes calls straight
//! through.

use crate::codec::{Codec, CodecResult};
use crate::error::{NodeError, Result};
use crate::node::id::{ParamIndex, PortIndex};
use crate::node::instance::Node;

impl Node {
    pub fn get_parameter(&self, index: ParamIndex) -> Result<Vec<u8>> {
        self.call_codec("getParameter", |codec| codec.get_parameter(index))
    }

    pub fn set_parameter(&self, index: ParamIndex, blob: &[u8]) -> Result<()> {
        self.call_codec("setParameter", |codec| codec.set_parameter(index, blob))
    }

    pub fn get_config(&self, index: ParamIndex) -> Result<Vec<u8>> {
        self.call_codec("getConfig", |codec| codec.get_config(index))
    }

    pub fn set_config(&self, index: ParamIndex, blob: &[u8]) -> Result<()> {
        self.call_codec("setConfig", |codec| codec.set_config(index, blob))
    }

    /// Resolve a vendor extension name to its index
    pub fn get_extension_index(&self, name: &str) -> Result<ParamIndex> {
        let lifecycle = self.inner.lifecycle();
        lifecycle.ensure_alive()?;
        self.inner
            .codec()
            .extension_index(name)
            .ok_or_else(|| NodeError::UnknownExtension(name.to_string()))
    }

    /// Graphics usage bits the codec needs on buffers for `port`
    pub fn get_graphic_buffer_usage(&self, port: PortIndex) -> Result<u32> {
        let lifecycle = self.inner.lifecycle();
        lifecycle.ensure_alive()?;
        drop(self.inner.port(port)?);
        self.inner
            .codec()
            .graphic_buffer_usage(port)
            .ok_or_else(|| NodeError::Unsupported(format!("graphic buffers on {}", port)))
    }

    /// Run a codec call under the lifecycle lock, escalating fatal errors
    fn call_codec<T>(
        &self,
        what: &str,
        f: impl FnOnce(&mut dyn Codec) -> CodecResult<T>,
    ) -> Result<T> {
        let result = {
            let lifecycle = self.inner.lifecycle();
            lifecycle.ensure_alive()?;
            let mut codec = self.inner.codec();
            f(&mut **codec).map_err(NodeError::from)
        };
        if let Err(e) = &result {
            tracing::debug!("{}: {} failed: {}", self.inner.name, what, e);
        }
        self.inner.check_fatal(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::software::{
        EXT_PASSTHROUGH_LATENCY, INDEX_CONFIG_BITRATE, INDEX_EXT_PASSTHROUGH_LATENCY,
        INDEX_PARAM_PORT_DEFINITION,
    };
    use crate::codec::{CodecCapabilities, CodecError, MockCodec, SoftwareCodec};
    use crate::config::NodeConfig;
    use crate::error::Status;
    use crate::node::dispatcher::ChannelObserver;
    use crate::types::NodeState;

    fn software_node() -> Node {
        let (observer, _rx) = ChannelObserver::new();
        Node::new(
            "params",
            NodeConfig::default(),
            Box::new(SoftwareCodec::new("sw")),
            observer,
        )
        .unwrap()
    }

    #[test]
    fn test_parameter_round_trip() {
        let node = software_node();
        node.set_parameter(INDEX_PARAM_PORT_DEFINITION, &[1, 2, 3])
            .unwrap();
        assert_eq!(
            node.get_parameter(INDEX_PARAM_PORT_DEFINITION).unwrap(),
            vec![1, 2, 3]
        );
        node.set_config(INDEX_CONFIG_BITRATE, &4_000_000u32.to_le_bytes())
            .unwrap();
        assert_eq!(
            node.get_config(INDEX_CONFIG_BITRATE).unwrap(),
            4_000_000u32.to_le_bytes().to_vec()
        );
    }

    #[test]
    fn test_unknown_index() {
        let node = software_node();
        let result = node.get_parameter(ParamIndex(0x0123_4567));
        assert!(matches!(result, Err(NodeError::UnknownIndex(_))));
        assert_eq!(Status::of(&result), Status::NotFound);
        // Per-call error leaves the node usable
        assert_eq!(node.state(), NodeState::Loaded);
    }

    #[test]
    fn test_extension_lookup() {
        let node = software_node();
        assert_eq!(
            node.get_extension_index(EXT_PASSTHROUGH_LATENCY).unwrap(),
            INDEX_EXT_PASSTHROUGH_LATENCY
        );
        let err = node.get_extension_index("OMX.vendor.nonexistent").unwrap_err();
        assert_eq!(err.status(), Status::NotFound);
    }

    #[test]
    fn test_graphic_usage_checks_port() {
        let node = software_node();
        assert!(node.get_graphic_buffer_usage(PortIndex(1)).is_ok());
        assert!(matches!(
            node.get_graphic_buffer_usage(PortIndex(5)),
            Err(NodeError::BadPort(_))
        ));
    }

    #[test]
    fn test_fatal_parameter_error_invalidates() {
        let mut codec = MockCodec::new();
        codec
            .expect_capabilities()
            .returning(CodecCapabilities::default);
        codec
            .expect_set_parameter()
            .returning(|_, _| Err(CodecError::Fatal("bus error".into())));
        codec.expect_flush().returning(|_| ());
        let (observer, _rx) = ChannelObserver::new();
        let node = Node::new("mock", NodeConfig::default(), Box::new(codec), observer).unwrap();

        let result = node.set_parameter(ParamIndex(1), &[0]);
        assert_eq!(Status::of(&result), Status::Fatal);
        assert_eq!(node.state(), NodeState::Invalid);
        assert!(matches!(
            node.get_extension_index("x"),
            Err(NodeError::Invalid)
        ));
    }
}
