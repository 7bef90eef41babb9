//! Codec wrappers that inject failures

use codec_node::codec::{
    BufferWork, Codec, CodecCapabilities, CodecError, CodecResult, Completion, SoftwareCodec,
    WorkDone,
};
use codec_node::node::{BufferId, ParamIndex, PortIndex};
use codec_node::types::{NativeHandle, NodeState};

/// Software codec that fails fatally on `set_config`, like a backend whose
/// firmware dies mid-session
pub struct FaultyCodec {
    inner: SoftwareCodec,
}

impl FaultyCodec {
    pub fn new() -> Self {
        Self {
            inner: SoftwareCodec::new("faulty"),
        }
    }
}

impl Codec for FaultyCodec {
    fn capabilities(&self) -> CodecCapabilities {
        self.inner.capabilities()
    }

    fn on_state_change(&mut self, from: NodeState, to: NodeState) -> CodecResult<()> {
        self.inner.on_state_change(from, to)
    }

    fn get_parameter(&mut self, index: ParamIndex) -> CodecResult<Vec<u8>> {
        self.inner.get_parameter(index)
    }

    fn set_parameter(&mut self, index: ParamIndex, blob: &[u8]) -> CodecResult<()> {
        self.inner.set_parameter(index, blob)
    }

    fn get_config(&mut self, index: ParamIndex) -> CodecResult<Vec<u8>> {
        self.inner.get_config(index)
    }

    fn set_config(&mut self, _index: ParamIndex, _blob: &[u8]) -> CodecResult<()> {
        Err(CodecError::Fatal("firmware stopped responding".into()))
    }

    fn extension_index(&self, name: &str) -> Option<ParamIndex> {
        self.inner.extension_index(name)
    }

    fn graphic_buffer_usage(&self, port: PortIndex) -> Option<u32> {
        self.inner.graphic_buffer_usage(port)
    }

    fn allocate_secure(&mut self, port: PortIndex, size: usize) -> CodecResult<NativeHandle> {
        self.inner.allocate_secure(port, size)
    }

    fn configure_tunnel(&mut self, port: PortIndex, audio_hw_sync: Option<u32>) -> CodecResult<()> {
        self.inner.configure_tunnel(port, audio_hw_sync)
    }

    fn process(&mut self, work: BufferWork) -> CodecResult<WorkDone> {
        self.inner.process(work)
    }

    fn take_completions(&mut self) -> Vec<Completion> {
        self.inner.take_completions()
    }

    fn flush(&mut self, port: PortIndex) {
        self.inner.flush(port)
    }

    fn release_buffer(&mut self, port: PortIndex, buffer: BufferId) {
        self.inner.release_buffer(port, buffer)
    }
}
