//! Software pass-through codec
//!
//! A codec backend that needs no hardware. Input payloads are queued in
//! arrival order and copied verbatim into output buffers, so a session can be
//! exercised end to end in tests and in the demo binary.
//!
//! # Features
//!
//! - **Pass-through data path**: input port `2k` feeds output port `2k + 1`
//! - **Retained output**: a fill with nothing queued is kept and completed when input arrives
//! - **Parameter store**: a fixed vocabulary of indices with opaque blobs
//! - **Extension table**: vendor extension names resolve to indices
//! - **Configurable capabilities**: tunneling, secure buffers, ... can be switched off
//!
//! # Example
//!
//! ```ignore
//! use codec_node::codec::{CodecCapabilities, SoftwareCodec};
//!
//! let codec = SoftwareCodec::new("sw.passthrough").with_capabilities(CodecCapabilities {
//!     tunneled_playback: true,
//!     ..CodecCapabilities::default()
//! });
//! ```

use super::{
    BufferDone, BufferWork, Codec, CodecCapabilities, CodecError, CodecResult, Completion,
    WorkDone,
};
use crate::node::id::{BufferId, ParamIndex, PortIndex};
use crate::types::{BufferBacking, BufferFlags, BufferRange, NativeHandle, NodeState};
use std::collections::{HashMap, HashSet, VecDeque};

/// Port definition parameter
pub const INDEX_PARAM_PORT_DEFINITION: ParamIndex = ParamIndex(0x0200_0001);
/// Video port format parameter
pub const INDEX_PARAM_VIDEO_PORT_FORMAT: ParamIndex = ParamIndex(0x0600_0001);
/// Target bitrate config
pub const INDEX_CONFIG_BITRATE: ParamIndex = ParamIndex(0x0900_0001);
/// Vendor extension: pass-through latency hint
pub const INDEX_EXT_PASSTHROUGH_LATENCY: ParamIndex = ParamIndex(0x7F00_0001);
/// Name of [`INDEX_EXT_PASSTHROUGH_LATENCY`]
pub const EXT_PASSTHROUGH_LATENCY: &str = "OMX.software.index.passthroughLatency";

/// Software read/write usage bits
pub const USAGE_SW_READ_WRITE: u32 = 0x0000_0033;
/// Usage bit of protected (secure) content
pub const USAGE_PROTECTED: u32 = 0x0000_4000;

/// One queued input payload
#[derive(Debug, Clone)]
struct Frame {
    data: Option<Vec<u8>>,
    length: u32,
    flags: BufferFlags,
    timestamp_us: i64,
}

/// In-memory pass-through codec
#[derive(Debug)]
pub struct SoftwareCodec {
    name: String,
    capabilities: CodecCapabilities,
    state: NodeState,
    parameters: HashMap<ParamIndex, Vec<u8>>,
    configs: HashMap<ParamIndex, Vec<u8>>,
    extensions: HashMap<String, ParamIndex>,
    /// Queued input frames, keyed by the output port they feed
    pending: HashMap<PortIndex, VecDeque<Frame>>,
    /// Fill buffers waiting for input, keyed by output port
    waiting: HashMap<PortIndex, VecDeque<(BufferId, BufferBacking)>>,
    completions: Vec<Completion>,
    tunneled: HashSet<PortIndex>,
    next_handle: u64,
}

impl SoftwareCodec {
    /// Create a pass-through codec with the default capability set
    /// (everything except tunneled playback)
    pub fn new(name: impl Into<String>) -> Self {
        let mut parameters = HashMap::new();
        parameters.insert(INDEX_PARAM_PORT_DEFINITION, vec![0; 8]);
        parameters.insert(INDEX_PARAM_VIDEO_PORT_FORMAT, vec![0; 4]);
        parameters.insert(INDEX_EXT_PASSTHROUGH_LATENCY, 0u32.to_le_bytes().to_vec());

        let mut configs = HashMap::new();
        configs.insert(INDEX_CONFIG_BITRATE, 0u32.to_le_bytes().to_vec());

        let mut extensions = HashMap::new();
        extensions.insert(EXT_PASSTHROUGH_LATENCY.to_string(), INDEX_EXT_PASSTHROUGH_LATENCY);

        Self {
            name: name.into(),
            capabilities: CodecCapabilities {
                tunneled_playback: false,
                ..CodecCapabilities::full()
            },
            state: NodeState::Loaded,
            parameters,
            configs,
            extensions,
            pending: HashMap::new(),
            waiting: HashMap::new(),
            completions: Vec::new(),
            tunneled: HashSet::new(),
            next_handle: 0x1000,
        }
    }

    /// Replace the capability set
    pub fn with_capabilities(mut self, capabilities: CodecCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Register an extra vendor extension
    pub fn with_extension(mut self, name: impl Into<String>, index: ParamIndex) -> Self {
        self.extensions.insert(name.into(), index);
        self.parameters.entry(index).or_default();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lifecycle state last reported by the node
    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Output port fed by an input port
    fn paired_output(port: PortIndex) -> PortIndex {
        PortIndex(port.0 | 1)
    }

    /// Copy a frame into an output buffer
    fn write_frame(frame: &Frame, backing: &BufferBacking) -> BufferDone {
        let length = match (backing, &frame.data) {
            (BufferBacking::Shared(mem), Some(data)) => mem.write(0, data) as u32,
            _ => match backing.capacity() {
                Some(cap) => frame.length.min(cap.min(u32::MAX as usize) as u32),
                None => frame.length,
            },
        };
        BufferDone {
            range: BufferRange::new(0, length),
            flags: frame.flags,
            timestamp_us: frame.timestamp_us,
        }
    }

    /// Pair queued input with waiting fill buffers on `port`
    fn drain_port(&mut self, port: PortIndex) {
        let (Some(frames), Some(fills)) = (self.pending.get_mut(&port), self.waiting.get_mut(&port))
        else {
            return;
        };
        while !frames.is_empty() && !fills.is_empty() {
            let (Some(frame), Some((buffer, backing))) = (frames.pop_front(), fills.pop_front())
            else {
                break;
            };
            let done = Self::write_frame(&frame, &backing);
            self.completions.push(Completion { buffer, port, done });
        }
    }
}

impl Codec for SoftwareCodec {
    fn capabilities(&self) -> CodecCapabilities {
        self.capabilities
    }

    fn on_state_change(&mut self, from: NodeState, to: NodeState) -> CodecResult<()> {
        tracing::debug!("{}: {} -> {}", self.name, from, to);
        if to == NodeState::Loaded {
            self.pending.clear();
            self.waiting.clear();
            self.completions.clear();
        }
        self.state = to;
        Ok(())
    }

    fn get_parameter(&mut self, index: ParamIndex) -> CodecResult<Vec<u8>> {
        self.parameters
            .get(&index)
            .cloned()
            .ok_or(CodecError::UnknownIndex(index))
    }

    fn set_parameter(&mut self, index: ParamIndex, blob: &[u8]) -> CodecResult<()> {
        match self.parameters.get_mut(&index) {
            Some(slot) => {
                *slot = blob.to_vec();
                Ok(())
            }
            None => Err(CodecError::UnknownIndex(index)),
        }
    }

    fn get_config(&mut self, index: ParamIndex) -> CodecResult<Vec<u8>> {
        self.configs
            .get(&index)
            .cloned()
            .ok_or(CodecError::UnknownIndex(index))
    }

    fn set_config(&mut self, index: ParamIndex, blob: &[u8]) -> CodecResult<()> {
        match self.configs.get_mut(&index) {
            Some(slot) => {
                *slot = blob.to_vec();
                Ok(())
            }
            None => Err(CodecError::UnknownIndex(index)),
        }
    }

    fn extension_index(&self, name: &str) -> Option<ParamIndex> {
        self.extensions.get(name).copied()
    }

    fn graphic_buffer_usage(&self, _port: PortIndex) -> Option<u32> {
        if self.capabilities.secure_buffers {
            Some(USAGE_SW_READ_WRITE | USAGE_PROTECTED)
        } else {
            Some(USAGE_SW_READ_WRITE)
        }
    }

    fn allocate_secure(&mut self, _port: PortIndex, size: usize) -> CodecResult<NativeHandle> {
        if !self.capabilities.secure_buffers {
            return Err(CodecError::Unsupported("secure buffers".into()));
        }
        if size == 0 {
            return Err(CodecError::Rejected("zero-sized secure buffer".into()));
        }
        let handle = NativeHandle(self.next_handle);
        self.next_handle += 1;
        Ok(handle)
    }

    fn configure_tunnel(&mut self, port: PortIndex, audio_hw_sync: Option<u32>) -> CodecResult<()> {
        if !self.capabilities.tunneled_playback {
            return Err(CodecError::Unsupported("tunneled playback".into()));
        }
        match audio_hw_sync {
            Some(_) => {
                self.tunneled.insert(port);
            }
            None => {
                self.tunneled.remove(&port);
            }
        }
        Ok(())
    }

    fn process(&mut self, work: BufferWork) -> CodecResult<WorkDone> {
        match work {
            BufferWork::Empty {
                port,
                backing,
                range,
                flags,
                timestamp_us,
                ..
            } => {
                let data = match &backing {
                    BufferBacking::Shared(mem) => Some(mem.read(range)),
                    _ => None,
                };
                let output = Self::paired_output(port);
                self.pending.entry(output).or_default().push_back(Frame {
                    data,
                    length: range.length,
                    flags,
                    timestamp_us,
                });
                self.drain_port(output);
                Ok(WorkDone::Completed(BufferDone {
                    range: BufferRange::new(range.offset, 0),
                    flags,
                    timestamp_us,
                }))
            }
            BufferWork::Fill {
                buffer,
                port,
                backing,
                ..
            } => {
                if self.tunneled.contains(&port) {
                    return Err(CodecError::Rejected("port is tunneled".into()));
                }
                if let Some(frame) = self.pending.get_mut(&port).and_then(|q| q.pop_front()) {
                    return Ok(WorkDone::Completed(Self::write_frame(&frame, &backing)));
                }
                self.waiting
                    .entry(port)
                    .or_default()
                    .push_back((buffer, backing));
                Ok(WorkDone::Retained)
            }
        }
    }

    fn take_completions(&mut self) -> Vec<Completion> {
        std::mem::take(&mut self.completions)
    }

    fn flush(&mut self, port: PortIndex) {
        if port.0 % 2 == 0 {
            self.pending.remove(&Self::paired_output(port));
        } else {
            self.waiting.remove(&port);
        }
        self.completions.retain(|c| c.port != port);
    }

    fn release_buffer(&mut self, port: PortIndex, buffer: BufferId) {
        if let Some(fills) = self.waiting.get_mut(&port) {
            fills.retain(|(id, _)| *id != buffer);
        }
        self.completions.retain(|c| c.buffer != buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SharedMemory;

    fn empty_work(buffer: u32, mem: &SharedMemory, len: u32, ts: i64) -> BufferWork {
        BufferWork::Empty {
            buffer: BufferId(buffer),
            port: PortIndex(0),
            backing: BufferBacking::Shared(mem.clone()),
            range: BufferRange::new(0, len),
            flags: BufferFlags::NONE,
            timestamp_us: ts,
        }
    }

    fn fill_work(buffer: u32, mem: &SharedMemory) -> BufferWork {
        BufferWork::Fill {
            buffer: BufferId(buffer),
            port: PortIndex(1),
            backing: BufferBacking::Shared(mem.clone()),
            range: BufferRange::new(0, mem.capacity() as u32),
        }
    }

    #[test]
    fn test_passthrough_copies_input() {
        let mut codec = SoftwareCodec::new("sw");
        let input = SharedMemory::from_bytes(vec![1, 2, 3, 4]);
        let output = SharedMemory::new(8);

        let done = codec.process(empty_work(1, &input, 4, 100)).unwrap();
        assert!(matches!(done, WorkDone::Completed(_)));

        let done = codec.process(fill_work(2, &output)).unwrap();
        let WorkDone::Completed(done) = done else {
            panic!("expected completion");
        };
        assert_eq!(done.range.length, 4);
        assert_eq!(done.timestamp_us, 100);
        assert_eq!(output.read(done.range), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_fill_retained_until_input() {
        let mut codec = SoftwareCodec::new("sw");
        let output = SharedMemory::new(8);
        assert_eq!(codec.process(fill_work(2, &output)).unwrap(), WorkDone::Retained);
        assert!(codec.take_completions().is_empty());

        let input = SharedMemory::from_bytes(vec![9, 9]);
        codec.process(empty_work(1, &input, 2, 5)).unwrap();
        let completions = codec.take_completions();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].buffer, BufferId(2));
        assert_eq!(completions[0].port, PortIndex(1));
        assert_eq!(output.read(completions[0].done.range), vec![9, 9]);
    }

    #[test]
    fn test_flush_drops_retained_fills() {
        let mut codec = SoftwareCodec::new("sw");
        let output = SharedMemory::new(8);
        codec.process(fill_work(2, &output)).unwrap();
        codec.flush(PortIndex(1));

        let input = SharedMemory::from_bytes(vec![1]);
        codec.process(empty_work(1, &input, 1, 0)).unwrap();
        assert!(codec.take_completions().is_empty());
    }

    #[test]
    fn test_parameters_and_extensions() {
        let mut codec = SoftwareCodec::new("sw");
        codec
            .set_parameter(INDEX_PARAM_PORT_DEFINITION, &[1, 2])
            .unwrap();
        assert_eq!(
            codec.get_parameter(INDEX_PARAM_PORT_DEFINITION).unwrap(),
            vec![1, 2]
        );
        assert_eq!(
            codec.get_parameter(ParamIndex(0xdead)),
            Err(CodecError::UnknownIndex(ParamIndex(0xdead)))
        );
        assert_eq!(
            codec.extension_index(EXT_PASSTHROUGH_LATENCY),
            Some(INDEX_EXT_PASSTHROUGH_LATENCY)
        );
        assert_eq!(codec.extension_index("OMX.nope"), None);
    }

    #[test]
    fn test_capability_gates() {
        let mut codec = SoftwareCodec::new("sw");
        assert!(matches!(
            codec.configure_tunnel(PortIndex(1), Some(7)),
            Err(CodecError::Unsupported(_))
        ));

        let mut codec = SoftwareCodec::new("sw").with_capabilities(CodecCapabilities::default());
        assert!(matches!(
            codec.allocate_secure(PortIndex(1), 4096),
            Err(CodecError::Unsupported(_))
        ));
        assert_eq!(
            codec.graphic_buffer_usage(PortIndex(1)),
            Some(USAGE_SW_READ_WRITE)
        );
    }

    #[test]
    fn test_secure_handles_are_distinct() {
        let mut codec = SoftwareCodec::new("sw");
        let a = codec.allocate_secure(PortIndex(1), 4096).unwrap();
        let b = codec.allocate_secure(PortIndex(1), 4096).unwrap();
        assert_ne!(a, b);
    }
}
