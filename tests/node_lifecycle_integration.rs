//! Integration tests for the node lifecycle, fatal errors and configuration

mod common;

use codec_node::codec::software::{INDEX_CONFIG_BITRATE, INDEX_PARAM_PORT_DEFINITION};
use codec_node::config::{FenceWaitMode, ModeChangePolicy, NodeConfig};
use codec_node::node::{Fence, FenceDisposition, Node, NodeEvent, NodeMessage, PortMode};
use codec_node::types::{BufferFlags, CommandType, NodeState};
use codec_node::{NodeError, Status};
use common::builders::{set_state, NodeBuilder};
use common::codecs::FaultyCodec;
use common::observers::RecordingObserver;
use common::{preset, whole, INPUT, OUTPUT};

fn faulty_node() -> (Node, std::sync::Arc<RecordingObserver>) {
    let observer = RecordingObserver::new();
    let node = Node::new(
        "faulty",
        NodeConfig::default(),
        Box::new(FaultyCodec::new()),
        observer.clone(),
    )
    .unwrap();
    (node, observer)
}

#[test]
fn test_invalid_node_rejects_everything_but_free() {
    let (node, observer) = faulty_node();
    set_state(&node, NodeState::Idle);
    let buffer = node.use_buffer(INPUT, preset(32)).unwrap();
    set_state(&node, NodeState::Executing);

    let result = node.set_config(INDEX_CONFIG_BITRATE, &[1, 2, 3, 4]);
    assert_eq!(Status::of(&result), Status::Fatal);
    assert_eq!(node.state(), NodeState::Invalid);

    let (fence, _signal) = Fence::new();
    let watch = fence.watch();
    let results = [
        Status::of(&node.send_command(CommandType::StateSet, NodeState::Idle.raw())),
        Status::of(&node.send_command(CommandType::Flush, INPUT.0)),
        Status::of(&node.use_buffer(INPUT, preset(32))),
        Status::of(&node.allocate_secure_buffer(OUTPUT, 32)),
        Status::of(&node.free_buffer(INPUT, buffer)),
        Status::of(&node.empty_buffer(buffer, whole(32), BufferFlags::NONE, 0, Some(fence))),
        Status::of(&node.get_parameter(INDEX_PARAM_PORT_DEFINITION)),
        Status::of(&node.set_parameter(INDEX_PARAM_PORT_DEFINITION, &[0])),
        Status::of(&node.get_config(INDEX_CONFIG_BITRATE)),
        Status::of(&node.get_extension_index("anything")),
        Status::of(&node.get_graphic_buffer_usage(OUTPUT)),
        Status::of(&node.set_port_mode(OUTPUT, PortMode::Normal)),
        Status::of(&node.prepare_for_adaptive_playback(OUTPUT, true, 64, 64)),
        Status::of(&node.configure_video_tunnel_mode(OUTPUT, true, 1)),
    ];
    assert!(results.iter().all(|s| *s == Status::Invalid), "{:?}", results);
    assert_eq!(watch.disposition(), Some(FenceDisposition::Canceled));

    node.sync_observer();
    let errors: Vec<NodeMessage> = observer
        .take()
        .into_iter()
        .filter(|m| matches!(m, NodeMessage::Event(NodeEvent::Error { .. })))
        .collect();
    assert_eq!(errors.len(), 1);

    node.free_node().unwrap();
    assert_eq!(node.buffer_count(), 0);
}

#[test]
fn test_observer_runs_on_one_dispatcher_thread() {
    let (node, observer) = NodeBuilder::new("threads").build();
    set_state(&node, NodeState::Idle);
    set_state(&node, NodeState::Executing);
    set_state(&node, NodeState::Idle);
    node.sync_observer();

    let threads = observer.threads();
    assert!(!threads.is_empty());
    assert!(threads.iter().all(|t| *t == threads[0]));
    assert_ne!(threads[0], std::thread::current().id());

    let stats = node.dispatcher_stats();
    assert_eq!(stats.posted, 3);
    assert_eq!(stats.delivered, 3);
}

#[test]
fn test_no_callbacks_after_free() {
    let (node, observer) = NodeBuilder::new("free").executing();
    for _ in 0..8 {
        let id = node.use_buffer(OUTPUT, preset(16)).unwrap();
        node.fill_buffer(id, whole(16), None).unwrap();
    }
    node.free_node().unwrap();
    observer.seal();

    // Everything returned by free was delivered before it returned
    let canceled = observer
        .messages()
        .iter()
        .filter(|m| m.buffer_id().is_some())
        .count();
    assert_eq!(canceled, 8);

    assert_eq!(
        Status::of(&node.send_command(CommandType::Flush, OUTPUT.0)),
        Status::InvalidState
    );
    assert!(!node.sync_observer());
    assert_eq!(observer.late_calls(), 0);
}

#[test]
fn test_drop_frees_node() {
    let (node, observer) = NodeBuilder::new("dropped").executing();
    let id = node.use_buffer(OUTPUT, preset(16)).unwrap();
    node.fill_buffer(id, whole(16), None).unwrap();
    drop(node);
    assert_eq!(observer.messages().len(), 1);
}

#[test]
fn test_parameters_pass_through() {
    let (node, _observer) = NodeBuilder::new("params").build();
    node.set_parameter(INDEX_PARAM_PORT_DEFINITION, &[9; 8])
        .unwrap();
    assert_eq!(
        node.get_parameter(INDEX_PARAM_PORT_DEFINITION).unwrap(),
        vec![9; 8]
    );
    assert!(matches!(
        node.get_config(codec_node::node::ParamIndex(0x5555)),
        Err(NodeError::UnknownIndex(_))
    ));
}

#[test]
fn test_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("node.toml");

    let config = NodeConfig::default()
        .with_port_count(4)
        .with_mode_change(ModeChangePolicy::Reject)
        .with_fence_wait(FenceWaitMode::Synchronous);
    config.save(&path).unwrap();

    let loaded = NodeConfig::load(&path).unwrap();
    assert_eq!(loaded.ports.count, 4);
    assert_eq!(loaded.ports.mode_change, ModeChangePolicy::Reject);
    assert_eq!(loaded.fences.wait_mode, FenceWaitMode::Synchronous);

    let observer = RecordingObserver::new();
    let node = Node::new(
        "from-file",
        loaded,
        Box::new(codec_node::SoftwareCodec::new("sw")),
        observer,
    )
    .unwrap();
    assert!(node.port_state(codec_node::PortIndex(3)).is_ok());
    assert!(node.port_state(codec_node::PortIndex(4)).is_err());
}

#[test]
fn test_invalid_config_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("node.toml");
    std::fs::write(&path, "[ports]\ncount = 0\n").unwrap();
    assert!(matches!(NodeConfig::load(&path), Err(NodeError::Config(_))));

    let mut config = NodeConfig::default();
    config.dispatcher.max_batch = 0;
    let observer = RecordingObserver::new();
    let result = Node::new(
        "bad",
        config,
        Box::new(codec_node::SoftwareCodec::new("sw")),
        observer,
    );
    assert!(matches!(result, Err(NodeError::Config(_))));
}
