//! Test to verify test infrastructure works correctly

mod common;

use codec_node::node::NodeEvent;
use codec_node::types::NodeState;
use codec_node::NodeMessage;
use common::builders::NodeBuilder;

#[test]
fn test_infrastructure_setup() {
    // Test that builders work
    let (node, observer) = NodeBuilder::new("infra").ports(4).executing();
    assert_eq!(node.state(), NodeState::Executing);
    assert!(observer.messages().is_empty());
    assert!(node.port_state(common::OUTPUT).is_ok());
}

#[test]
fn test_recording_observer_sees_commands() {
    let (node, observer) = NodeBuilder::new("infra-observer").build();
    common::builders::set_state(&node, NodeState::Idle);
    assert!(node.sync_observer());
    assert!(matches!(
        observer.take().as_slice(),
        [NodeMessage::Event(NodeEvent::CommandComplete { data: 2, .. })]
    ));
}

#[test]
#[should_panic]
fn test_illegal_state_panics_in_helper() {
    let (node, _observer) = NodeBuilder::new("infra-panic").build();
    common::builders::set_state(&node, NodeState::Executing);
}
