//! Command processor.
//!
//! `send_command` drives the node lifecycle and the per-port enable/flush
//! commands. Legal lifecycle transitions:
//!
//! ```text
//! Loaded <-> Idle <-> Executing <-> Pause
//!             ^                       |
//!             +-----------------------+
//!             Idle -> Pause
//! ```
//!
//! Anything else, including a transition to the current state, is rejected
//! with `IncompatibleState`. Leaving Executing or Pause for Idle returns every
//! in-flight buffer to the client with a canceled completion.

use crate::error::{NodeError, Result, Status};
use crate::node::instance::Node;
use crate::node::id::PortIndex;
use crate::node::message::{CompletionOutcome, NodeMessage};
use crate::types::{CommandType, NodeState};

/// Whether `from -> to` is a legal lifecycle transition
pub fn is_legal_transition(from: NodeState, to: NodeState) -> bool {
    use NodeState::*;
    matches!(
        (from, to),
        (Loaded, Idle)
            | (Idle, Loaded)
            | (Idle, Executing)
            | (Executing, Idle)
            | (Executing, Pause)
            | (Pause, Executing)
            | (Pause, Idle)
            | (Idle, Pause)
    )
}

impl Node {
    /// Issue a command.
    ///
    /// `param` is the target state's raw value for `StateSet`, and a port
    /// index or `PortIndex::ALL` for the port commands. Completion is also
    /// reported to the observer as a `CommandComplete` event.
    pub fn send_command(&self, command: CommandType, param: u32) -> Result<()> {
        tracing::debug!("{}: command {:?}({})", self.inner.name, command, param);
        let result = match command {
            CommandType::StateSet => {
                let to = NodeState::from_raw(param)
                    .ok_or_else(|| NodeError::BadValue(format!("unknown state {}", param)))?;
                self.set_state(to)
            }
            CommandType::Flush => self.for_ports(PortIndex(param), CommandType::Flush),
            CommandType::PortDisable => self.for_ports(PortIndex(param), CommandType::PortDisable),
            CommandType::PortEnable => self.for_ports(PortIndex(param), CommandType::PortEnable),
            CommandType::MarkBuffer => Err(NodeError::Unsupported("MarkBuffer".into())),
        };
        if let Err(e) = &result {
            tracing::warn!("{}: {:?}({}) failed: {}", self.inner.name, command, param, e);
        }
        self.inner.check_fatal(result)
    }

    fn set_state(&self, to: NodeState) -> Result<()> {
        let inner = &self.inner;
        let from = {
            let mut lifecycle = inner.lifecycle_mut();
            lifecycle.ensure_alive()?;
            let from = lifecycle.state;
            if !is_legal_transition(from, to) {
                return Err(NodeError::IncompatibleState { from, to });
            }
            if from == NodeState::Idle && to == NodeState::Loaded {
                let registered = inner.registry().len();
                if registered > 0 {
                    return Err(NodeError::InvalidState(format!(
                        "{} buffer(s) still registered",
                        registered
                    )));
                }
            }

            if let Err(e) = inner.codec().on_state_change(from, to) {
                if e.is_fatal() {
                    // Already holding the lifecycle lock; escalate in place
                    tracing::error!("{}: codec failed {} -> {}: {}", inner.name, from, to, e);
                    lifecycle.state = NodeState::Invalid;
                    inner.post(NodeMessage::error(Status::Fatal, e.to_string()));
                }
                return Err(e.into());
            }

            if to == NodeState::Idle && matches!(from, NodeState::Executing | NodeState::Pause) {
                for index in 0..inner.port_count() {
                    let mut port = inner.port(PortIndex(index))?;
                    inner.return_in_flight(&mut port, CompletionOutcome::Canceled);
                }
            }
            lifecycle.state = to;
            inner.post(NodeMessage::command_complete(CommandType::StateSet, to.raw()));
            from
        };
        tracing::info!("{}: {} -> {}", inner.name, from, to);

        if let Some(source) = inner.buffer_source() {
            match to {
                NodeState::Executing => source.on_executing(),
                NodeState::Idle => source.on_idle(),
                NodeState::Loaded => source.on_loaded(),
                _ => {}
            }
        }
        Ok(())
    }

    /// Run a port command on one port or, with `PortIndex::ALL`, on each in order
    fn for_ports(&self, target: PortIndex, command: CommandType) -> Result<()> {
        let inner = &self.inner;
        let lifecycle = inner.lifecycle();
        lifecycle.ensure_alive()?;

        let ports: Vec<PortIndex> = if target.is_all() {
            (0..inner.port_count()).map(PortIndex).collect()
        } else if target.0 < inner.port_count() {
            vec![target]
        } else {
            return Err(NodeError::BadPort(target));
        };

        for index in ports {
            let mut port = inner.port(index)?;
            match command {
                CommandType::Flush => {
                    inner.return_in_flight(&mut port, CompletionOutcome::Canceled);
                }
                CommandType::PortDisable => {
                    inner.return_in_flight(&mut port, CompletionOutcome::Canceled);
                    port.enabled = false;
                }
                CommandType::PortEnable => port.enabled = true,
                _ => return Err(NodeError::Unsupported(format!("{:?} on a port", command))),
            }
            inner.post(NodeMessage::command_complete(command, index.0));
        }
        Ok(())
    }
}
