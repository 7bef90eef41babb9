//! Port state machine.
//!
//! Each port moves independently between `Normal`, `Adaptive` and `Tunneled`
//! modes and can be enabled or disabled. A port never looks at the buffer
//! registry itself: callers pass the number of buffers the node currently
//! owns on the port, taken under the same port lock.

use crate::config::ModeChangePolicy;
use crate::error::{NodeError, Result};
use crate::node::id::{PortIndex, SidebandHandle};
use crate::types::PortDirection;
use serde::Serialize;
use std::fmt;

/// Operating mode of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PortMode {
    #[default]
    Normal,
    /// In-place resolution changes up to the declared maximum
    Adaptive { max_width: u32, max_height: u32 },
    /// Output routed through a node-allocated sideband window
    Tunneled {
        audio_hw_sync: u32,
        sideband: SidebandHandle,
    },
}

impl PortMode {
    pub fn is_tunneled(&self) -> bool {
        matches!(self, PortMode::Tunneled { .. })
    }
}

impl fmt::Display for PortMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortMode::Normal => write!(f, "Normal"),
            PortMode::Adaptive {
                max_width,
                max_height,
            } => write!(f, "Adaptive({}x{})", max_width, max_height),
            PortMode::Tunneled { audio_hw_sync, .. } => {
                write!(f, "Tunneled(hw_sync={})", audio_hw_sync)
            }
        }
    }
}

/// Result of a mode request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeChange {
    /// The port is now in the requested mode
    Applied,
    /// Queued until the port drains
    Deferred,
    /// Already in the requested mode
    Unchanged,
}

/// What a tunnel request has to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelStep {
    /// Already tunneled with the same hw sync id
    Keep(SidebandHandle),
    /// Codec must enable tunneling, then a handle is installed
    Enable,
    /// Codec must disable tunneling, then the handle is released
    Disable,
    /// Not tunneled and nothing asked for
    Nothing,
}

/// One port of a node
#[derive(Debug, Clone, Serialize)]
pub struct Port {
    pub index: PortIndex,
    pub direction: PortDirection,
    pub enabled: bool,
    pub mode: PortMode,
    /// Mode waiting for the port to drain
    pub pending_mode: Option<PortMode>,
}

impl Port {
    pub fn new(index: PortIndex) -> Self {
        Self {
            index,
            direction: PortDirection::from_index(index.0),
            enabled: true,
            mode: PortMode::Normal,
            pending_mode: None,
        }
    }

    pub fn is_input(&self) -> bool {
        self.direction == PortDirection::Input
    }

    fn transition_error(&self, to: &PortMode) -> NodeError {
        NodeError::InvalidTransition {
            port: self.index,
            from: self.mode.to_string(),
            to: to.to_string(),
        }
    }

    /// `setPortMode`: only `Normal` and `Adaptive` are reachable this way,
    /// and never from `Tunneled`. A tunnel is entered and left only through
    /// the tunnel calls, which keep the codec and the sideband window in step.
    ///
    /// With buffers in flight the change is either queued until drain or
    /// rejected with `PortBusy`, depending on `policy`. It is never applied
    /// while the node owns buffers on the port.
    pub fn request_mode(
        &mut self,
        mode: PortMode,
        in_flight: usize,
        policy: ModeChangePolicy,
    ) -> Result<ModeChange> {
        if mode.is_tunneled() || self.mode.is_tunneled() {
            return Err(self.transition_error(&mode));
        }
        if mode == self.mode {
            self.pending_mode = None;
            return Ok(ModeChange::Unchanged);
        }
        // Out of Adaptive the only way is back to Normal
        if self.mode != PortMode::Normal && mode != PortMode::Normal {
            return Err(self.transition_error(&mode));
        }
        if in_flight == 0 {
            self.mode = mode;
            self.pending_mode = None;
            return Ok(ModeChange::Applied);
        }
        match policy {
            ModeChangePolicy::Reject => Err(NodeError::PortBusy(self.index)),
            ModeChangePolicy::DeferUntilDrain => {
                self.pending_mode = Some(mode);
                Ok(ModeChange::Deferred)
            }
        }
    }

    /// `prepareForAdaptivePlayback`. Enabling twice with the same dimensions
    /// is a no-op; any real change needs the port drained.
    pub fn set_adaptive(
        &mut self,
        enable: bool,
        max_width: u32,
        max_height: u32,
        in_flight: usize,
    ) -> Result<ModeChange> {
        let target = if enable {
            if max_width == 0 || max_height == 0 {
                return Err(NodeError::BadValue(format!(
                    "adaptive playback needs a non-zero maximum, got {}x{}",
                    max_width, max_height
                )));
            }
            PortMode::Adaptive {
                max_width,
                max_height,
            }
        } else {
            PortMode::Normal
        };

        match (self.mode, enable) {
            (current, _) if current == target => return Ok(ModeChange::Unchanged),
            (PortMode::Tunneled { .. }, true) => return Err(self.transition_error(&target)),
            (PortMode::Tunneled { .. }, false) => return Ok(ModeChange::Unchanged),
            _ => {}
        }
        if in_flight > 0 {
            return Err(NodeError::PortBusy(self.index));
        }
        self.mode = target;
        self.pending_mode = None;
        Ok(ModeChange::Applied)
    }

    /// Validate a `configureVideoTunnelMode` request before the codec is asked
    pub fn plan_tunnel(
        &self,
        tunneled: bool,
        audio_hw_sync: u32,
        in_flight: usize,
    ) -> Result<TunnelStep> {
        match (self.mode, tunneled) {
            (PortMode::Tunneled { audio_hw_sync: sync, sideband }, true) if sync == audio_hw_sync => {
                Ok(TunnelStep::Keep(sideband))
            }
            (PortMode::Tunneled { .. }, true) | (PortMode::Adaptive { .. }, true) => {
                Err(self.transition_error(&PortMode::Tunneled {
                    audio_hw_sync,
                    sideband: SidebandHandle(0),
                }))
            }
            (PortMode::Tunneled { .. }, false) if in_flight > 0 => Err(NodeError::PortBusy(self.index)),
            (PortMode::Tunneled { .. }, false) => Ok(TunnelStep::Disable),
            (_, false) => Ok(TunnelStep::Nothing),
            (PortMode::Normal, true) if in_flight > 0 => Err(NodeError::PortBusy(self.index)),
            (PortMode::Normal, true) => Ok(TunnelStep::Enable),
        }
    }

    /// Install the sideband window after the codec enabled tunneling
    pub fn enter_tunnel(&mut self, audio_hw_sync: u32, sideband: SidebandHandle) {
        self.mode = PortMode::Tunneled {
            audio_hw_sync,
            sideband,
        };
        self.pending_mode = None;
    }

    /// Leave tunneled mode, returning the released sideband window
    pub fn leave_tunnel(&mut self) -> Option<SidebandHandle> {
        match self.mode {
            PortMode::Tunneled { sideband, .. } => {
                self.mode = PortMode::Normal;
                Some(sideband)
            }
            _ => None,
        }
    }

    /// Apply a queued mode once the port has no buffers in flight
    pub fn on_drained(&mut self) -> Option<PortMode> {
        let mode = self.pending_mode.take()?;
        self.mode = mode;
        Some(mode)
    }

    /// Check that this port takes `emptyBuffer` (`fill == false`) or `fillBuffer` traffic
    pub fn check_traffic(&self, fill: bool) -> Result<()> {
        if !self.enabled {
            return Err(NodeError::InvalidState(format!("{} is disabled", self.index)));
        }
        match (fill, self.direction) {
            (false, PortDirection::Output) => Err(NodeError::InvalidState(format!(
                "emptyBuffer on output {}",
                self.index
            ))),
            (true, PortDirection::Input) => Err(NodeError::InvalidState(format!(
                "fillBuffer on input {}",
                self.index
            ))),
            (true, _) if self.mode.is_tunneled() => Err(NodeError::InvalidState(format!(
                "fillBuffer on tunneled {}",
                self.index
            ))),
            _ => Ok(()),
        }
    }
}
