//! Port mode calls: `set_port_mode`, adaptive playback and video tunneling.
//!
//! Each call locks only the port it targets, so input and output ports can be
//! reconfigured concurrently.

use crate::error::{NodeError, Result};
use crate::node::id::{PortIndex, SidebandHandle};
use crate::node::instance::Node;
use crate::node::port::{ModeChange, PortMode, TunnelStep};

impl Node {
    /// Switch `port` to `Normal` or `Adaptive`.
    ///
    /// With buffers in flight the change is deferred until the port drains
    /// (a `PortSettingsChanged` event follows) or rejected with `PortBusy`,
    /// depending on `ports.mode_change`.
    pub fn set_port_mode(&self, port: PortIndex, mode: PortMode) -> Result<ModeChange> {
        let inner = &self.inner;
        let lifecycle = inner.lifecycle();
        lifecycle.ensure_alive()?;
        if matches!(mode, PortMode::Adaptive { .. }) && !inner.capabilities.adaptive_playback {
            return Err(NodeError::Unsupported("adaptive playback".into()));
        }

        let mut guard = inner.port(port)?;
        let in_flight = inner.registry().in_flight_count(port);
        let policy = inner.config.ports.mode_change;
        let change = guard.request_mode(mode, in_flight, policy).map_err(|e| {
            tracing::warn!("{}: setPortMode({}, {}) rejected: {}", inner.name, port, mode, e);
            e
        })?;
        match change {
            ModeChange::Deferred => tracing::info!(
                "{}: {} busy ({} in flight), {} deferred until drain",
                inner.name,
                port,
                in_flight,
                mode
            ),
            ModeChange::Applied => tracing::info!("{}: {} mode is now {}", inner.name, port, mode),
            ModeChange::Unchanged => {}
        }
        Ok(change)
    }

    /// Enable or disable adaptive playback on `port`. Idempotent.
    pub fn prepare_for_adaptive_playback(
        &self,
        port: PortIndex,
        enable: bool,
        max_width: u32,
        max_height: u32,
    ) -> Result<()> {
        let inner = &self.inner;
        let lifecycle = inner.lifecycle();
        lifecycle.ensure_alive()?;
        if enable && !inner.capabilities.adaptive_playback {
            return Err(NodeError::Unsupported("adaptive playback".into()));
        }

        let mut guard = inner.port(port)?;
        let in_flight = inner.registry().in_flight_count(port);
        if guard.set_adaptive(enable, max_width, max_height, in_flight)? == ModeChange::Applied {
            tracing::info!("{}: {} mode is now {}", inner.name, port, guard.mode);
        }
        Ok(())
    }

    /// Enable or disable tunneled playback on `port`.
    ///
    /// Enabling returns the node-allocated sideband window handle; disabling
    /// releases it and returns `None`. Fails with `Unsupported`, leaving the
    /// port untouched, when the codec cannot tunnel.
    pub fn configure_video_tunnel_mode(
        &self,
        port: PortIndex,
        tunneled: bool,
        audio_hw_sync: u32,
    ) -> Result<Option<SidebandHandle>> {
        let inner = &self.inner;
        let result = {
            let lifecycle = inner.lifecycle();
            lifecycle.ensure_alive()?;
            let mut guard = inner.port(port)?;
            if !inner.capabilities.tunneled_playback {
                return Err(NodeError::Unsupported("tunneled playback".into()));
            }

            let in_flight = inner.registry().in_flight_count(port);
            match guard.plan_tunnel(tunneled, audio_hw_sync, in_flight)? {
                TunnelStep::Keep(handle) => Ok(Some(handle)),
                TunnelStep::Nothing => Ok(None),
                TunnelStep::Enable => inner
                    .codec()
                    .configure_tunnel(port, Some(audio_hw_sync))
                    .map_err(NodeError::from)
                    .map(|()| {
                        let handle = inner.next_sideband();
                        guard.enter_tunnel(audio_hw_sync, handle);
                        tracing::info!(
                            "{}: {} tunneled (hw sync {}), sideband {:?}",
                            inner.name,
                            port,
                            audio_hw_sync,
                            handle
                        );
                        Some(handle)
                    }),
                TunnelStep::Disable => inner
                    .codec()
                    .configure_tunnel(port, None)
                    .map_err(NodeError::from)
                    .map(|()| {
                        if let Some(handle) = guard.leave_tunnel() {
                            tracing::info!("{}: {} untunneled, released {:?}", inner.name, port, handle);
                        }
                        None
                    }),
            }
        };
        inner.check_fatal(result)
    }
}
