//! Codec node demo - Main Entry Point
//!
//! Runs a short loopback session against the software codec and prints every
//! message the node reports, one JSON object per line.
//!
//! Usage: `codec-node [config.toml]`

use anyhow::Context;
use codec_node::node::{ChannelObserver, Fence, PortIndex};
use codec_node::types::{BufferBacking, BufferFlags, BufferRange, CommandType, NodeState, SharedMemory};
use codec_node::{Node, NodeConfig, SoftwareCodec};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const FRAMES: usize = 4;
const FRAME_SIZE: usize = 64;

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,codec_node=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => NodeConfig::load(&path).with_context(|| format!("loading {}", path))?,
        None => NodeConfig::load_or_default(),
    };
    tracing::info!(
        "Starting codec node demo ({} ports, fences {:?})",
        config.ports.count,
        config.fences.wait_mode
    );

    let (observer, messages) = ChannelObserver::new();
    let node = Node::new(
        "OMX.sw.passthrough",
        config,
        Box::new(SoftwareCodec::new("passthrough")),
        observer,
    )?;

    let input_port = PortIndex(0);
    let output_port = PortIndex(1);
    let inputs: Vec<_> = (0..FRAMES)
        .map(|i| SharedMemory::from_bytes(vec![i as u8; FRAME_SIZE]))
        .collect();
    let outputs: Vec<_> = (0..FRAMES).map(|_| SharedMemory::new(FRAME_SIZE)).collect();

    node.send_command(CommandType::StateSet, NodeState::Idle.raw())?;
    let mut input_ids = Vec::with_capacity(FRAMES);
    let mut output_ids = Vec::with_capacity(FRAMES);
    for (input, output) in inputs.iter().zip(&outputs) {
        input_ids.push(node.use_buffer(input_port, BufferBacking::Shared(input.clone()))?);
        output_ids.push(node.use_buffer(output_port, BufferBacking::Shared(output.clone()))?);
    }
    node.send_command(CommandType::StateSet, NodeState::Executing.raw())?;

    let full = BufferRange::new(0, FRAME_SIZE as u32);
    for &id in &output_ids {
        node.fill_buffer(id, full, None)?;
    }
    for (frame, &id) in input_ids.iter().enumerate() {
        // Every other frame waits on a fence signaled from another thread
        let fence = if frame % 2 == 1 {
            let (fence, signal) = Fence::new();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                signal.signal();
            });
            Some(fence)
        } else {
            None
        };
        let flags = if frame + 1 == FRAMES {
            BufferFlags::END_OF_STREAM
        } else {
            BufferFlags::NONE
        };
        node.empty_buffer(id, full, flags, frame as i64 * 33_333, fence)?;
    }

    // One empty-done and one fill-done per frame
    let received = messages.wait_for(2 * FRAMES, Duration::from_secs(2));
    for msg in &received {
        println!("{}", serde_json::to_string(msg)?);
    }

    node.send_command(CommandType::StateSet, NodeState::Idle.raw())?;
    for (&input, &output) in input_ids.iter().zip(&output_ids) {
        node.free_buffer(input_port, input)?;
        node.free_buffer(output_port, output)?;
    }
    node.send_command(CommandType::StateSet, NodeState::Loaded.raw())?;
    node.sync_observer();
    for msg in messages.drain() {
        println!("{}", serde_json::to_string(&msg)?);
    }

    let stats = node.dispatcher_stats();
    node.free_node()?;
    println!("{}", serde_json::to_string(&stats)?);
    tracing::info!("Codec node demo finished");
    Ok(())
}
