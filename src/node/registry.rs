//! Buffer registry.
//!
//! Tracks every buffer issued by a node: the port it belongs to, its backing
//! memory and who currently owns it. Ids come from a per-registry monotonic
//! counter and are never handed out twice, so a stale id can only ever miss.
//!
//! Ownership flips are the registry's only mutation besides register/release.
//! Each flip to the node stamps the entry with a fresh [`GateTicket`]; work
//! scheduled for the buffer carries that ticket and is discarded if the
//! entry's ticket has changed by the time it runs.

use crate::error::{NodeError, Result};
use crate::node::id::{BufferId, GateTicket, PortIndex};
use crate::types::BufferBacking;
use std::collections::BTreeMap;

/// Who may touch a buffer right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOwner {
    Client,
    Node,
}

/// Registry record of one buffer
#[derive(Debug, Clone)]
pub struct BufferEntry {
    pub id: BufferId,
    pub port: PortIndex,
    pub backing: BufferBacking,
    pub owner: BufferOwner,
    /// Set while the node owns the buffer
    ticket: Option<GateTicket>,
}

impl BufferEntry {
    pub fn ticket(&self) -> Option<GateTicket> {
        self.ticket
    }

    pub fn is_node_owned(&self) -> bool {
        self.owner == BufferOwner::Node
    }
}

/// What `release` hands back
#[derive(Debug)]
pub struct ReleasedBuffer {
    pub backing: BufferBacking,
    /// Ticket of the operation that was in flight, if the release was forced
    pub revoked: Option<GateTicket>,
}

/// Per-node buffer bookkeeping
#[derive(Debug)]
pub struct BufferRegistry {
    entries: BTreeMap<BufferId, BufferEntry>,
    last_id: u32,
    last_ticket: u64,
}

impl Default for BufferRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferRegistry {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            last_id: 0,
            last_ticket: 0,
        }
    }

    /// Record a new client-owned buffer and issue its id
    pub fn register(&mut self, port: PortIndex, backing: BufferBacking) -> Result<BufferId> {
        let next = self
            .last_id
            .checked_add(1)
            .ok_or_else(|| NodeError::BadValue("buffer id space exhausted".into()))?;
        self.last_id = next;
        let id = BufferId(next);
        self.entries.insert(
            id,
            BufferEntry {
                id,
                port,
                backing,
                owner: BufferOwner::Client,
                ticket: None,
            },
        );
        Ok(id)
    }

    /// Look up a buffer by id alone
    pub fn get(&self, id: BufferId) -> Result<&BufferEntry> {
        self.entries.get(&id).ok_or(NodeError::BufferNotFound(id))
    }

    /// Look up a buffer that must belong to `port`
    pub fn lookup(&self, id: BufferId, port: PortIndex) -> Result<&BufferEntry> {
        let entry = self.get(id)?;
        if entry.port != port {
            return Err(NodeError::PortMismatch {
                buffer: id,
                expected: port,
                actual: entry.port,
            });
        }
        Ok(entry)
    }

    /// Hand a client-owned buffer to the node. Returns the acceptance ticket.
    pub fn transfer_to_node(&mut self, id: BufferId, port: PortIndex) -> Result<GateTicket> {
        if self.lookup(id, port)?.owner == BufferOwner::Node {
            return Err(NodeError::InvalidState(format!(
                "buffer {} is already owned by the node",
                id
            )));
        }
        self.last_ticket += 1;
        let ticket = GateTicket(self.last_ticket);
        let entry = self.entry_mut(id)?;
        entry.owner = BufferOwner::Node;
        entry.ticket = Some(ticket);
        Ok(ticket)
    }

    /// Give a node-owned buffer back to the client. Returns the ticket it carried.
    pub fn transfer_to_client(&mut self, id: BufferId, port: PortIndex) -> Result<GateTicket> {
        self.lookup(id, port)?;
        let entry = self.entry_mut(id)?;
        if entry.owner == BufferOwner::Client {
            return Err(NodeError::InvalidState(format!(
                "buffer {} is already owned by the client",
                id
            )));
        }
        entry.owner = BufferOwner::Client;
        entry.ticket.take().ok_or_else(|| {
            NodeError::InvalidState(format!("buffer {} has no acceptance ticket", id))
        })
    }

    /// Drop a buffer's bookkeeping.
    ///
    /// A node-owned buffer is only released with `force`; the ticket of its
    /// in-flight operation is returned so the caller can revoke it.
    pub fn release(&mut self, id: BufferId, port: PortIndex, force: bool) -> Result<ReleasedBuffer> {
        let entry = self.lookup(id, port)?;
        if entry.owner == BufferOwner::Node && !force {
            return Err(NodeError::StillOwnedByNode(id));
        }
        let entry = self
            .entries
            .remove(&id)
            .ok_or(NodeError::BufferNotFound(id))?;
        Ok(ReleasedBuffer {
            backing: entry.backing,
            revoked: entry.ticket,
        })
    }

    /// Whether `ticket` is still the live operation of `id`
    pub fn is_current(&self, id: BufferId, ticket: GateTicket) -> bool {
        self.entries
            .get(&id)
            .is_some_and(|e| e.ticket == Some(ticket))
    }

    /// Node-owned buffers on `port`, in the order they were accepted
    pub fn in_flight_on(&self, port: PortIndex) -> Vec<(BufferId, GateTicket)> {
        let mut in_flight: Vec<_> = self
            .entries
            .values()
            .filter(|e| e.port == port)
            .filter_map(|e| e.ticket.map(|t| (e.id, t)))
            .collect();
        in_flight.sort_by_key(|(_, ticket)| *ticket);
        in_flight
    }

    /// Number of node-owned buffers on `port`
    pub fn in_flight_count(&self, port: PortIndex) -> usize {
        self.entries
            .values()
            .filter(|e| e.port == port && e.owner == BufferOwner::Node)
            .count()
    }

    /// Ids registered on `port`
    pub fn ids_on(&self, port: PortIndex) -> Vec<BufferId> {
        self.entries
            .values()
            .filter(|e| e.port == port)
            .map(|e| e.id)
            .collect()
    }

    /// All registered ids
    pub fn ids(&self) -> Vec<BufferId> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_mut(&mut self, id: BufferId) -> Result<&mut BufferEntry> {
        self.entries
            .get_mut(&id)
            .ok_or(NodeError::BufferNotFound(id))
    }
}
