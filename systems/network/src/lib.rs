#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Cable network topology cache.
//!
//! Networks are maximal sets of cable cells connected by mutual exposure:
//! two adjacent cells join only when each exposes a cable segment toward the
//! other. The cache discovers networks lazily on first query and discards a
//! network wholesale as soon as any member, or a neighbour of a member, is
//! marked dirty.

use std::collections::{HashMap, HashSet, VecDeque};

use cable_grid_core::{CapabilityLookup, Position};
use tracing::debug;

/// Identifier assigned to a discovered network.
///
/// Identifiers increase monotonically within one cache and are never reused,
/// so a rebuilt network is distinguishable from the one it replaced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetworkId(u32);

impl NetworkId {
    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Raw identifier value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

/// Connected component of cable cells.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Network {
    id: NetworkId,
    cables: HashSet<Position>,
}

impl Network {
    /// Identifier assigned when the network was discovered.
    #[must_use]
    pub const fn id(&self) -> NetworkId {
        self.id
    }

    /// Number of member cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cables.len()
    }

    /// Reports whether the network has no members. Never true for cached networks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cables.is_empty()
    }

    /// Reports whether `position` is a member cell.
    #[must_use]
    pub fn contains(&self, position: Position) -> bool {
        self.cables.contains(&position)
    }

    /// Iterates the member cells in unspecified order.
    pub fn cables(&self) -> impl Iterator<Item = Position> + '_ {
        self.cables.iter().copied()
    }
}

/// Per-world cache of discovered cable networks.
///
/// Every cable cell maps to at most one cached network. A cell missing from
/// the index is either not a cable or was invalidated and will be
/// rediscovered by the next [`NetworkCache::network_containing`] call.
#[derive(Debug)]
pub struct NetworkCache {
    position_to_network: HashMap<Position, NetworkId>,
    networks: HashMap<NetworkId, Network>,
    next_id: u32,
}

impl Default for NetworkCache {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            position_to_network: HashMap::new(),
            networks: HashMap::new(),
            next_id: 1,
        }
    }

    /// Invalidates the networks owning `position` and each of its six neighbours.
    ///
    /// Must be called whenever a cell gains or loses a cable or storage
    /// capability. Networks touching none of the seven cells stay cached.
    pub fn mark_dirty(&mut self, position: Position) {
        self.invalidate_at(position);
        for (_, neighbor) in position.neighbors() {
            self.invalidate_at(neighbor);
        }
    }

    /// Returns the network containing `position`, discovering it if needed.
    ///
    /// Returns `None` when `position` exposes no cable segment on any side.
    pub fn network_containing<L>(&mut self, lookup: &L, position: Position) -> Option<&Network>
    where
        L: CapabilityLookup + ?Sized,
    {
        if !lookup.is_cable_any_side(position) {
            return None;
        }

        if let Some(id) = self.position_to_network.get(&position).copied() {
            if self.networks.contains_key(&id) {
                return self.networks.get(&id);
            }
            let _ = self.position_to_network.remove(&position);
        }

        let id = self.rebuild_from(lookup, position);
        self.networks.get(&id)
    }

    /// Identifier of the cached network owning `position`, without discovery.
    #[must_use]
    pub fn network_id_at(&self, position: Position) -> Option<NetworkId> {
        self.position_to_network.get(&position).copied()
    }

    /// Number of networks currently cached.
    #[must_use]
    pub fn cached_networks(&self) -> usize {
        self.networks.len()
    }

    fn invalidate_at(&mut self, position: Position) {
        let Some(id) = self.position_to_network.get(&position).copied() else {
            return;
        };
        let Some(network) = self.networks.remove(&id) else {
            let _ = self.position_to_network.remove(&position);
            return;
        };

        for cable in &network.cables {
            let _ = self.position_to_network.remove(cable);
        }
        debug!(network = id.get(), members = network.len(), "network invalidated");
    }

    fn rebuild_from<L>(&mut self, lookup: &L, start: Position) -> NetworkId
    where
        L: CapabilityLookup + ?Sized,
    {
        let id = NetworkId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);

        let mut cables = HashSet::new();
        let mut queue = VecDeque::new();
        let _ = cables.insert(start);
        queue.push_back(start);

        while let Some(cell) = queue.pop_front() {
            for (direction, neighbor) in cell.neighbors() {
                if cables.contains(&neighbor) {
                    continue;
                }
                if lookup.cable(cell, direction).is_none() {
                    continue;
                }
                if lookup.cable(neighbor, direction.opposite()).is_none() {
                    continue;
                }

                let _ = cables.insert(neighbor);
                queue.push_back(neighbor);
            }
        }

        for cable in &cables {
            let _ = self.position_to_network.insert(*cable, id);
        }
        debug!(network = id.get(), members = cables.len(), "network discovered");
        let _ = self.networks.insert(id, Network { id, cables });
        id
    }
}
