//! Aggregate view over the storages a network can fill.

use std::collections::HashSet;

use cable_grid_core::{CapabilityLookup, Direction, Position};
use cable_grid_system_network::{Network, NetworkCache};

/// Summed amount and capacity of every insertable storage attached to a network.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NetworkTotals {
    amount: u64,
    capacity: u64,
}

impl NetworkTotals {
    /// Creates totals from their parts.
    #[must_use]
    pub const fn new(amount: u64, capacity: u64) -> Self {
        Self { amount, capacity }
    }

    /// Summed stored amount.
    #[must_use]
    pub const fn amount(&self) -> u64 {
        self.amount
    }

    /// Summed capacity.
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Free space left across the network.
    #[must_use]
    pub const fn space(&self) -> u64 {
        self.capacity.saturating_sub(self.amount)
    }

    /// Reports whether the network cannot accept anything more.
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.space() == 0
    }
}

/// Totals for the network containing `any_cable`; zero when there is none.
///
/// Producers use this to pause generation once everything they feed is full.
pub fn insertable_totals<L>(
    lookup: &L,
    networks: &mut NetworkCache,
    any_cable: Position,
) -> NetworkTotals
where
    L: CapabilityLookup + ?Sized,
{
    networks
        .network_containing(lookup, any_cable)
        .map_or_else(NetworkTotals::default, |network| totals_of(lookup, network))
}

/// Totals for the network adjacent to `side` of `source`, matching the
/// entry point a distribution from that side would use.
pub fn insertable_totals_from<L>(
    lookup: &L,
    networks: &mut NetworkCache,
    source: Position,
    side: Direction,
) -> NetworkTotals
where
    L: CapabilityLookup + ?Sized,
{
    insertable_totals(lookup, networks, source.offset(side))
}

fn totals_of<L>(lookup: &L, network: &Network) -> NetworkTotals
where
    L: CapabilityLookup + ?Sized,
{
    let mut seen: [HashSet<Position>; 6] = Default::default();
    let mut totals = NetworkTotals::default();

    for cable in network.cables() {
        for (direction, neighbor) in cable.neighbors() {
            let side = direction.opposite();
            if !seen[side.index()].insert(neighbor) {
                continue;
            }
            if lookup.cable(neighbor, side).is_some() {
                continue;
            }
            if let Some(energy) = lookup.block_energy(neighbor) {
                if !energy.side_mode(side).can_insert() {
                    continue;
                }
            }
            let Some(storage) = lookup
                .storage(neighbor, side)
                .filter(|storage| storage.supports_insertion())
            else {
                continue;
            };

            let capacity = storage.capacity();
            if capacity == 0 {
                continue;
            }
            totals.capacity = totals.capacity.saturating_add(capacity);
            totals.amount = totals.amount.saturating_add(storage.amount().min(capacity));
        }
    }

    totals
}
