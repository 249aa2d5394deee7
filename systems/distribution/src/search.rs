//! Lowest-loss path search from a cable entry point to reachable storages.

use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashMap},
};

use cable_grid_core::{CableSegment, CapabilityLookup, Direction, Position, Resistance};
use cable_grid_system_network::Network;

/// Accumulated cost of a path: additive resistance and bottleneck capacity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PathCost {
    resistance: Resistance,
    capacity: u64,
}

impl PathCost {
    /// Cost of a path that delivers nothing.
    pub const DEAD: PathCost = PathCost {
        resistance: Resistance::MAX,
        capacity: 0,
    };

    /// Creates a cost from its parts.
    #[must_use]
    pub const fn new(resistance: Resistance, capacity: u64) -> Self {
        Self {
            resistance,
            capacity,
        }
    }

    /// Cost of entering the network through `segment`; dead when absent.
    #[must_use]
    pub fn entering(segment: Option<CableSegment>) -> Self {
        segment.map_or(Self::DEAD, |segment| {
            Self::new(segment.resistance(), segment.transfer_capacity())
        })
    }

    /// Cost after additionally traversing `segment`.
    #[must_use]
    pub fn through(self, segment: CableSegment) -> Self {
        Self {
            resistance: self.resistance.saturating_add(segment.resistance()),
            capacity: self.capacity.min(segment.transfer_capacity()),
        }
    }

    /// Accumulated resistance, clamped to `0..=100`.
    #[must_use]
    pub const fn resistance(&self) -> Resistance {
        self.resistance
    }

    /// Smallest transfer capacity along the path.
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Strictly lower resistance, or equal resistance and strictly higher capacity.
    #[must_use]
    pub fn is_better_than(&self, other: &PathCost) -> bool {
        self.resistance < other.resistance
            || (self.resistance == other.resistance && self.capacity > other.capacity)
    }

    /// Service order: lower resistance first, then higher capacity.
    fn service_order(&self, other: &PathCost) -> Ordering {
        self.resistance
            .cmp(&other.resistance)
            .then_with(|| other.capacity.cmp(&self.capacity))
    }
}

/// Storage endpoint reachable through a network, with its best path cost.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Target {
    position: Position,
    side: Direction,
    cost: PathCost,
}

impl Target {
    /// Cell holding the storage.
    #[must_use]
    pub const fn position(&self) -> Position {
        self.position
    }

    /// Side of the storage facing the network.
    #[must_use]
    pub const fn side(&self) -> Direction {
        self.side
    }

    /// Best known cost of reaching the storage.
    #[must_use]
    pub const fn cost(&self) -> PathCost {
        self.cost
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Frontier {
    cost: PathCost,
    position: Position,
    side: Direction,
}

impl Ord for Frontier {
    // `BinaryHeap` pops the greatest entry, so the cheapest path compares greatest.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .service_order(&self.cost)
            .then_with(|| other.position.cmp(&self.position))
            .then_with(|| other.side.index().cmp(&self.side.index()))
    }
}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority-first path search that reuses its scratch tables between calls.
#[derive(Debug, Default)]
pub struct PathSearch {
    best: [HashMap<Position, PathCost>; 6],
    found: [HashMap<Position, PathCost>; 6],
    frontier: BinaryHeap<Frontier>,
    targets: Vec<Target>,
}

impl PathSearch {
    /// Creates a search with empty scratch tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Discovers every insertable storage reachable from `entry` through `network`.
    ///
    /// `entry_side` is the side of the entry cable facing the source. Only
    /// cells of `network` are traversed; storages adjacent to them become
    /// targets, each keyed by (cell, side) and keeping its best-cost path.
    /// The returned targets are sorted by resistance ascending, capacity
    /// descending, then position and side index.
    pub fn find_targets<L>(
        &mut self,
        lookup: &L,
        network: &Network,
        entry: Position,
        entry_side: Direction,
    ) -> &[Target]
    where
        L: CapabilityLookup + ?Sized,
    {
        self.reset();

        let start = PathCost::entering(lookup.cable(entry, entry_side));
        let _ = self.best[entry_side.index()].insert(entry, start);
        self.frontier.push(Frontier {
            cost: start,
            position: entry,
            side: entry_side,
        });

        while let Some(current) = self.frontier.pop() {
            let recorded = self.best[current.side.index()].get(&current.position);
            if recorded != Some(&current.cost) {
                continue;
            }

            for (out, neighbor) in current.position.neighbors() {
                if lookup.cable(current.position, out).is_none() {
                    continue;
                }

                let neighbor_side = out.opposite();
                let slot = neighbor_side.index();

                if network.contains(neighbor) {
                    let Some(segment) = lookup.cable(neighbor, neighbor_side) else {
                        continue;
                    };
                    let next = current.cost.through(segment);
                    if improves(&self.best[slot], neighbor, &next) {
                        let _ = self.best[slot].insert(neighbor, next);
                        self.frontier.push(Frontier {
                            cost: next,
                            position: neighbor,
                            side: neighbor_side,
                        });
                    }
                    continue;
                }

                let insertable = lookup
                    .storage(neighbor, neighbor_side)
                    .is_some_and(|storage| storage.supports_insertion());
                if insertable && improves(&self.found[slot], neighbor, &current.cost) {
                    let _ = self.found[slot].insert(neighbor, current.cost);
                }
            }
        }

        for (index, side) in Direction::ALL.into_iter().enumerate() {
            self.targets
                .extend(self.found[index].iter().map(|(position, cost)| Target {
                    position: *position,
                    side,
                    cost: *cost,
                }));
        }
        self.targets.sort_by(|left, right| {
            left.cost
                .service_order(&right.cost)
                .then_with(|| left.position.cmp(&right.position))
                .then_with(|| left.side.index().cmp(&right.side.index()))
        });

        &self.targets
    }

    fn reset(&mut self) {
        for table in self.best.iter_mut().chain(self.found.iter_mut()) {
            table.clear();
        }
        self.frontier.clear();
        self.targets.clear();
    }
}

fn improves(table: &HashMap<Position, PathCost>, key: Position, candidate: &PathCost) -> bool {
    table
        .get(&key)
        .map_or(true, |existing| candidate.is_better_than(existing))
}

#[cfg(test)]
mod tests {
    use super::{PathCost, Resistance};
    use cable_grid_core::CableSegment;

    #[test]
    fn lower_resistance_wins_over_capacity() {
        let low = PathCost::new(Resistance::clamped(5), 10);
        let high = PathCost::new(Resistance::clamped(20), 1_000);
        assert!(low.is_better_than(&high));
        assert!(!high.is_better_than(&low));
    }

    #[test]
    fn equal_resistance_prefers_capacity() {
        let wide = PathCost::new(Resistance::clamped(5), 100);
        let narrow = PathCost::new(Resistance::clamped(5), 50);
        assert!(wide.is_better_than(&narrow));
        assert!(!wide.is_better_than(&wide));
    }

    #[test]
    fn traversal_adds_resistance_and_keeps_bottleneck() {
        let start = PathCost::entering(Some(CableSegment::new(100, 30)));
        let next = start.through(CableSegment::new(40, 90));
        assert_eq!(next.resistance(), Resistance::MAX);
        assert_eq!(next.capacity(), 40);
        assert_eq!(PathCost::entering(None), PathCost::DEAD);
    }
}
