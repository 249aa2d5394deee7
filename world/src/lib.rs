#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Authoritative world state for the cable grid.
//!
//! The world owns a sparse grid of cable and machine blocks, the network
//! cache discovered over it and the persisted energy records of its
//! machines. It is mutated exclusively through [`apply`] and observed
//! through the functions in [`query`]. A world is single-threaded; separate
//! worlds share nothing and may live on separate threads.

use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
    rc::Rc,
};

use cable_grid_core::{
    transfer, BlockEnergy, CableSegment, CapabilityLookup, Command, Direction, EnergyRecord,
    EnergyStorage, EnergyStorageBuilder, Event, PlacementError, Position, Sides, Storage,
    StorageError, StorageSettings, DEFAULT_RECORD_KEY,
};
use cable_grid_system_distribution::Distributor;
use cable_grid_system_network::NetworkCache;
use tracing::debug;

/// Block occupying a single grid cell.
#[derive(Debug)]
enum Block {
    Cable {
        segment: CableSegment,
        sides: Sides,
    },
    Machine {
        storage: EnergyStorage,
        energy: BlockEnergy,
    },
}

/// Sparse grid of blocks exposing their capabilities.
#[derive(Debug, Default)]
pub struct Grid {
    blocks: HashMap<Position, Block>,
}

impl Grid {
    /// Number of occupied cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Reports whether no cell is occupied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Reports whether `position` holds a block.
    #[must_use]
    pub fn is_occupied(&self, position: Position) -> bool {
        self.blocks.contains_key(&position)
    }
}

impl CapabilityLookup for Grid {
    fn cable(&self, position: Position, side: Direction) -> Option<CableSegment> {
        match self.blocks.get(&position)? {
            Block::Cable { segment, sides } if sides.contains(side) => Some(*segment),
            _ => None,
        }
    }

    fn storage(&self, position: Position, _side: Direction) -> Option<&dyn Storage> {
        match self.blocks.get(&position)? {
            Block::Machine { storage, .. } => Some(storage),
            Block::Cable { .. } => None,
        }
    }

    fn block_energy(&self, position: Position) -> Option<&BlockEnergy> {
        match self.blocks.get(&position)? {
            Block::Machine { energy, .. } => Some(energy),
            Block::Cable { .. } => None,
        }
    }
}

/// Represents the authoritative cable grid world state.
#[derive(Debug, Default)]
pub struct World {
    grid: Grid,
    networks: NetworkCache,
    distributor: Distributor,
    records: BTreeMap<Position, Rc<RefCell<EnergyRecord>>>,
}

impl World {
    /// Creates an empty world.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty world whose machines, once placed, resume from `records`.
    #[must_use]
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = (Position, EnergyRecord)>,
    {
        let mut world = Self::new();
        for (position, record) in records {
            let _ = world
                .records
                .insert(position, Rc::new(RefCell::new(record)));
        }
        world
    }

    fn place(&mut self, position: Position, block: Block, out_events: &mut Vec<Event>) {
        let _ = self.grid.blocks.insert(position, block);
        self.networks.mark_dirty(position);
        out_events.push(Event::BlockPlaced { position });
    }

    fn build_storage(
        &mut self,
        position: Position,
        settings: &StorageSettings,
    ) -> Result<EnergyStorage, StorageError> {
        let builder = EnergyStorageBuilder::from_settings(settings)?;
        let record = Rc::clone(self.records.entry(position).or_default());
        Ok(builder.persist_to(record, DEFAULT_RECORD_KEY).build())
    }

    fn machine_storage(&self, position: Position, side: Direction) -> Option<&dyn Storage> {
        self.grid.storage(position, side)
    }
}

/// Applies the provided command to the world, mutating state deterministically.
pub fn apply(world: &mut World, command: Command, out_events: &mut Vec<Event>) {
    match command {
        Command::PlaceCable {
            position,
            segment,
            sides,
        } => {
            if world.grid.is_occupied(position) {
                reject(position, PlacementError::Occupied, out_events);
                return;
            }
            world.place(position, Block::Cable { segment, sides }, out_events);
        }
        Command::PlaceMachine {
            position,
            storage,
            energy,
        } => {
            if world.grid.is_occupied(position) {
                reject(position, PlacementError::Occupied, out_events);
                return;
            }
            match world.build_storage(position, &storage) {
                Ok(storage) => world.place(position, Block::Machine { storage, energy }, out_events),
                Err(error) => reject(position, PlacementError::InvalidStorage(error), out_events),
            }
        }
        Command::RemoveBlock { position } => {
            if world.grid.blocks.remove(&position).is_none() {
                out_events.push(Event::RemovalRejected { position });
                return;
            }
            let _ = world.records.remove(&position);
            world.networks.mark_dirty(position);
            out_events.push(Event::BlockRemoved { position });
        }
        Command::Generate {
            position,
            side,
            amount,
        } => {
            let inserted = world
                .machine_storage(position, side)
                .map_or(0, |storage| transfer::generate_to(storage, amount, false));
            out_events.push(Event::EnergyGenerated {
                position,
                amount: inserted,
            });
        }
        Command::Distribute {
            source,
            side,
            max_extract,
            simulate,
        } => {
            let extracted = world.distributor.distribute_from(
                &world.grid,
                &mut world.networks,
                source,
                side,
                max_extract,
                simulate,
            );
            out_events.push(Event::EnergyDistributed {
                source,
                side,
                extracted,
                simulated: simulate,
            });
        }
        Command::Transfer {
            from,
            from_side,
            to,
            to_side,
            max_amount,
            simulate,
        } => {
            let moved = match (
                world.machine_storage(from, from_side),
                world.machine_storage(to, to_side),
            ) {
                (Some(source), Some(receiver)) => {
                    transfer::transfer(source, receiver, max_amount, simulate)
                }
                _ => 0,
            };
            out_events.push(Event::EnergyTransferred {
                from,
                to,
                amount: moved,
            });
        }
        Command::Consume {
            position,
            side,
            amount,
            simulate,
        } => {
            let consumed = world
                .machine_storage(position, side)
                .is_some_and(|storage| transfer::consume_exact(storage, amount, simulate));
            out_events.push(Event::EnergyConsumed {
                position,
                amount,
                consumed,
            });
        }
    }
}

fn reject(position: Position, reason: PlacementError, out_events: &mut Vec<Event>) {
    debug!(?position, ?reason, "placement rejected");
    out_events.push(Event::PlacementRejected { position, reason });
}

/// Query functions that provide read-only access to the world state.
pub mod query {
    use cable_grid_core::{BlockEnergy, CapabilityLookup, Direction, EnergyRecord, Position};
    use cable_grid_system_distribution::{self as distribution, NetworkTotals};
    use cable_grid_system_network::Network;

    use super::{Grid, World};

    /// Provides read-only access to the block grid.
    #[must_use]
    pub fn grid(world: &World) -> &Grid {
        &world.grid
    }

    /// Stored amount of the machine at `position` addressed through `side`.
    #[must_use]
    pub fn storage_amount(world: &World, position: Position, side: Direction) -> Option<u64> {
        world
            .grid
            .storage(position, side)
            .map(|storage| storage.amount())
    }

    /// Block descriptor of the machine at `position`.
    #[must_use]
    pub fn block_energy(world: &World, position: Position) -> Option<&BlockEnergy> {
        world.grid.block_energy(position)
    }

    /// Network containing the cable at `position`, discovering it if needed.
    ///
    /// Takes the world mutably because discovery populates the network cache.
    pub fn network_containing(world: &mut World, position: Position) -> Option<&Network> {
        world.networks.network_containing(&world.grid, position)
    }

    /// Insertable totals of the network a distribution from `side` of `source` would use.
    pub fn insertable_totals_from(
        world: &mut World,
        source: Position,
        side: Direction,
    ) -> NetworkTotals {
        distribution::insertable_totals_from(&world.grid, &mut world.networks, source, side)
    }

    /// Persisted record of the machine at `position`, as of the last commit.
    #[must_use]
    pub fn record(world: &World, position: Position) -> Option<EnergyRecord> {
        world
            .records
            .get(&position)
            .map(|record| record.borrow().clone())
    }

    /// Every persisted record ordered by position.
    #[must_use]
    pub fn records(world: &World) -> Vec<(Position, EnergyRecord)> {
        world
            .records
            .iter()
            .map(|(position, record)| (*position, record.borrow().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(position: Position, capacity: i64, amount: i64) -> Command {
        Command::PlaceMachine {
            position,
            storage: StorageSettings {
                amount,
                ..StorageSettings::with_capacity(capacity)
            },
            energy: BlockEnergy::new(u64::try_from(capacity).unwrap_or(0)),
        }
    }

    fn cable(position: Position, capacity: u64, resistance: i32) -> Command {
        Command::PlaceCable {
            position,
            segment: CableSegment::new(capacity, resistance),
            sides: Sides::ALL,
        }
    }

    fn at(x: i32) -> Position {
        Position::new(x, 0, 0)
    }

    fn line_world() -> World {
        let mut world = World::new();
        let mut events = Vec::new();
        for command in [
            machine(at(0), 1_000, 500),
            cable(at(1), 100, 0),
            cable(at(2), 50, 10),
            machine(at(3), 1_000, 0),
        ] {
            apply(&mut world, command, &mut events);
        }
        assert_eq!(events.len(), 4);
        world
    }

    #[test]
    fn placement_rejects_occupied_cells_and_bad_settings() {
        let mut world = World::new();
        let mut events = Vec::new();

        apply(&mut world, cable(at(0), 10, 0), &mut events);
        apply(&mut world, machine(at(0), 10, 0), &mut events);
        apply(&mut world, machine(at(1), -5, 0), &mut events);

        assert_eq!(
            events,
            vec![
                Event::BlockPlaced { position: at(0) },
                Event::PlacementRejected {
                    position: at(0),
                    reason: PlacementError::Occupied,
                },
                Event::PlacementRejected {
                    position: at(1),
                    reason: PlacementError::InvalidStorage(StorageError::NegativeCapacity(-5)),
                },
            ]
        );
        assert_eq!(query::grid(&world).len(), 1);
    }

    #[test]
    fn distribution_moves_energy_and_persists_records() {
        let mut world = line_world();
        let mut events = Vec::new();

        apply(
            &mut world,
            Command::Distribute {
                source: at(0),
                side: Direction::East,
                max_extract: 80,
                simulate: false,
            },
            &mut events,
        );

        assert_eq!(
            events,
            vec![Event::EnergyDistributed {
                source: at(0),
                side: Direction::East,
                extracted: 50,
                simulated: false,
            }]
        );
        assert_eq!(query::storage_amount(&world, at(3), Direction::West), Some(45));
        let record = query::record(&world, at(3)).expect("machine has a record");
        assert_eq!(record.get(DEFAULT_RECORD_KEY), Some(45));
        let source = query::record(&world, at(0)).expect("machine has a record");
        assert_eq!(source.get(DEFAULT_RECORD_KEY), Some(450));
    }

    #[test]
    fn simulated_distribution_leaves_records_untouched() {
        let mut world = line_world();
        let mut events = Vec::new();

        apply(
            &mut world,
            Command::Distribute {
                source: at(0),
                side: Direction::East,
                max_extract: 80,
                simulate: true,
            },
            &mut events,
        );

        assert!(matches!(
            events.as_slice(),
            [Event::EnergyDistributed { extracted: 50, simulated: true, .. }]
        ));
        assert_eq!(query::storage_amount(&world, at(0), Direction::East), Some(500));
        assert_eq!(query::storage_amount(&world, at(3), Direction::West), Some(0));
        let record = query::record(&world, at(3)).expect("machine has a record");
        assert_eq!(record.get(DEFAULT_RECORD_KEY), None);
    }

    #[test]
    fn removing_a_cable_invalidates_its_network() {
        let mut world = line_world();
        let mut events = Vec::new();
        let before = query::network_containing(&mut world, at(1)).map(|network| network.len());
        assert_eq!(before, Some(2));

        apply(&mut world, Command::RemoveBlock { position: at(2) }, &mut events);
        apply(&mut world, Command::RemoveBlock { position: at(2) }, &mut events);
        assert_eq!(
            events,
            vec![
                Event::BlockRemoved { position: at(2) },
                Event::RemovalRejected { position: at(2) },
            ]
        );

        let after = query::network_containing(&mut world, at(1)).map(|network| network.len());
        assert_eq!(after, Some(1));
        let totals = query::insertable_totals_from(&mut world, at(0), Direction::East);
        assert_eq!(totals.capacity(), 1_000, "only the source borders the cut network");
    }

    #[test]
    fn direct_transfer_and_consumption() {
        let mut world = World::new();
        let mut events = Vec::new();
        apply(&mut world, machine(at(0), 100, 60), &mut events);
        apply(&mut world, machine(at(5), 30, 0), &mut events);
        events.clear();

        apply(
            &mut world,
            Command::Transfer {
                from: at(0),
                from_side: Direction::East,
                to: at(5),
                to_side: Direction::West,
                max_amount: 50,
                simulate: false,
            },
            &mut events,
        );
        apply(
            &mut world,
            Command::Consume {
                position: at(0),
                side: Direction::Up,
                amount: 40,
                simulate: false,
            },
            &mut events,
        );
        apply(
            &mut world,
            Command::Consume {
                position: at(0),
                side: Direction::Up,
                amount: 30,
                simulate: false,
            },
            &mut events,
        );

        assert_eq!(
            events,
            vec![
                Event::EnergyTransferred {
                    from: at(0),
                    to: at(5),
                    amount: 30,
                },
                Event::EnergyConsumed {
                    position: at(0),
                    amount: 40,
                    consumed: false,
                },
                Event::EnergyConsumed {
                    position: at(0),
                    amount: 30,
                    consumed: true,
                },
            ]
        );
        assert_eq!(query::storage_amount(&world, at(0), Direction::Up), Some(0));
        assert_eq!(query::storage_amount(&world, at(5), Direction::Up), Some(30));
    }

    #[test]
    fn generation_fills_up_to_capacity() {
        let mut world = World::new();
        let mut events = Vec::new();
        apply(&mut world, machine(at(0), 100, 90), &mut events);
        events.clear();

        apply(
            &mut world,
            Command::Generate {
                position: at(0),
                side: Direction::Up,
                amount: 25,
            },
            &mut events,
        );
        apply(
            &mut world,
            Command::Generate {
                position: at(9),
                side: Direction::Up,
                amount: 25,
            },
            &mut events,
        );

        assert_eq!(
            events,
            vec![
                Event::EnergyGenerated {
                    position: at(0),
                    amount: 10,
                },
                Event::EnergyGenerated {
                    position: at(9),
                    amount: 0,
                },
            ]
        );
    }

    #[test]
    fn machines_resume_from_saved_records() {
        let mut world = line_world();
        let mut events = Vec::new();
        apply(
            &mut world,
            Command::Distribute {
                source: at(0),
                side: Direction::East,
                max_extract: 80,
                simulate: false,
            },
            &mut events,
        );
        let saved = query::records(&world);
        assert_eq!(saved.len(), 2);

        let mut restored = World::from_records(saved);
        apply(&mut restored, machine(at(3), 1_000, 0), &mut events);
        apply(&mut restored, machine(at(0), 100, 0), &mut events);

        assert_eq!(query::storage_amount(&restored, at(3), Direction::West), Some(45));
        // Persisted amounts are clamped into the new capacity.
        assert_eq!(query::storage_amount(&restored, at(0), Direction::East), Some(100));
    }

    #[test]
    fn high_lines_distribute_and_stay_apart_from_low_ones() {
        let lifted = |x: i32| Position::new(x, 3_000, 0);
        let mut world = World::new();
        let mut events = Vec::new();
        for command in [
            machine(lifted(0), 1_000, 500),
            cable(lifted(1), 100, 0),
            machine(lifted(2), 1_000, 0),
            cable(Position::new(0, 0, 0), 100, 0),
            cable(Position::new(0, 4_096, 0), 100, 0),
        ] {
            apply(&mut world, command, &mut events);
        }
        events.clear();

        apply(
            &mut world,
            Command::Distribute {
                source: lifted(0),
                side: Direction::East,
                max_extract: 80,
                simulate: false,
            },
            &mut events,
        );

        assert!(matches!(
            events.as_slice(),
            [Event::EnergyDistributed { extracted: 80, .. }]
        ));
        assert_eq!(query::storage_amount(&world, lifted(2), Direction::West), Some(80));
        assert_eq!(query::storage_amount(&world, lifted(0), Direction::East), Some(420));

        let low = query::network_containing(&mut world, Position::new(0, 0, 0))
            .map(|network| network.id());
        let high = query::network_containing(&mut world, Position::new(0, 4_096, 0))
            .map(|network| network.id());
        assert!(low.is_some() && high.is_some());
        assert_ne!(low, high);
    }

    #[test]
    fn independent_worlds_run_on_separate_threads() {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                std::thread::spawn(|| {
                    let mut world = line_world();
                    let mut events = Vec::new();
                    apply(
                        &mut world,
                        Command::Distribute {
                            source: at(0),
                            side: Direction::East,
                            max_extract: 80,
                            simulate: false,
                        },
                        &mut events,
                    );
                    query::storage_amount(&world, at(3), Direction::West)
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().expect("world thread completes"), Some(45));
        }
    }
}
