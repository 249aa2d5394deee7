use std::collections::HashMap;

use cable_grid_core::{
    BlockEnergy, CableSegment, CapabilityLookup, Direction, EnergyStorage, Position, Storage,
};

/// Minimal host grid: per-side cable segments, one storage per cell.
#[derive(Default)]
pub struct TestGrid {
    cables: HashMap<Position, [Option<CableSegment>; 6]>,
    storages: HashMap<Position, Box<dyn Storage>>,
    energy: HashMap<Position, BlockEnergy>,
}

impl TestGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places a cable exposing the same segment on every side.
    pub fn place_cable(&mut self, position: Position, capacity: u64, resistance: i32) {
        let _ = self
            .cables
            .insert(position, [Some(CableSegment::new(capacity, resistance)); 6]);
    }

    /// Overrides (or removes) the segment a cable exposes on one side.
    pub fn place_cable_side(
        &mut self,
        position: Position,
        side: Direction,
        segment: Option<CableSegment>,
    ) {
        let sides = self.cables.entry(position).or_insert([None; 6]);
        sides[side.index()] = segment;
    }

    /// Places an in-memory storage and returns a handle onto it.
    pub fn place_machine(
        &mut self,
        position: Position,
        capacity: u64,
        amount: u64,
    ) -> EnergyStorage {
        let storage = EnergyStorage::with_amount(capacity, amount);
        self.place_storage(position, storage.clone());
        storage
    }

    pub fn place_storage(&mut self, position: Position, storage: impl Storage + 'static) {
        let _ = self.storages.insert(position, Box::new(storage));
    }

    /// Declares a block descriptor.
    #[allow(dead_code)]
    pub fn place_energy(&mut self, position: Position, energy: BlockEnergy) {
        let _ = self.energy.insert(position, energy);
    }
}

impl CapabilityLookup for TestGrid {
    fn cable(&self, position: Position, side: Direction) -> Option<CableSegment> {
        self.cables
            .get(&position)
            .and_then(|sides| sides[side.index()])
    }

    fn storage(&self, position: Position, _side: Direction) -> Option<&dyn Storage> {
        self.storages.get(&position).map(|storage| &**storage)
    }

    fn block_energy(&self, position: Position) -> Option<&BlockEnergy> {
        self.energy.get(&position)
    }
}

pub const fn at(x: i32, y: i32, z: i32) -> Position {
    Position::new(x, y, z)
}
