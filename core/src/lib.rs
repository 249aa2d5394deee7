#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Core contracts shared across the cable grid engine.
//!
//! This crate defines the vocabulary every other crate speaks: grid
//! [`Position`] and [`Direction`] values, the capabilities a grid cell may
//! expose ([`CableSegment`], [`Storage`], [`BlockEnergy`]), the
//! [`Transaction`] protocol that makes every storage mutation reversible, and
//! the [`Command`]/[`Event`] surface the authoritative world speaks. Systems
//! query capabilities exclusively through [`CapabilityLookup`] and never
//! register anything themselves.

use serde::{Deserialize, Serialize};

mod storage;
mod transaction;
pub mod transfer;

pub use storage::{
    EnergyRecord, EnergyStorage, EnergyStorageBuilder, Storage, StorageError, StorageSettings,
    DEFAULT_RECORD_KEY,
};
pub use transaction::{SnapshotParticipant, Transaction};

/// Commands that express all permissible world mutations.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Places a cable block at the provided position.
    PlaceCable {
        /// Cell that receives the cable.
        position: Position,
        /// Transfer characteristics exposed on every open side.
        segment: CableSegment,
        /// Sides on which the cable exposes itself to neighbours.
        sides: Sides,
    },
    /// Places a machine block that owns an energy storage.
    PlaceMachine {
        /// Cell that receives the machine.
        position: Position,
        /// Storage parameters as they arrive from external configuration.
        storage: StorageSettings,
        /// Block descriptor controlling per-side IO and reported metadata.
        energy: BlockEnergy,
    },
    /// Removes whatever block occupies the provided position.
    RemoveBlock {
        /// Cell that should be cleared.
        position: Position,
    },
    /// Inserts freshly generated energy into a machine's storage.
    Generate {
        /// Machine receiving the energy.
        position: Position,
        /// Side through which the storage is addressed.
        side: Direction,
        /// Amount the producer decided to generate.
        amount: u64,
    },
    /// Pushes energy from a machine through the adjacent cable network.
    Distribute {
        /// Machine supplying the energy.
        source: Position,
        /// Side of the source facing the first cable.
        side: Direction,
        /// Upper bound of energy extracted from the source before losses.
        max_extract: u64,
        /// When set, the distribution is computed and rolled back.
        simulate: bool,
    },
    /// Moves energy directly between two machine storages.
    Transfer {
        /// Machine supplying the energy.
        from: Position,
        /// Side through which the supplying storage is addressed.
        from_side: Direction,
        /// Machine receiving the energy.
        to: Position,
        /// Side through which the receiving storage is addressed.
        to_side: Direction,
        /// Upper bound of energy moved.
        max_amount: u64,
        /// When set, the transfer is computed and rolled back.
        simulate: bool,
    },
    /// Spends an exact amount of energy from a machine, or nothing at all.
    Consume {
        /// Machine paying the cost.
        position: Position,
        /// Side through which the storage is addressed.
        side: Direction,
        /// Exact amount that must be available.
        amount: u64,
        /// When set, the consumption is checked and rolled back.
        simulate: bool,
    },
}

/// Events broadcast by the world after processing commands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// Confirms that a block was placed into the world.
    BlockPlaced {
        /// Cell now occupied by the block.
        position: Position,
    },
    /// Reports that a placement request was rejected.
    PlacementRejected {
        /// Cell named by the rejected request.
        position: Position,
        /// Specific reason the placement failed.
        reason: PlacementError,
    },
    /// Confirms that a block was removed from the world.
    BlockRemoved {
        /// Cell that was cleared.
        position: Position,
    },
    /// Reports that a removal request named an empty cell.
    RemovalRejected {
        /// Cell named by the rejected request.
        position: Position,
    },
    /// Reports how much generated energy a machine accepted.
    EnergyGenerated {
        /// Machine that received the energy.
        position: Position,
        /// Amount actually inserted.
        amount: u64,
    },
    /// Reports the outcome of a network distribution.
    EnergyDistributed {
        /// Machine that supplied the energy.
        source: Position,
        /// Side of the source facing the network.
        side: Direction,
        /// Energy extracted from the source before losses.
        extracted: u64,
        /// Indicates whether the distribution was rolled back.
        simulated: bool,
    },
    /// Reports the outcome of a direct transfer.
    EnergyTransferred {
        /// Machine that supplied the energy.
        from: Position,
        /// Machine that received the energy.
        to: Position,
        /// Amount inserted into the receiver.
        amount: u64,
    },
    /// Reports the outcome of an exact consumption request.
    EnergyConsumed {
        /// Machine that was charged.
        position: Position,
        /// Amount requested.
        amount: u64,
        /// Indicates whether the full amount was available.
        consumed: bool,
    },
}

/// Reasons a placement request may be rejected by the world.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlacementError {
    /// The requested cell already holds a block.
    Occupied,
    /// The storage settings failed validation.
    InvalidStorage(StorageError),
}

/// Location of a single grid cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    x: i32,
    y: i32,
    z: i32,
}

const PACKED_XZ_BITS: u32 = 26;
const PACKED_Y_BITS: u32 = 12;
const PACKED_X_SHIFT: u32 = PACKED_Y_BITS + PACKED_XZ_BITS;
const PACKED_Z_SHIFT: u32 = PACKED_Y_BITS;
const PACKED_XZ_MASK: i64 = (1 << PACKED_XZ_BITS) - 1;
const PACKED_Y_MASK: i64 = (1 << PACKED_Y_BITS) - 1;

impl Position {
    /// Creates a new grid position.
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// East-west coordinate.
    #[must_use]
    pub const fn x(&self) -> i32 {
        self.x
    }

    /// Vertical coordinate.
    #[must_use]
    pub const fn y(&self) -> i32 {
        self.y
    }

    /// North-south coordinate.
    #[must_use]
    pub const fn z(&self) -> i32 {
        self.z
    }

    /// Returns the adjacent position one step toward `direction`.
    #[must_use]
    pub const fn offset(self, direction: Direction) -> Self {
        let (dx, dy, dz) = direction.vector();
        Self {
            x: self.x.wrapping_add(dx),
            y: self.y.wrapping_add(dy),
            z: self.z.wrapping_add(dz),
        }
    }

    /// Iterates the six face neighbours together with the direction leading to each.
    pub fn neighbors(self) -> impl Iterator<Item = (Direction, Position)> {
        Direction::ALL
            .into_iter()
            .map(move |direction| (direction, self.offset(direction)))
    }

    /// Packs the position into a stable 64-bit key.
    ///
    /// The layout stores 26 bits of `x`, 26 bits of `z` and 12 bits of `y` in
    /// two's complement. Returns `None` for positions outside
    /// `-2^25..2^25` on `x`/`z` or `-2048..2048` on `y`, which would alias.
    /// Grid caches key by [`Position`] itself and never depend on this.
    #[must_use]
    pub const fn pack(&self) -> Option<u64> {
        if !fits(self.x, PACKED_XZ_BITS)
            || !fits(self.z, PACKED_XZ_BITS)
            || !fits(self.y, PACKED_Y_BITS)
        {
            return None;
        }
        let x = (self.x as i64 & PACKED_XZ_MASK) << PACKED_X_SHIFT;
        let z = (self.z as i64 & PACKED_XZ_MASK) << PACKED_Z_SHIFT;
        let y = self.y as i64 & PACKED_Y_MASK;
        Some((x | z | y) as u64)
    }

    /// Restores a position from a key produced by [`Position::pack`].
    #[must_use]
    pub const fn unpack(packed: u64) -> Self {
        let value = packed as i64;
        let x = value >> PACKED_X_SHIFT;
        let z = (value << PACKED_XZ_BITS) >> (PACKED_XZ_BITS + PACKED_Y_BITS);
        let y = (value << (64 - PACKED_Y_BITS)) >> (64 - PACKED_Y_BITS);
        Self {
            x: x as i32,
            y: y as i32,
            z: z as i32,
        }
    }
}

const fn fits(value: i32, bits: u32) -> bool {
    let half = 1i64 << (bits - 1);
    let value = value as i64;
    value >= -half && value < half
}

/// Axis-aligned unit directions between face-adjacent cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Toward decreasing `y`.
    Down,
    /// Toward increasing `y`.
    Up,
    /// Toward decreasing `z`.
    North,
    /// Toward increasing `z`.
    South,
    /// Toward decreasing `x`.
    West,
    /// Toward increasing `x`.
    East,
}

impl Direction {
    /// Every direction ordered by [`Direction::index`].
    pub const ALL: [Direction; 6] = [
        Self::Down,
        Self::Up,
        Self::North,
        Self::South,
        Self::West,
        Self::East,
    ];

    /// Stable index in `0..6` used for per-direction tables.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Down => 0,
            Self::Up => 1,
            Self::North => 2,
            Self::South => 3,
            Self::West => 4,
            Self::East => 5,
        }
    }

    /// Direction pointing the other way along the same axis.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Down => Self::Up,
            Self::Up => Self::Down,
            Self::North => Self::South,
            Self::South => Self::North,
            Self::West => Self::East,
            Self::East => Self::West,
        }
    }

    /// Unit offset `(dx, dy, dz)` for one step in this direction.
    #[must_use]
    pub const fn vector(self) -> (i32, i32, i32) {
        match self {
            Self::Down => (0, -1, 0),
            Self::Up => (0, 1, 0),
            Self::North => (0, 0, -1),
            Self::South => (0, 0, 1),
            Self::West => (-1, 0, 0),
            Self::East => (1, 0, 0),
        }
    }
}

/// Set of sides on which a block exposes a capability.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Sides(u8);

impl Sides {
    /// No side is exposed.
    pub const NONE: Sides = Sides(0);
    /// Every side is exposed.
    pub const ALL: Sides = Sides(0b11_1111);

    /// Builds a set from the provided directions.
    #[must_use]
    pub fn only(directions: &[Direction]) -> Self {
        directions
            .iter()
            .fold(Self::NONE, |sides, direction| sides.with(*direction))
    }

    /// Returns the set extended with `direction`.
    #[must_use]
    pub const fn with(self, direction: Direction) -> Self {
        Self(self.0 | (1 << direction.index()))
    }

    /// Returns the set without `direction`.
    #[must_use]
    pub const fn without(self, direction: Direction) -> Self {
        Self(self.0 & !(1 << direction.index()))
    }

    /// Reports whether `direction` belongs to the set.
    #[must_use]
    pub const fn contains(self, direction: Direction) -> bool {
        self.0 & (1 << direction.index()) != 0
    }
}

/// Directional IO mode declared by a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SideMode {
    /// Neither insertion nor extraction.
    None,
    /// Insertion only.
    In,
    /// Extraction only.
    Out,
    /// Insertion and extraction.
    #[default]
    Both,
}

impl SideMode {
    /// Reports whether energy may enter through this side.
    #[must_use]
    pub const fn can_insert(self) -> bool {
        matches!(self, Self::In | Self::Both)
    }

    /// Reports whether energy may leave through this side.
    #[must_use]
    pub const fn can_extract(self) -> bool {
        matches!(self, Self::Out | Self::Both)
    }
}

/// Optional block descriptor: declared capacity, per-side IO modes and
/// reported generation rate.
///
/// The descriptor is metadata only; the actual energy lives in the block's
/// [`Storage`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockEnergy {
    declared_capacity: u64,
    side_modes: [SideMode; 6],
    generation_rate: u64,
}

impl BlockEnergy {
    /// Creates a descriptor with every side in [`SideMode::Both`].
    #[must_use]
    pub const fn new(declared_capacity: u64) -> Self {
        Self {
            declared_capacity,
            side_modes: [SideMode::Both; 6],
            generation_rate: 0,
        }
    }

    /// Returns the descriptor with `side` switched to `mode`.
    #[must_use]
    pub fn with_side_mode(mut self, side: Direction, mode: SideMode) -> Self {
        self.side_modes[side.index()] = mode;
        self
    }

    /// Returns the descriptor reporting `rate` units generated per tick.
    #[must_use]
    pub fn with_generation_rate(mut self, rate: u64) -> Self {
        self.generation_rate = rate;
        self
    }

    /// Declared storage capacity, or zero when the block stores nothing.
    #[must_use]
    pub const fn declared_capacity(&self) -> u64 {
        self.declared_capacity
    }

    /// IO mode of the provided side.
    #[must_use]
    pub const fn side_mode(&self, side: Direction) -> SideMode {
        self.side_modes[side.index()]
    }

    /// Reported generation rate in units per tick.
    #[must_use]
    pub const fn generation_rate(&self) -> u64 {
        self.generation_rate
    }
}

/// Percentage loss in `0..=100` applied when energy crosses a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Resistance(u8);

impl Resistance {
    /// Lossless transfer.
    pub const ZERO: Resistance = Resistance(0);
    /// Total loss; nothing arrives.
    pub const MAX: Resistance = Resistance(100);

    /// Clamps an arbitrary percentage into `0..=100`.
    #[must_use]
    pub const fn clamped(percent: i32) -> Self {
        if percent <= 0 {
            Self::ZERO
        } else if percent >= 100 {
            Self::MAX
        } else {
            Self(percent as u8)
        }
    }

    /// Percentage in `0..=100`.
    #[must_use]
    pub const fn percent(self) -> u8 {
        self.0
    }

    /// Adds two resistances, clamping the sum at 100.
    #[must_use]
    pub const fn saturating_add(self, other: Resistance) -> Self {
        let sum = self.0 as u16 + other.0 as u16;
        if sum >= 100 {
            Self::MAX
        } else {
            Self(sum as u8)
        }
    }

    /// Energy delivered after sending `sent`: `floor(sent * (100 - r) / 100)`.
    #[must_use]
    pub fn apply(self, sent: u64) -> u64 {
        if sent == 0 || self >= Self::MAX {
            return 0;
        }
        let kept = u128::from(100 - self.0);
        // Never exceeds `sent`, so the narrowing cannot fail.
        u64::try_from(u128::from(sent) * kept / 100).unwrap_or(sent)
    }

    /// Smallest amount to send so that [`Resistance::apply`] yields at least
    /// `delivered`: `ceil(delivered * 100 / (100 - r))`.
    ///
    /// Returns `u64::MAX` at full resistance since no finite amount suffices.
    #[must_use]
    pub fn inverse_ceil(self, delivered: u64) -> u64 {
        if delivered == 0 {
            return 0;
        }
        if self >= Self::MAX {
            return u64::MAX;
        }
        let kept = u128::from(100 - self.0);
        let scaled = u128::from(delivered) * 100;
        u64::try_from((scaled + kept - 1) / kept).unwrap_or(u64::MAX)
    }
}

/// Transfer characteristics a cable exposes on one of its sides.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CableSegment {
    transfer_capacity: u64,
    resistance_percent: i32,
}

impl CableSegment {
    /// Creates a segment description.
    #[must_use]
    pub const fn new(transfer_capacity: u64, resistance_percent: i32) -> Self {
        Self {
            transfer_capacity,
            resistance_percent,
        }
    }

    /// Bottleneck bandwidth per distribution attempt.
    #[must_use]
    pub const fn transfer_capacity(&self) -> u64 {
        self.transfer_capacity
    }

    /// Resistance exactly as declared, possibly outside `0..=100`.
    #[must_use]
    pub const fn resistance_percent(&self) -> i32 {
        self.resistance_percent
    }

    /// Declared resistance clamped into `0..=100`.
    #[must_use]
    pub const fn resistance(&self) -> Resistance {
        Resistance::clamped(self.resistance_percent)
    }
}

/// Typed view over the capabilities grid cells advertise.
///
/// Implemented by the host grid. Every query is keyed by position and, for
/// sided capabilities, by the side being addressed.
pub trait CapabilityLookup {
    /// Cable segment exposed by `position` toward `side`, if any.
    fn cable(&self, position: Position, side: Direction) -> Option<CableSegment>;

    /// Storage exposed by `position` on `side`, if any.
    fn storage(&self, position: Position, side: Direction) -> Option<&dyn Storage>;

    /// Block descriptor of `position`, if the block declares one.
    fn block_energy(&self, position: Position) -> Option<&BlockEnergy>;

    /// Reports whether `position` exposes a cable toward any side.
    fn is_cable_any_side(&self, position: Position) -> bool {
        Direction::ALL
            .into_iter()
            .any(|side| self.cable(position, side).is_some())
    }
}
