//! TOML scenario describing a grid layout and the per-tick work applied to it.

use std::{collections::BTreeMap, fs, path::Path};

use anyhow::{Context, Result};
use cable_grid_core::{
    BlockEnergy, CableSegment, Command, Direction, Position, SideMode, Sides, StorageSettings,
};
use serde::Deserialize;

/// Layout and tick schedule loaded from a scenario file.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Scenario {
    #[serde(default)]
    cables: Vec<CableEntry>,
    #[serde(default)]
    machines: Vec<MachineEntry>,
    #[serde(default)]
    generators: Vec<GeneratorEntry>,
    #[serde(default)]
    distributions: Vec<DistributionEntry>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CableEntry {
    position: [i32; 3],
    capacity: u64,
    #[serde(default)]
    resistance: i32,
    /// Exposed sides; every side when omitted.
    sides: Option<Vec<Direction>>,
}

#[derive(Clone, Debug, Deserialize)]
struct MachineEntry {
    position: [i32; 3],
    #[serde(flatten)]
    storage: StorageSettings,
    #[serde(default)]
    generation_rate: u64,
    #[serde(default)]
    sides: BTreeMap<Direction, SideMode>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GeneratorEntry {
    position: [i32; 3],
    side: Direction,
    amount: u64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DistributionEntry {
    source: [i32; 3],
    side: Direction,
    max_extract: u64,
}

impl Scenario {
    /// Reads and parses the scenario at `path`.
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario at {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("failed to parse scenario at {}", path.display()))
    }

    /// Parses scenario TOML.
    pub(crate) fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("invalid scenario toml")
    }

    /// Commands that build the layout: cables first, then machines.
    pub(crate) fn setup_commands(&self) -> Vec<Command> {
        let cables = self.cables.iter().map(|cable| Command::PlaceCable {
            position: position(cable.position),
            segment: CableSegment::new(cable.capacity, cable.resistance),
            sides: cable.sides.as_deref().map_or(Sides::ALL, Sides::only),
        });

        let machines = self.machines.iter().map(|machine| {
            let declared = u64::try_from(machine.storage.capacity).unwrap_or(0);
            let energy = machine.sides.iter().fold(
                BlockEnergy::new(declared).with_generation_rate(machine.generation_rate),
                |energy, (side, mode)| energy.with_side_mode(*side, *mode),
            );
            Command::PlaceMachine {
                position: position(machine.position),
                storage: machine.storage,
                energy,
            }
        });

        cables.chain(machines).collect()
    }

    /// Commands applied every tick: generation first, then distribution.
    pub(crate) fn tick_commands(&self, simulate: bool) -> Vec<Command> {
        let generation = self.generators.iter().map(|generator| Command::Generate {
            position: position(generator.position),
            side: generator.side,
            amount: generator.amount,
        });

        let distribution = self
            .distributions
            .iter()
            .map(|distribution| Command::Distribute {
                source: position(distribution.source),
                side: distribution.side,
                max_extract: distribution.max_extract,
                simulate,
            });

        generation.chain(distribution).collect()
    }
}

fn position([x, y, z]: [i32; 3]) -> Position {
    Position::new(x, y, z)
}
