//! Transactional multi-hop distribution from one source side.

use cable_grid_core::{CapabilityLookup, Direction, Position, Storage, Transaction};
use cable_grid_system_network::NetworkCache;
use tracing::{debug, trace};

use crate::search::{PathSearch, Target};

/// Distribution engine that reuses its path search scratch space.
#[derive(Debug, Default)]
pub struct Distributor {
    search: PathSearch,
}

/// Reasons a single target is passed over during a distribution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Skip {
    /// The target's block forbids insertion on the entry side.
    SideClosed,
    /// The storage vanished or stopped accepting insertion.
    NotInsertable,
    /// Neither budget nor path bandwidth remains.
    NoPathCapacity,
    /// The source cannot currently provide anything.
    SourceEmpty,
    /// Path losses swallow everything the source could send.
    FullyLost,
    /// The receiver has no free space.
    ReceiverFull,
    /// The source yielded a different amount than simulated.
    SourceDrift,
    /// The delivered amount no longer matches the simulated acceptance.
    LossDrift,
    /// The receiver accepted a different amount than simulated.
    ReceiverDrift,
}

impl Distributor {
    /// Creates a distributor with empty scratch space.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes up to `max_extract` from the storage at `source` through the
    /// network adjacent to `side`, returning the amount extracted before losses.
    ///
    /// Targets are serviced greedily in path-cost order. Each target is
    /// first simulated on both ends, then executed in a nested transaction
    /// that is discarded if either end no longer behaves as simulated. The
    /// outer transaction commits only when `simulate` is false; the return
    /// value is the same either way.
    pub fn distribute_from<L>(
        &mut self,
        lookup: &L,
        networks: &mut NetworkCache,
        source: Position,
        side: Direction,
        max_extract: u64,
        simulate: bool,
    ) -> u64
    where
        L: CapabilityLookup + ?Sized,
    {
        if max_extract == 0 {
            return 0;
        }
        if let Some(energy) = lookup.block_energy(source) {
            if !energy.side_mode(side).can_extract() {
                return 0;
            }
        }
        let Some(source_storage) = lookup
            .storage(source, side)
            .filter(|storage| storage.supports_extraction())
        else {
            return 0;
        };

        let entry = source.offset(side);
        let entry_side = side.opposite();
        if lookup.cable(entry, entry_side).is_none() {
            return 0;
        }
        let Some(network) = networks.network_containing(lookup, entry) else {
            return 0;
        };

        let targets = self
            .search
            .find_targets(lookup, network, entry, entry_side);
        if targets.is_empty() {
            return 0;
        }

        let mut remaining = max_extract;
        let mut extracted_total = 0u64;
        let mut serviced = 0usize;
        let mut outer = Transaction::open_outer();

        for target in targets {
            if remaining == 0 {
                break;
            }
            if target.position() == source {
                continue;
            }

            match service_target(lookup, source_storage, target, remaining, &mut outer) {
                Ok(extracted) => {
                    extracted_total += extracted;
                    remaining -= extracted;
                    serviced += 1;
                }
                Err(skip) => {
                    trace!(
                        target = ?target.position(),
                        side = ?target.side(),
                        reason = ?skip,
                        "distribution target skipped"
                    );
                }
            }
        }

        if simulate {
            outer.abort();
        } else {
            outer.commit();
        }

        debug!(
            ?source,
            ?side,
            targets = targets.len(),
            serviced,
            extracted = extracted_total,
            simulate,
            "distribution finished"
        );
        extracted_total
    }
}

/// Convenience wrapper that runs one distribution with fresh scratch space.
pub fn distribute_from<L>(
    lookup: &L,
    networks: &mut NetworkCache,
    source: Position,
    side: Direction,
    max_extract: u64,
    simulate: bool,
) -> u64
where
    L: CapabilityLookup + ?Sized,
{
    Distributor::new().distribute_from(lookup, networks, source, side, max_extract, simulate)
}

fn service_target<L>(
    lookup: &L,
    source: &dyn Storage,
    target: &Target,
    remaining: u64,
    outer: &mut Transaction<'_>,
) -> Result<u64, Skip>
where
    L: CapabilityLookup + ?Sized,
{
    if let Some(energy) = lookup.block_energy(target.position()) {
        if !energy.side_mode(target.side()).can_insert() {
            return Err(Skip::SideClosed);
        }
    }
    let consumer = lookup
        .storage(target.position(), target.side())
        .filter(|storage| storage.supports_insertion())
        .ok_or(Skip::NotInsertable)?;

    let resistance = target.cost().resistance();
    let path_cap = remaining.min(target.cost().capacity());
    if path_cap == 0 {
        return Err(Skip::NoPathCapacity);
    }

    let send_max = {
        let mut probe = outer.open_nested();
        source.extract(path_cap, &mut probe)
    };
    if send_max == 0 {
        return Err(Skip::SourceEmpty);
    }

    let delivered_max = resistance.apply(send_max);
    if delivered_max == 0 {
        return Err(Skip::FullyLost);
    }

    let accepted_max = {
        let mut probe = outer.open_nested();
        consumer.insert(delivered_max, &mut probe)
    };
    if accepted_max == 0 {
        return Err(Skip::ReceiverFull);
    }

    let send = resistance.inverse_ceil(accepted_max).min(path_cap);
    if send == 0 {
        return Err(Skip::NoPathCapacity);
    }

    let mut step = outer.open_nested();
    let extracted = source.extract(send, &mut step);
    if extracted != send {
        return Err(Skip::SourceDrift);
    }
    let delivered = resistance.apply(extracted);
    if delivered != accepted_max {
        return Err(Skip::LossDrift);
    }
    if consumer.insert(delivered, &mut step) != delivered {
        return Err(Skip::ReceiverDrift);
    }
    step.commit();

    Ok(extracted)
}
