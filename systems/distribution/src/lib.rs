#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Pure system that moves energy from a source through a cable network.
//!
//! Path resistance is additive and clamped to `0..=100`; path capacity is
//! the bottleneck of its segments. Energy delivered over a path is
//! `floor(sent * (100 - resistance) / 100)`, and targets are serviced in
//! ascending resistance, then descending capacity.

mod engine;
mod search;
mod stats;

pub use engine::{distribute_from, Distributor};
pub use search::{PathCost, PathSearch, Target};
pub use stats::{insertable_totals, insertable_totals_from, NetworkTotals};
