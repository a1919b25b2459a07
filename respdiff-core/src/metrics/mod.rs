//! Rolling counters indexed by (value type × conflict kind), rotated on a
//! fixed period into per-interval speeds, snapshotted for log and metric
//! file emission.

mod counter;
mod stat;

pub use counter::{CounterSnapshot, SpeedCounter};
pub use stat::{Stat, StatSnapshot};
