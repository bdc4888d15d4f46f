//! Heartbeat timer
//!
//! Vehicles stop themselves when no `group_cmd` arrives within their
//! failsafe timeout. The heartbeat re-sends the last control vector at a
//! fixed period so a stationary stick does not look like a lost leader.

use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Build the heartbeat interval.
///
/// The first tick fires one period from now. Missed ticks are skipped, never
/// bunched up.
pub fn interval(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}
