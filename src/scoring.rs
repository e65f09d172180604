//! Deterministic engagement scoring.
//!
//! ```text
//! raw = likes·1.0 + retweets·2.0 + replies·1.6 + quotes·2.2 + log10(views + 1)·8.0
//! hotness = clamp(round_half_even(raw), 0, 100)
//! ```
//!
//! Rounding is half-to-even everywhere in this crate so that scores match
//! across implementations bit for bit.

use crate::models::{Item, Metrics};

pub const MAX_HOTNESS: i64 = 100;

pub fn hotness(metrics: &Metrics) -> i64 {
    let raw = metrics.likes as f64 * 1.0
        + metrics.retweets as f64 * 2.0
        + metrics.replies as f64 * 1.6
        + metrics.quotes as f64 * 2.2
        + ((metrics.views.max(0) as f64) + 1.0).log10() * 8.0;

    round_half_even(raw).clamp(0, MAX_HOTNESS)
}

/// Round to the nearest integer, ties to even.
pub fn round_half_even(value: f64) -> i64 {
    value.round_ties_even() as i64
}

/// Set `hotness` on every item.
pub fn attach_hotness(items: &mut [Item]) {
    for item in items.iter_mut() {
        item.hotness = Some(hotness(&item.metrics));
    }
}
