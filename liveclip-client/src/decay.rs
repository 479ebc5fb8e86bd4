//! Time-derived fade and countdown for rendered items.
//!
//! Everything here is a pure function of the item's `created_at`, the fixed
//! lifetime and the current wall clock. Nothing in this module touches the
//! store; an item at zero stays visible at the floor until a `sync` drops it.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use liveclip_core::{ClipboardItem, ITEM_LIFETIME};

pub const TICK: Duration = Duration::from_secs(1);
pub const OPACITY_FLOOR: f64 = 0.4;
pub const SCALE_FLOOR: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayState {
    pub remaining_ms: u64,
    /// `remaining / lifetime`, in `[0, 1]`.
    pub fraction: f64,
    pub opacity: f64,
    pub scale: f64,
    pub countdown_secs: u64,
}

impl DecayState {
    pub fn expired(&self) -> bool {
        self.remaining_ms == 0
    }
}

pub fn decay_at(created_at_secs: f64, lifetime: Duration, now_unix_ms: u64) -> DecayState {
    let lifetime_ms = u64::try_from(lifetime.as_millis()).unwrap_or(u64::MAX);
    let created_ms = if created_at_secs.is_finite() && created_at_secs > 0.0 {
        (created_at_secs * 1000.0).round() as u64
    } else {
        0
    };

    // Clock skew can put `created_at` in the future; clamp to a full lifetime.
    let elapsed_ms = now_unix_ms.saturating_sub(created_ms);
    let remaining_ms = lifetime_ms.saturating_sub(elapsed_ms);
    let fraction = if lifetime_ms == 0 {
        0.0
    } else {
        remaining_ms as f64 / lifetime_ms as f64
    };

    DecayState {
        remaining_ms,
        fraction,
        opacity: fraction.max(OPACITY_FLOOR),
        scale: SCALE_FLOOR + fraction * (1.0 - SCALE_FLOOR),
        countdown_secs: remaining_ms.div_ceil(1000),
    }
}

pub fn now_unix_ms() -> u64 {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    duration.as_millis() as u64
}

#[derive(Debug, Clone)]
pub struct RenderedItem<'a> {
    pub item: &'a ClipboardItem,
    pub decay: DecayState,
}

/// Maps a store snapshot to per-item decay without keeping any state between frames.
#[derive(Debug, Clone, Copy)]
pub struct DecayRenderer {
    lifetime: Duration,
}

impl Default for DecayRenderer {
    fn default() -> Self {
        Self::new(ITEM_LIFETIME)
    }
}

impl DecayRenderer {
    pub fn new(lifetime: Duration) -> Self {
        Self { lifetime }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    pub fn frame<'a>(&self, items: &'a [ClipboardItem], now_unix_ms: u64) -> Vec<RenderedItem<'a>> {
        items
            .iter()
            .map(|item| RenderedItem {
                item,
                decay: decay_at(item.created_at, self.lifetime, now_unix_ms),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_item_is_fully_visible() {
        let state = decay_at(1_000.0, ITEM_LIFETIME, 1_000_000);
        assert_eq!(state.remaining_ms, 60_000);
        assert_eq!(state.fraction, 1.0);
        assert_eq!(state.opacity, 1.0);
        assert_eq!(state.scale, 1.0);
        assert_eq!(state.countdown_secs, 60);
    }

    #[test]
    fn countdown_rounds_partial_seconds_up() {
        let state = decay_at(1_000.0, ITEM_LIFETIME, 1_000_000 + 59_001);
        assert_eq!(state.remaining_ms, 999);
        assert_eq!(state.countdown_secs, 1);
    }

    #[test]
    fn future_timestamp_is_clamped_to_full_lifetime() {
        let state = decay_at(2_000.0, ITEM_LIFETIME, 1_000_000);
        assert_eq!(state.remaining_ms, 60_000);
    }
}
