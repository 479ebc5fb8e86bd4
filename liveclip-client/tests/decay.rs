use std::time::Duration;

use liveclip_client::decay::{DecayRenderer, OPACITY_FLOOR, SCALE_FLOOR, decay_at};
use liveclip_core::{ClipboardItem, ITEM_LIFETIME, ItemId, OutboundEnvelope};

const CREATED_SECS: f64 = 1_700_000_000.0;
const CREATED_MS: u64 = 1_700_000_000_000;

#[test]
fn remaining_time_never_increases() {
    let mut previous = decay_at(CREATED_SECS, ITEM_LIFETIME, CREATED_MS);
    for step in 1..=70 {
        let now = CREATED_MS + step * 1000;
        let state = decay_at(CREATED_SECS, ITEM_LIFETIME, now);
        assert!(state.remaining_ms <= previous.remaining_ms);
        assert!(state.fraction <= previous.fraction);
        assert!(state.opacity <= previous.opacity);
        assert!(state.scale <= previous.scale);
        assert!(state.countdown_secs <= previous.countdown_secs);
        previous = state;
    }
}

#[test]
fn countdown_is_ceiling_of_remaining_seconds() {
    let cases = [
        (0_u64, 60_u64),
        (1, 60),
        (999, 60),
        (1_000, 59),
        (30_500, 30),
        (59_999, 1),
        (60_000, 0),
        (120_000, 0),
    ];
    for (elapsed_ms, expected) in cases {
        let state = decay_at(CREATED_SECS, ITEM_LIFETIME, CREATED_MS + elapsed_ms);
        assert_eq!(
            state.countdown_secs, expected,
            "elapsed {elapsed_ms}ms should show {expected}s"
        );
    }
}

#[test]
fn item_past_its_lifetime_sits_at_the_floor() {
    let state = decay_at(CREATED_SECS, ITEM_LIFETIME, CREATED_MS + 61_000);
    assert_eq!(state.remaining_ms, 0);
    assert_eq!(state.fraction, 0.0);
    assert_eq!(state.opacity, OPACITY_FLOOR);
    assert_eq!(state.scale, SCALE_FLOOR);
    assert!(state.expired());
}

#[test]
fn halfway_fades_toward_the_floor() {
    let state = decay_at(CREATED_SECS, ITEM_LIFETIME, CREATED_MS + 30_000);
    assert!((state.fraction - 0.5).abs() < 1e-9);
    assert!((state.opacity - 0.5).abs() < 1e-9);
    assert!((state.scale - 0.975).abs() < 1e-9);
}

#[test]
fn renderer_keeps_store_order_and_uses_its_lifetime() {
    let items: Vec<ClipboardItem> = [(1_u64, CREATED_SECS), (2, CREATED_SECS + 5.0)]
        .into_iter()
        .map(|(id, created_at)| {
            ClipboardItem::from_envelope(
                ItemId::Number(id),
                OutboundEnvelope::Text {
                    data: format!("item {id}"),
                    name: None,
                },
                created_at,
            )
        })
        .collect();

    let renderer = DecayRenderer::new(Duration::from_secs(10));
    let frame = renderer.frame(&items, CREATED_MS + 8_000);

    assert_eq!(frame.len(), 2);
    assert_eq!(frame[0].item.id, ItemId::Number(1));
    assert_eq!(frame[0].decay.countdown_secs, 2);
    assert_eq!(frame[1].item.id, ItemId::Number(2));
    assert_eq!(frame[1].decay.countdown_secs, 7);
}
