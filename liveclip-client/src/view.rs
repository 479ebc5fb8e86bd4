use liveclip_core::{ClipboardItem, ItemKind};

use crate::{decay::RenderedItem, transport::ConnectionState};

pub const TTL_BAR_WIDTH: usize = 20;
pub const PREVIEW_CHARS: usize = 60;

pub fn status_label(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Connected => "Connected",
        ConnectionState::Disconnected => "Disconnected",
        ConnectionState::Errored => "Error",
    }
}

pub fn preview_text(text: &str, max_chars: usize) -> String {
    let mut out = String::new();
    for (index, ch) in text.chars().enumerate() {
        if index >= max_chars {
            out.push('…');
            break;
        }
        out.push(if ch.is_control() { ' ' } else { ch });
    }
    out
}

pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

pub fn ttl_bar(fraction: f64, width: usize) -> String {
    let filled = ((fraction.clamp(0.0, 1.0) * width as f64).round() as usize).min(width);
    let mut bar = "█".repeat(filled);
    bar.push_str(&"░".repeat(width - filled));
    bar
}

fn describe(item: &ClipboardItem) -> String {
    let name = item.name.as_deref().unwrap_or("");
    match item.kind {
        ItemKind::Text => {
            let preview = preview_text(item.data.as_deref().unwrap_or(""), PREVIEW_CHARS);
            if name.is_empty() {
                preview
            } else {
                format!("{name}: {preview}")
            }
        }
        ItemKind::Image => {
            // Base64 carries 3 bytes per 4 chars.
            let approx = item.data.as_ref().map_or(0, |d| d.len() as u64 / 4 * 3);
            format!("{name} ({})", human_size(approx))
        }
        ItemKind::File => {
            let size = item.size.map(human_size).unwrap_or_else(|| "?".to_owned());
            let mime = item.mime.as_deref().unwrap_or("unknown");
            format!("{name} ({size}, {mime})")
        }
        ItemKind::Other => name.to_owned(),
    }
}

pub fn render_item_line(rendered: &RenderedItem<'_>) -> String {
    let item = rendered.item;
    let dim = if rendered.decay.expired() { " (expired)" } else { "" };
    format!(
        "[{:<5}] {} {:>3}s left{}  {}",
        item.kind.as_str(),
        ttl_bar(rendered.decay.fraction, TTL_BAR_WIDTH),
        rendered.decay.countdown_secs,
        dim,
        describe(item)
    )
}

pub fn render_frame(state: ConnectionState, rendered: &[RenderedItem<'_>]) -> String {
    let mut out = format!("Live Clipboard  [{}]\n", status_label(state));
    if rendered.is_empty() {
        out.push_str("  (no items)\n");
    }
    for entry in rendered {
        out.push_str("  ");
        out.push_str(&render_item_line(entry));
        out.push('\n');
    }
    out
}
