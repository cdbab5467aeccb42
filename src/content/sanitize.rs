//! Turns untrusted completion text into validated drafts.
//!
//! Nothing here returns an error. Unparseable text becomes zero items, an item
//! without its identifying field is dropped, and every other field is either
//! validated or defaulted before a draft is constructed.

use rand::Rng;
use serde_json::Value;
use tracing::{debug, warn};

use crate::city::model::Coordinates;

use super::model::{HotspotDraft, Level, Metric, QuickWinDraft, Severity, Trend};

/// Tag appended to every generated quick win.
pub const PROVENANCE_TAG: &str = "ai-generated";

/// Largest accepted hotspot offset from the city center, in degrees.
pub const MAX_OFFSET_DEG: f64 = 0.15;

/// Bound of the jitter used when the model omits an offset, in degrees.
pub const JITTER_DEG: f64 = 0.05;

pub const MAX_HOTSPOTS: usize = 8;
pub const MAX_QUICK_WINS: usize = 6;

const MAX_ESTIMATED_DAYS: f64 = 365.0;

/// Parse and sanitize hotspots from raw completion text.
pub fn sanitize_hotspots<R: Rng + ?Sized>(
    text: &str,
    center: Coordinates,
    rng: &mut R,
) -> Vec<HotspotDraft> {
    let items = parse_items(text, &["hotspots", "items"]);
    let total = items.len();
    let drafts: Vec<HotspotDraft> = items
        .iter()
        .filter_map(|item| sanitize_hotspot(item, center, rng))
        .take(MAX_HOTSPOTS)
        .collect();
    if drafts.len() < total {
        debug!(kept = drafts.len(), total, "Dropped hotspot items during sanitization");
    }
    drafts
}

/// Parse and sanitize quick wins from raw completion text.
pub fn sanitize_quick_wins(text: &str) -> Vec<QuickWinDraft> {
    let items = parse_items(text, &["quickWins", "quick_wins", "items"]);
    let total = items.len();
    let mut drafts = Vec::new();
    for item in &items {
        if drafts.len() == MAX_QUICK_WINS {
            break;
        }
        if let Some(draft) = sanitize_quick_win(item, drafts.len() as u32) {
            drafts.push(draft);
        }
    }
    if drafts.len() < total {
        debug!(kept = drafts.len(), total, "Dropped quick-win items during sanitization");
    }
    drafts
}

/// Validate one hotspot item. `None` when it has no usable name.
pub fn sanitize_hotspot<R: Rng + ?Sized>(
    item: &Value,
    center: Coordinates,
    rng: &mut R,
) -> Option<HotspotDraft> {
    let name = text_field(item, &["name"])?;

    let severity = text_field(item, &["severity"])
        .and_then(|s| Severity::parse(&s))
        .unwrap_or_default();

    let d_lat = offset_field(item, &["latOffset", "lat_offset"], rng);
    let d_lng = offset_field(item, &["lngOffset", "lng_offset"], rng);

    let metrics = item
        .get("metrics")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(sanitize_metric).collect())
        .unwrap_or_default();

    let display_value = field(item, &["displayValue", "display_value"]).and_then(|v| match v {
        Value::String(s) => non_empty(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });

    Some(HotspotDraft {
        name,
        description: text_field(item, &["description"]).unwrap_or_default(),
        coordinates: center.offset(d_lat, d_lng),
        address: text_field(item, &["address"]),
        neighborhood: text_field(item, &["neighborhood"]),
        severity,
        metrics,
        display_value,
    })
}

/// Validate one quick-win item. `None` when it has no usable title.
pub fn sanitize_quick_win(item: &Value, sort_order: u32) -> Option<QuickWinDraft> {
    let title = text_field(item, &["title"])?;

    let impact = text_field(item, &["impact"])
        .and_then(|s| Level::parse(&s))
        .unwrap_or_default();
    let effort = text_field(item, &["effort"])
        .and_then(|s| Level::parse(&s))
        .unwrap_or_default();

    let estimated_days = field(item, &["estimatedDays", "estimated_days"])
        .and_then(number)
        .map(f64::round)
        .filter(|d| *d >= 1.0 && *d <= MAX_ESTIMATED_DAYS)
        .map(|d| d as u32);

    let co2_reduction_tons = field(item, &["co2ReductionTons", "co2_reduction_tons"])
        .and_then(number)
        .filter(|t| *t >= 0.0);

    let mut tags: Vec<String> = Vec::new();
    for tag in string_list(item.get("tags")) {
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    if !tags.iter().any(|t| t == PROVENANCE_TAG) {
        tags.push(PROVENANCE_TAG.to_string());
    }

    let steps = Some(string_list(item.get("steps"))).filter(|s| !s.is_empty());

    Some(QuickWinDraft {
        title,
        description: text_field(item, &["description"]).unwrap_or_default(),
        impact,
        effort,
        estimated_days,
        co2_reduction_tons,
        tags,
        steps,
        sort_order,
    })
}

fn sanitize_metric(item: &Value) -> Option<Metric> {
    let key = text_field(item, &["key", "name"])?;
    let value = item.get("value").and_then(number)?;
    Some(Metric {
        key,
        value,
        unit: text_field(item, &["unit"]),
        trend: text_field(item, &["trend"]).and_then(|t| Trend::parse(&t)),
    })
}

// ── Parsing ─────────────────────────────────────────────────────────

/// Extract the list of items from completion text.
///
/// Accepts `{"<key>": [...]}` for any of `keys`, an object holding a single
/// array under another key, or a bare top-level array. Anything else is zero
/// items.
pub fn parse_items(text: &str, keys: &[&str]) -> Vec<Value> {
    let json = extract_json(text);
    let value: Value = match serde_json::from_str(json) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Completion was not valid JSON; treating as zero items");
            return Vec::new();
        }
    };

    match value {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            for key in keys {
                if let Some(Value::Array(items)) = map.remove(*key) {
                    return items;
                }
            }
            let mut arrays = map.into_iter().filter_map(|(_, v)| match v {
                Value::Array(items) => Some(items),
                _ => None,
            });
            match (arrays.next(), arrays.next()) {
                (Some(items), None) => items,
                _ => {
                    warn!(expected = ?keys, "Completion JSON had no recognizable item list");
                    Vec::new()
                }
            }
        }
        _ => {
            warn!("Completion JSON was neither an object nor an array");
            Vec::new()
        }
    }
}

/// Pull the JSON payload out of text that may be wrapped in markdown or prose.
pub fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();

    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return trimmed;
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }

    let start = trimmed.find(['{', '[']);
    let end = trimmed.rfind(['}', ']']);
    match (start, end) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => trimmed,
    }
}

// ── Field helpers ───────────────────────────────────────────────────

fn field<'a>(item: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| item.get(*name))
}

fn text_field(item: &Value, names: &[&str]) -> Option<String> {
    field(item, names)
        .and_then(Value::as_str)
        .and_then(non_empty)
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// A finite number, accepting numeric strings.
fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn offset_field<R: Rng + ?Sized>(item: &Value, names: &[&str], rng: &mut R) -> f64 {
    match field(item, names).and_then(number) {
        Some(offset) => offset.clamp(-MAX_OFFSET_DEG, MAX_OFFSET_DEG),
        None => rng.gen_range(-JITTER_DEG..=JITTER_DEG),
    }
}

/// Non-empty trimmed strings from an array, or from a comma-separated string.
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .filter_map(non_empty)
            .collect(),
        Some(Value::String(s)) => s.split(',').filter_map(non_empty).collect(),
        _ => Vec::new(),
    }
}
