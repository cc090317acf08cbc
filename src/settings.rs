//! Option-value catalog: defaults, normalization and friendly labels.

use crate::models::inventory::{Settings, StoredSettings};
use std::collections::HashSet;

pub const DEFAULT_BRANDS: [&str; 25] = [
    "Aqara",
    "Apple",
    "Broadlink",
    "Echo",
    "Ecobee",
    "Eufy",
    "Google",
    "Home Assistant",
    "Hue",
    "Insteon",
    "Lutron",
    "Meross",
    "Nest",
    "Philips",
    "Ring",
    "Shelly",
    "Sonoff",
    "SwitchBot",
    "TP-Link",
    "Tuya",
    "Wyze",
    "Xiaomi",
    "Yale",
    "Zigbee",
    "Z-Wave",
];

pub const DEFAULT_TYPES: [&str; 29] = [
    "air-quality-monitors",
    "cameras",
    "displays",
    "dongles",
    "door-locks",
    "door-window-sensors",
    "doorbells",
    "hubs",
    "ir-remote-controls",
    "led-bulbs",
    "mini-pcs",
    "motion-sensors",
    "plugs",
    "presence-sensors",
    "radiator-valves",
    "relays",
    "robot-vacuums",
    "routers",
    "sirens",
    "smoke-alarms",
    "speakers",
    "temperature-humidity-sensors",
    "thermostats",
    "vibration-sensors",
    "voice-assistants",
    "wall-outlets",
    "wall-switches",
    "water-leak-sensors",
    "water-valves",
];

pub const DEFAULT_CONNECTIVITY: [&str; 5] = ["wifi", "zigbee", "z-wave", "bluetooth", "matter"];

pub const DEFAULT_BATTERY_TYPES: [&str; 4] = ["USB", "CR2477", "AA", "AAA"];

/// Which formatter turns a bare slug into a display label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelStyle {
    TitleCase,
    Connectivity,
}

impl LabelStyle {
    fn format(self, slug: &str) -> String {
        match self {
            LabelStyle::TitleCase => format_device_type(slug),
            LabelStyle::Connectivity => format_connectivity(slug),
        }
    }
}

/// Comparison key for option values: case, whitespace, `&` and `/` insensitive.
pub fn normalize_option_value(value: &str) -> String {
    let lowered = value.trim().to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut pending_dash = false;
    for ch in lowered.chars() {
        if ch == '&' || ch == '/' || ch == '-' || ch.is_whitespace() {
            pending_dash = true;
            continue;
        }
        if pending_dash && !out.is_empty() {
            out.push('-');
        }
        pending_dash = false;
        out.push(ch);
    }
    if out == "wi-fi" { "wifi".to_string() } else { out }
}

/// `led-bulbs` -> `Led Bulbs`.
pub fn format_device_type(value: &str) -> String {
    value
        .split('-')
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn format_connectivity(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    match normalize_option_value(value).as_str() {
        "wifi" => "Wi-Fi".to_string(),
        "z-wave" => "Z-Wave".to_string(),
        "zigbee" => "Zigbee".to_string(),
        "bluetooth" => "Bluetooth".to_string(),
        "matter" => "Matter".to_string(),
        other => other.split('-').map(capitalize).collect::<Vec<_>>().join(" "),
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Deduplicate by normalized key, keeping the first human-friendly spelling.
///
/// A value that is already a bare slug (its own normalized form) is replaced
/// by its formatted label before it is compared, so `wifi` becomes `Wi-Fi`.
pub fn ensure_friendly_list<S: AsRef<str>>(values: &[S], style: LabelStyle) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut result = Vec::new();
    for value in values {
        let raw = value.as_ref().trim();
        if raw.is_empty() {
            continue;
        }
        let normalized = normalize_option_value(raw);
        let label = if !normalized.is_empty() && normalized == raw {
            let formatted = style.format(&normalized);
            if formatted.is_empty() { raw.to_string() } else { formatted }
        } else {
            raw.to_string()
        };
        let key = normalize_option_value(&label);
        if key.is_empty() || !seen.insert(key) {
            continue;
        }
        result.push(label);
    }
    result
}

pub fn ensure_friendly_settings(settings: &Settings) -> Settings {
    Settings {
        brands: ensure_friendly_list(&settings.brands, LabelStyle::TitleCase),
        types: ensure_friendly_list(&settings.types, LabelStyle::TitleCase),
        connectivity: ensure_friendly_list(&settings.connectivity, LabelStyle::Connectivity),
        battery_types: ensure_friendly_list(&settings.battery_types, LabelStyle::TitleCase),
    }
}

pub fn default_settings() -> Settings {
    ensure_friendly_settings(&Settings {
        brands: DEFAULT_BRANDS.iter().map(|s| s.to_string()).collect(),
        types: DEFAULT_TYPES.iter().map(|s| s.to_string()).collect(),
        connectivity: DEFAULT_CONNECTIVITY.iter().map(|s| s.to_string()).collect(),
        battery_types: DEFAULT_BATTERY_TYPES.iter().map(|s| s.to_string()).collect(),
    })
}

/// Overlay stored lists on the defaults; an absent or empty stored list keeps the default.
pub fn merge_with_defaults(stored: Option<StoredSettings>) -> Settings {
    let defaults = default_settings();
    let Some(stored) = stored else {
        return defaults;
    };
    let pick = |saved: Option<Vec<String>>, fallback: Vec<String>| match saved {
        Some(values) if !values.is_empty() => values,
        _ => fallback,
    };
    ensure_friendly_settings(&Settings {
        brands: pick(stored.brands, defaults.brands),
        types: pick(stored.types, defaults.types),
        connectivity: pick(stored.connectivity, defaults.connectivity),
        battery_types: pick(stored.battery_types, defaults.battery_types),
    })
}

/// Find the catalog spelling of `value`, if any.
pub fn friendly_option<'a>(options: &'a [String], value: &str) -> Option<&'a str> {
    let key = normalize_option_value(value);
    options
        .iter()
        .find(|option| normalize_option_value(option) == key)
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_collapses_separators() {
        assert_eq!(normalize_option_value("  Wi-Fi "), "wifi");
        assert_eq!(normalize_option_value("WI FI"), "wifi");
        assert_eq!(normalize_option_value("Door & Window / Sensors"), "door-window-sensors");
        assert_eq!(normalize_option_value("--z--wave--"), "z-wave");
        assert_eq!(normalize_option_value(""), "");
    }

    #[test]
    fn wifi_variants_collapse_to_first_friendly_spelling() {
        let stored = StoredSettings {
            connectivity: Some(vec!["Wi-Fi".into(), "wifi".into(), "WI-FI".into()]),
            ..Default::default()
        };
        let settings = merge_with_defaults(Some(stored));
        assert_eq!(settings.connectivity, vec!["Wi-Fi".to_string()]);
    }

    #[test]
    fn defaults_use_display_labels() {
        let settings = default_settings();
        assert_eq!(settings.types[0], "Air Quality Monitors");
        assert_eq!(settings.connectivity, vec!["Wi-Fi", "Zigbee", "Z-Wave", "Bluetooth", "Matter"]);
        assert_eq!(settings.brands.len(), DEFAULT_BRANDS.len());
        assert!(settings.brands.contains(&"TP-Link".to_string()));
        assert_eq!(settings.battery_types, vec!["USB", "CR2477", "AA", "AAA"]);
    }

    #[test]
    fn empty_stored_list_falls_back_to_defaults() {
        let stored = StoredSettings {
            brands: Some(vec![]),
            battery_types: Some(vec!["CR2032".into(), " cr2032 ".into()]),
            ..Default::default()
        };
        let settings = merge_with_defaults(Some(stored));
        assert_eq!(settings.brands, default_settings().brands);
        assert_eq!(settings.battery_types, vec!["CR2032"]);
    }

    #[test]
    fn friendly_option_lookup_ignores_case() {
        let options = vec!["Wi-Fi".to_string(), "Z-Wave".to_string()];
        assert_eq!(friendly_option(&options, "z wave"), Some("Z-Wave"));
        assert_eq!(friendly_option(&options, "thread"), None);
    }
}
