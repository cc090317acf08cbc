//! Records kept by the planner: homes, floors, areas, devices and the
//! selectable option catalog.
//!
//! Notes
//! - Field names serialize in camelCase to stay compatible with data written
//!   by the browser front-end.
//! - Every record carries an `extra` map so fields this crate does not model
//!   survive a load/save round trip.
//! - Ids are opaque strings; ids stored as JSON numbers are accepted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

// =====================
// Scalar ID newtype wrappers
// =====================

macro_rules! string_id {
    ($name:ident, $what:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                $name(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                $name(value.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                deserializer.deserialize_any(IdVisitor($what)).map($name)
            }
        }
    };
}

string_id!(HomeId, "a home id");
string_id!(FloorId, "a floor id");
string_id!(AreaId, "an area id");
string_id!(DeviceId, "a device id");

/// Accepts both `"1700000000000"` and `1700000000000`.
struct IdVisitor(&'static str);

impl<'de> serde::de::Visitor<'de> for IdVisitor {
    type Value = String;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} (string or integer)", self.0)
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(value.to_string())
    }

    fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(value)
    }

    fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(value.to_string())
    }

    fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(value.to_string())
    }
}

/// Optional reference fields are written as `""` by older front-ends when unset.
fn blank_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let raw: Option<Value> = Option::deserialize(deserializer)?;
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(other) => T::deserialize(other).map(Some).map_err(serde::de::Error::custom),
    }
}

// =====================
// Records
// =====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Home {
    pub id: HomeId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Floor {
    pub id: FloorId,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub home_id: Option<HomeId>,
    #[serde(default)]
    pub name: String,
    /// Building storey; ordering hint only.
    #[serde(default)]
    pub level: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Area {
    pub id: AreaId,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub home_id: Option<HomeId>,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub floor: Option<FloorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A physical port on a device; `connected_to` points at another device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Port {
    #[serde(default, deserialize_with = "blank_as_none", skip_serializing_if = "Option::is_none")]
    pub connected_to: Option<DeviceId>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: DeviceId,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub home_id: Option<HomeId>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub area: Option<AreaId>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub model: String,
    #[serde(default, rename = "type")]
    pub device_type: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub mac: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<String>,
    #[serde(default)]
    pub battery_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connectivity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<Port>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Global (not home-scoped) catalog of selectable option values.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub brands: Vec<String>,
    pub types: Vec<String>,
    pub connectivity: Vec<String>,
    pub battery_types: Vec<String>,
}

/// Stored settings may omit any list.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSettings {
    #[serde(default)]
    pub brands: Option<Vec<String>>,
    #[serde(default)]
    pub types: Option<Vec<String>>,
    #[serde(default)]
    pub connectivity: Option<Vec<String>>,
    #[serde(default)]
    pub battery_types: Option<Vec<String>>,
}

// =====================
// Form inputs
// =====================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FloorFields {
    pub name: String,
    /// Raw form value; blank or unparseable means "no level".
    pub level: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AreaFields {
    pub name: String,
    pub floor: Option<FloorId>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceFields {
    pub name: String,
    pub brand: String,
    pub model: String,
    pub device_type: String,
    pub ip: String,
    pub mac: String,
    pub status: Option<String>,
    pub power: Option<String>,
    pub battery_type: String,
    pub connectivity: Option<String>,
    pub area: Option<AreaId>,
    /// Defaults to the selected home when unset.
    pub home_id: Option<HomeId>,
}

/// Device list narrowing. Unset fields match everything; set fields all
/// have to match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceFilter {
    /// Case-insensitive substring of the device name.
    pub name: Option<String>,
    /// Matches devices whose area sits on this floor.
    pub floor: Option<FloorId>,
    pub area: Option<AreaId>,
    pub brand: Option<String>,
    pub device_type: Option<String>,
    pub connectivity: Option<String>,
    pub status: Option<String>,
    pub power: Option<String>,
    pub battery_type: Option<String>,
    pub ups_protected: Option<bool>,
    pub local_only: Option<bool>,
    /// Flag fields (`matterHub`, `alexa`, ...) that must all be truthy.
    pub features: Vec<String>,
}

impl DeviceFilter {
    pub fn is_empty(&self) -> bool {
        *self == DeviceFilter::default()
    }
}

impl Device {
    /// Truthiness of a flag kept in `extra`; absent counts as false.
    pub fn flag(&self, key: &str) -> bool {
        match self.extra.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(_)) | Some(Value::Object(_)) => true,
            Some(Value::Null) | None => false,
        }
    }
}

/// Parse a level form value the way the floor form does: leading integer, else none.
pub fn parse_level(raw: Option<&str>) -> Option<i64> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() {
        return None;
    }
    let (sign, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let end = digits.find(|c: char| !c.is_ascii_digit()).unwrap_or(digits.len());
    digits[..end].parse::<i64>().ok().map(|n| sign * n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_ids_and_blank_references_decode() {
        let json = r#"{"id": 1700000000000, "homeId": "", "name": "Kitchen", "floor": ""}"#;
        let area: Area = serde_json::from_str(json).expect("parse area");
        assert_eq!(area.id.as_str(), "1700000000000");
        assert_eq!(area.home_id, None);
        assert_eq!(area.floor, None);
    }

    #[test]
    fn unknown_device_fields_survive_round_trip() {
        let json = r#"{"id":"d1","homeId":"h1","area":"a1","name":"Plug","type":"plugs","notes":"by the tv","ports":[{"connectedTo":"d2","label":"lan"}]}"#;
        let device: Device = serde_json::from_str(json).expect("parse device");
        assert_eq!(device.device_type, "plugs");
        assert_eq!(device.extra.get("notes"), Some(&Value::String("by the tv".into())));

        let back = serde_json::to_value(&device).expect("serialize");
        assert_eq!(back["notes"], "by the tv");
        assert_eq!(back["ports"][0]["label"], "lan");
        assert_eq!(back["ports"][0]["connectedTo"], "d2");
    }

    #[test]
    fn device_flags_follow_json_truthiness() {
        let json = r#"{"id":"d1","name":"Hub","matterHub":true,"alexa":false,"localOnly":1,"notes":""}"#;
        let device: Device = serde_json::from_str(json).expect("parse device");
        assert!(device.flag("matterHub"));
        assert!(device.flag("localOnly"));
        assert!(!device.flag("alexa"));
        assert!(!device.flag("notes"));
        assert!(!device.flag("zigbeeRepeater"));
    }

    #[test]
    fn level_parsing_matches_form_semantics() {
        assert_eq!(parse_level(None), None);
        assert_eq!(parse_level(Some("  ")), None);
        assert_eq!(parse_level(Some("3")), Some(3));
        assert_eq!(parse_level(Some("-1")), Some(-1));
        assert_eq!(parse_level(Some("2nd")), Some(2));
        assert_eq!(parse_level(Some("attic")), None);
    }
}
