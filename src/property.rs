use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const SOFTENER_SYSTEM_TYPE: &str = "demand_softener";
pub const DEFAULT_DEVICE_NAME: &str = "EcoWater Softener";

/// A single telemetry value as reported by the cloud.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Number(f64),
    Bool(bool),
    Text(String),
    /// null, arrays and objects
    Unknown,
}

impl PropertyValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, PropertyValue::Unknown)
    }
}

impl From<Value> for PropertyValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Bool(b) => PropertyValue::Bool(b),
            Value::Number(n) => n.as_f64().map_or(PropertyValue::Unknown, PropertyValue::Number),
            Value::String(s) => PropertyValue::Text(s),
            Value::Null | Value::Array(_) | Value::Object(_) => PropertyValue::Unknown,
        }
    }
}

impl<'de> Deserialize<'de> for PropertyValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(PropertyValue::from(Value::deserialize(deserializer)?))
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Number(n) => write!(f, "{n}"),
            PropertyValue::Bool(b) => write!(f, "{b}"),
            PropertyValue::Text(s) => f.write_str(s),
            PropertyValue::Unknown => f.write_str("unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub value: PropertyValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Property {
    pub fn new(value: PropertyValue) -> Self {
        Self {
            value,
            updated_at: None,
        }
    }

    /// Last-updated timestamp, when the cloud sent one in RFC 3339 form.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }
}

/// One device entry of the `/devices` listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub system_type: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub model_description: Option<String>,
    #[serde(default)]
    pub system_type_display: Option<String>,
    #[serde(default)]
    pub product_serial_number: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default, deserialize_with = "deserialize_properties")]
    pub properties: BTreeMap<String, Property>,
}

impl Device {
    pub fn is_softener(&self) -> bool {
        self.system_type.as_deref() == Some(SOFTENER_SYSTEM_TYPE)
    }

    pub fn display_name(&self) -> &str {
        self.nickname.as_deref().unwrap_or(DEFAULT_DEVICE_NAME)
    }

    pub fn property(&self, key: &str) -> Option<&Property> {
        self.properties.get(key)
    }
}

/// The full device list returned by one successful poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub devices: Vec<Device>,
    pub fetched_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(devices: Vec<Device>) -> Self {
        Self {
            devices,
            fetched_at: Utc::now(),
        }
    }

    pub fn device(&self, id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == id)
    }

    pub fn softeners(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter().filter(|d| d.is_softener())
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

fn deserialize_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "device id must be a string or number, got {other}"
        ))),
    }
}

// Entries that are not objects carrying a "value" key are not telemetry.
fn deserialize_properties<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<String, Property>, D::Error> {
    let raw: Option<BTreeMap<String, Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, entry)| {
            let Value::Object(mut fields) = entry else {
                return None;
            };
            let value = fields.remove("value")?;
            let updated_at = match fields.remove("updated_at") {
                Some(Value::String(ts)) => Some(ts),
                _ => None,
            };
            Some((
                key,
                Property {
                    value: PropertyValue::from(value),
                    updated_at,
                },
            ))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_device_and_drops_non_telemetry_entries() {
        let device: Device = serde_json::from_value(json!({
            "id": 4711,
            "system_type": "demand_softener",
            "nickname": "Basement",
            "properties": {
                "salt_level_tenths": {"value": 455, "updated_at": "2025-10-01T12:00:00Z"},
                "_internal_is_online": {"value": true},
                "model_display_code": {"value": "ERR3700"},
                "error_code": {"value": null},
                "flags": ["not", "a", "property"],
                "no_value": {"updated_at": "2025-10-01T12:00:00Z"}
            }
        }))
        .unwrap();

        assert_eq!(device.id, "4711");
        assert!(device.is_softener());
        assert_eq!(device.display_name(), "Basement");
        assert_eq!(device.properties.len(), 4);
        assert_eq!(
            device.property("salt_level_tenths").unwrap().value,
            PropertyValue::Number(455.0)
        );
        assert_eq!(
            device.property("_internal_is_online").unwrap().value,
            PropertyValue::Bool(true)
        );
        assert_eq!(
            device.property("model_display_code").unwrap().value.as_str(),
            Some("ERR3700")
        );
        assert!(device.property("error_code").unwrap().value.is_unknown());
        assert!(device.property("flags").is_none());
        assert!(device.property("no_value").is_none());
    }

    #[test]
    fn parses_rfc3339_timestamps_only() {
        let mut prop = Property::new(PropertyValue::Number(1.0));
        prop.updated_at = Some("2025-10-01T12:00:00+02:00".into());
        assert_eq!(
            prop.updated_at().unwrap().to_rfc3339(),
            "2025-10-01T10:00:00+00:00"
        );

        prop.updated_at = Some("yesterday".into());
        assert!(prop.updated_at().is_none());
    }

    #[test]
    fn missing_nickname_falls_back_to_default_name() {
        let device: Device = serde_json::from_value(json!({"id": "abc"})).unwrap();
        assert_eq!(device.display_name(), DEFAULT_DEVICE_NAME);
        assert!(!device.is_softener());
        assert!(device.properties.is_empty());
    }
}
