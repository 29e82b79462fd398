//! Core filter data types
//!
//! These types define the persisted data model: the desired-state records
//! that live in the config store, and the parameter metadata each effect
//! type publishes. They are separate from live effect instances, which own
//! animation state and are never persisted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque parameter bag attached to an effect record.
///
/// Stored as a JSON object. Effect types read the keys they understand
/// through [`ParameterMeta`] and ignore everything else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EffectOptions(Map<String, Value>);

impl EffectOptions {
    /// Create an empty option bag
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Set a single option
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    /// Get a raw option value
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Get an option as f32 (numbers and numeric strings)
    pub fn float(&self, name: &str) -> Option<f32> {
        match self.0.get(name)? {
            Value::Number(n) => n.as_f64().map(|v| v as f32),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Get an option as bool
    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.0.get(name)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_f64().map(|v| v != 0.0),
            _ => None,
        }
    }

    /// Get an option as string slice
    pub fn str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    /// Get an option as an RGBA color.
    ///
    /// Accepts `[r, g, b]` / `[r, g, b, a]` arrays (0.0-1.0) and `#rrggbb` /
    /// `#rrggbbaa` hex strings.
    pub fn color(&self, name: &str) -> Option<[f32; 4]> {
        match self.0.get(name)? {
            Value::Array(values) => {
                let channels: Vec<f32> = values
                    .iter()
                    .filter_map(Value::as_f64)
                    .map(|v| v as f32)
                    .collect();
                match channels.as_slice() {
                    [r, g, b] => Some([*r, *g, *b, 1.0]),
                    [r, g, b, a] => Some([*r, *g, *b, *a]),
                    _ => None,
                }
            }
            Value::String(s) => parse_hex_color(s),
            _ => None,
        }
    }

    /// Number of options in the bag
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the bag is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the underlying JSON object
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for EffectOptions {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn parse_hex_color(s: &str) -> Option<[f32; 4]> {
    let hex = s.strip_prefix('#')?;
    if hex.len() != 6 && hex.len() != 8 {
        return None;
    }
    let channel = |i: usize| -> Option<f32> {
        u8::from_str_radix(hex.get(i..i + 2)?, 16)
            .ok()
            .map(|v| v as f32 / 255.0)
    };
    let alpha = if hex.len() == 8 { channel(6)? } else { 1.0 };
    Some([channel(0)?, channel(2)?, channel(4)?, alpha])
}

/// One desired-state entry: which effect type to run and with what options.
///
/// Records are immutable values. An edit replaces the whole record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectRecord {
    /// Registered effect type name (e.g. "rain", "fog")
    #[serde(rename = "type")]
    pub effect_type: String,
    /// Parameter bag handed to the effect on create/configure
    #[serde(default)]
    pub options: EffectOptions,
}

impl EffectRecord {
    pub fn new(effect_type: impl Into<String>, options: EffectOptions) -> Self {
        Self {
            effect_type: effect_type.into(),
            options,
        }
    }
}

/// Desired state: effect id -> record.
pub type DesiredState = BTreeMap<String, EffectRecord>;

/// Parameter value kinds published by effect definitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterValue {
    /// Floating point value
    Float(f32),
    /// Boolean value
    Bool(bool),
    /// RGBA color (0.0-1.0 per channel)
    Color([f32; 4]),
    /// Enumeration (index into options list)
    Enum { index: usize, options: Vec<String> },
}

impl ParameterValue {
    /// JSON form stored in an [`EffectOptions`] bag
    pub fn to_json(&self) -> Value {
        match self {
            ParameterValue::Float(v) => Value::from(*v as f64),
            ParameterValue::Bool(v) => Value::Bool(*v),
            ParameterValue::Color(c) => Value::from(c.iter().map(|v| *v as f64).collect::<Vec<_>>()),
            ParameterValue::Enum { index, options } => options
                .get(*index)
                .map(|name| Value::String(name.clone()))
                .unwrap_or(Value::Null),
        }
    }
}

/// Metadata for a parameter (describes the parameter, doesn't hold the value)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterMeta {
    /// Internal name (used as option key)
    pub name: String,
    /// Display label
    pub label: String,
    /// Default value
    pub default: ParameterValue,
    /// Minimum value (for numeric types)
    pub min: Option<f32>,
    /// Maximum value (for numeric types)
    pub max: Option<f32>,
}

impl ParameterMeta {
    /// Create a new float parameter metadata
    pub fn float(name: impl Into<String>, label: impl Into<String>, default: f32, min: f32, max: f32) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            default: ParameterValue::Float(default),
            min: Some(min),
            max: Some(max),
        }
    }

    /// Create a new boolean parameter metadata
    pub fn bool(name: impl Into<String>, label: impl Into<String>, default: bool) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            default: ParameterValue::Bool(default),
            min: None,
            max: None,
        }
    }

    /// Create a new color parameter metadata
    pub fn color(name: impl Into<String>, label: impl Into<String>, default: [f32; 4]) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            default: ParameterValue::Color(default),
            min: None,
            max: None,
        }
    }

    /// Create a new enum parameter metadata
    pub fn enumeration(name: impl Into<String>, label: impl Into<String>, options: Vec<String>, default_index: usize) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            default: ParameterValue::Enum { index: default_index, options },
            min: None,
            max: None,
        }
    }

    /// Read this parameter as a float, clamped to its range.
    ///
    /// Falls back to the default when the option is missing or not numeric.
    pub fn read_f32(&self, options: &EffectOptions) -> f32 {
        let default = match &self.default {
            ParameterValue::Float(v) => *v,
            ParameterValue::Bool(v) => if *v { 1.0 } else { 0.0 },
            ParameterValue::Enum { index, .. } => *index as f32,
            ParameterValue::Color(_) => 0.0,
        };
        let value = options.float(&self.name).filter(|v| v.is_finite()).unwrap_or(default);
        let min = self.min.unwrap_or(f32::MIN);
        let max = self.max.unwrap_or(f32::MAX);
        value.clamp(min, max)
    }

    /// Read this parameter as a bool
    pub fn read_bool(&self, options: &EffectOptions) -> bool {
        let default = matches!(self.default, ParameterValue::Bool(true));
        options.bool(&self.name).unwrap_or(default)
    }

    /// Read this parameter as a color
    pub fn read_color(&self, options: &EffectOptions) -> [f32; 4] {
        let default = match self.default {
            ParameterValue::Color(c) => c,
            _ => [1.0, 1.0, 1.0, 1.0],
        };
        options.color(&self.name).unwrap_or(default)
    }

    /// Read this parameter as an enum index (by option name or numeric index)
    pub fn read_index(&self, options: &EffectOptions) -> usize {
        let ParameterValue::Enum { index, options: names } = &self.default else {
            return 0;
        };
        if let Some(name) = options.str(&self.name) {
            if let Some(found) = names.iter().position(|n| n.eq_ignore_ascii_case(name)) {
                return found;
            }
        }
        options
            .float(&self.name)
            .map(|v| v.max(0.0) as usize)
            .filter(|i| *i < names.len())
            .unwrap_or(*index)
    }
}

/// Build an option bag holding every parameter's default value
pub fn default_options(parameters: &[ParameterMeta]) -> EffectOptions {
    parameters
        .iter()
        .fold(EffectOptions::new(), |options, meta| options.with(meta.name.clone(), meta.default.to_json()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_serialization_uses_type_key() {
        let record = EffectRecord::new("rain", EffectOptions::new().with("density", 0.5));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value, json!({"type": "rain", "options": {"density": 0.5}}));

        let back: EffectRecord = serde_json::from_value(json!({"type": "fog"})).unwrap();
        assert_eq!(back.effect_type, "fog");
        assert!(back.options.is_empty());
    }

    #[test]
    fn test_option_accessors() {
        let options: EffectOptions = serde_json::from_value(json!({
            "density": 0.25,
            "speed": "2",
            "enabled": true,
            "tint": "#ff000080",
            "rgb": [0.0, 1.0, 0.0],
        }))
        .unwrap();

        assert_eq!(options.float("density"), Some(0.25));
        assert_eq!(options.float("speed"), Some(2.0));
        assert_eq!(options.bool("enabled"), Some(true));
        assert_eq!(options.color("rgb"), Some([0.0, 1.0, 0.0, 1.0]));

        let tint = options.color("tint").unwrap();
        assert_eq!(tint[0], 1.0);
        assert!((tint[3] - 128.0 / 255.0).abs() < 1e-6);
        assert_eq!(options.float("missing"), None);
    }

    #[test]
    fn test_parameter_read_clamps_and_defaults() {
        let density = ParameterMeta::float("density", "Density", 0.5, 0.0, 1.0);
        let options = EffectOptions::new().with("density", 4.0);
        assert_eq!(density.read_f32(&options), 1.0);
        assert_eq!(density.read_f32(&EffectOptions::new()), 0.5);

        let wrong_type = EffectOptions::new().with("density", "lots");
        assert_eq!(density.read_f32(&wrong_type), 0.5);
    }

    #[test]
    fn test_enum_parameter_by_name_or_index() {
        let mode = ParameterMeta::enumeration(
            "mode",
            "Mode",
            vec!["drift".to_string(), "swirl".to_string()],
            0,
        );
        assert_eq!(mode.read_index(&EffectOptions::new().with("mode", "Swirl")), 1);
        assert_eq!(mode.read_index(&EffectOptions::new().with("mode", 1)), 1);
        assert_eq!(mode.read_index(&EffectOptions::new().with("mode", 7)), 0);
    }

    #[test]
    fn test_default_options_from_parameters() {
        let params = vec![
            ParameterMeta::float("density", "Density", 0.5, 0.0, 1.0),
            ParameterMeta::bool("flash", "Flash", false),
        ];
        let options = default_options(&params);
        assert_eq!(options.float("density"), Some(0.5));
        assert_eq!(options.bool("flash"), Some(false));
    }
}
