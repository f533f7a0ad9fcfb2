//! Effect settings
//!
//! Pixel effects are rendered by the browser. The server only validates and
//! remembers the selected effect so every client can be told about changes.

use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::protocol::EventPayload;

/// Effect names clients may select
pub const EFFECT_NAMES: [&str; 9] = [
    "none",
    "fisheye",
    "grayscale",
    "sepia",
    "vignette",
    "blur",
    "sharpen",
    "invert",
    "pixelate",
];

pub fn is_known_effect(name: &str) -> bool {
    EFFECT_NAMES.contains(&name)
}

/// Selected effect and its parameters
#[derive(Debug, Clone, PartialEq)]
pub struct EffectSettings {
    pub effect: String,
    /// 0.0..=1.0
    pub intensity: f64,
    /// Never negative
    pub radius: f64,
    /// At least 1
    pub pixel_size: i64,
}

impl Default for EffectSettings {
    fn default() -> Self {
        Self {
            effect: "none".to_string(),
            intensity: 0.5,
            radius: 1.0,
            pixel_size: 10,
        }
    }
}

impl EffectSettings {
    /// Read `effect` and its parameters from an event payload
    ///
    /// Parameters are taken from `params.<key>`, then from a `params` value
    /// sent as a JSON string, then from top-level `<key>`; later sources win.
    /// Out-of-range values are clamped and unparsable ones ignored.
    pub fn from_payload(payload: &EventPayload) -> Result<Self> {
        let name = match payload.get("effect").map(str::trim) {
            Some(name) if is_known_effect(name) => name,
            Some(name) => return Err(Error::InvalidEffect(name.to_string())),
            None => return Err(Error::InvalidEffect(String::new())),
        };

        let mut settings = Self {
            effect: name.to_string(),
            ..Self::default()
        };

        settings.apply(payload, "params.");
        if let Some(Value::Object(map)) = payload
            .get("params")
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
        {
            settings.apply(&EventPayload::from_value(&Value::Object(map)), "");
        }
        settings.apply(payload, "");

        Ok(settings)
    }

    fn apply(&mut self, payload: &EventPayload, prefix: &str) {
        let key = |name: &str| format!("{}{}", prefix, name);

        if let Some(v) = payload.get_f64(&key("intensity")).filter(|v| v.is_finite()) {
            self.intensity = v.clamp(0.0, 1.0);
        }
        if let Some(v) = payload.get_f64(&key("radius")).filter(|v| v.is_finite()) {
            self.radius = v.max(0.0);
        }
        if let Some(v) = payload.get_i64(&key("pixelSize")) {
            self.pixel_size = v.max(1);
        }
    }

    /// `{effect, intensity, radius, pixelSize}`
    pub fn to_json(&self) -> Value {
        json!({
            "effect": self.effect,
            "intensity": self.intensity,
            "radius": self.radius,
            "pixelSize": self.pixel_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(value: Value) -> EventPayload {
        EventPayload::from_value(&value)
    }

    #[test]
    fn test_defaults() {
        let settings = EffectSettings::from_payload(&payload(json!({"effect": "sepia"}))).unwrap();
        assert_eq!(settings.effect, "sepia");
        assert_eq!(settings.intensity, 0.5);
        assert_eq!(settings.radius, 1.0);
        assert_eq!(settings.pixel_size, 10);
    }

    #[test]
    fn test_unknown_or_missing_effect() {
        let err = EffectSettings::from_payload(&payload(json!({"effect": "swirl"}))).unwrap_err();
        assert!(matches!(err, Error::InvalidEffect(ref name) if name == "swirl"));
        assert_eq!(err.code(), "invalid_effect");

        assert!(EffectSettings::from_payload(&payload(json!({"intensity": 1}))).is_err());
    }

    #[test]
    fn test_clamping() {
        let settings = EffectSettings::from_payload(&payload(json!({
            "effect": "pixelate",
            "intensity": 3.5,
            "radius": -2,
            "pixelSize": 0,
        })))
        .unwrap();
        assert_eq!(settings.intensity, 1.0);
        assert_eq!(settings.radius, 0.0);
        assert_eq!(settings.pixel_size, 1);
    }

    #[test]
    fn test_top_level_overrides_params() {
        let settings = EffectSettings::from_payload(&payload(json!({
            "effect": "blur",
            "params": {"intensity": 0.2, "radius": 4.0},
            "radius": 2.5,
        })))
        .unwrap();
        assert_eq!(settings.intensity, 0.2);
        assert_eq!(settings.radius, 2.5);
    }

    #[test]
    fn test_params_as_json_string() {
        let settings = EffectSettings::from_payload(&payload(json!({
            "effect": "vignette",
            "params": "{\"intensity\": 0.75, \"pixelSize\": \"12\"}",
        })))
        .unwrap();
        assert_eq!(settings.intensity, 0.75);
        assert_eq!(settings.pixel_size, 12);
    }

    #[test]
    fn test_unparsable_values_ignored() {
        let settings = EffectSettings::from_payload(&payload(json!({
            "effect": "invert",
            "intensity": "strong",
            "radius": "NaN",
        })))
        .unwrap();
        assert_eq!(settings.intensity, 0.5);
        assert_eq!(settings.radius, 1.0);
    }

    #[test]
    fn test_to_json() {
        let value = EffectSettings::default().to_json();
        assert_eq!(
            value,
            json!({"effect": "none", "intensity": 0.5, "radius": 1.0, "pixelSize": 10})
        );
    }
}
