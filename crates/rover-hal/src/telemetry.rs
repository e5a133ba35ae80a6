//! Merged telemetry view for the status surface.

use rover_types::Telemetry;

/// Overlay `gateway` onto `store` (gateway keys win) and mirror `voltage`
/// into `battery`.
pub fn merge_telemetry(store: &Telemetry, gateway: &Telemetry) -> Telemetry {
    let mut merged = store.clone();
    merged.extend(gateway.iter().map(|(k, v)| (k.clone(), v.clone())));
    if let Some(voltage) = merged.get("voltage").cloned() {
        merged.insert("battery".to_string(), voltage);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn map(value: Value) -> Telemetry {
        match value {
            Value::Object(map) => map,
            _ => Telemetry::new(),
        }
    }

    #[test]
    fn gateway_keys_win_collisions() {
        let store = map(json!({"state": "CONNECTED", "distance": 100, "fps": 14.5}));
        let gateway = map(json!({"distance": 42, "status": "CONNECTED"}));
        let merged = merge_telemetry(&store, &gateway);
        assert_eq!(merged["distance"], 42);
        assert_eq!(merged["fps"], 14.5);
        assert_eq!(merged["status"], "CONNECTED");
    }

    #[test]
    fn battery_mirrors_voltage() {
        let merged = merge_telemetry(&Telemetry::new(), &map(json!({"voltage": 7.4})));
        assert_eq!(merged["battery"], 7.4);

        let merged = merge_telemetry(&map(json!({"fps": 1.0})), &Telemetry::new());
        assert!(!merged.contains_key("battery"));
    }
}
