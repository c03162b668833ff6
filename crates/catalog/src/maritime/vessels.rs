use serde_json::{Value, json};

use crate::{Arguments, ToolFailure};

pub(super) fn execute(args: &Arguments) -> Result<Value, ToolFailure> {
    let vessels = json!([
        {
            "name": "SETUR STAR",
            "imo": "IMO9876543",
            "mmsi": "271234567",
            "type": "passenger",
            "length": 45.0,
            "latitude": 40.9876,
            "longitude": 29.1234,
            "speed": 12.5,
            "course": 180,
            "status": "underway",
            "destination": "Kalamış Marina",
            "eta": "2025-11-10 14:00"
        },
        {
            "name": "MARITIME QUEEN",
            "imo": "IMO9876544",
            "mmsi": "271234568",
            "type": "yacht",
            "length": 120.0,
            "latitude": 40.9800,
            "longitude": 29.1200,
            "speed": 8.0,
            "course": 270,
            "status": "at_anchor",
            "destination": "Istanbul",
            "eta": "2025-11-10 16:00"
        },
        {
            "name": "CARGO EXPRESS",
            "imo": "IMO9876545",
            "mmsi": "271234569",
            "type": "cargo",
            "length": 180.0,
            "latitude": 40.9700,
            "longitude": 29.1300,
            "speed": 15.0,
            "course": 90,
            "status": "underway",
            "destination": "Ambarlı",
            "eta": "2025-11-10 18:00"
        }
    ]);

    let Value::Array(mut results) = vessels else {
        return Ok(Value::Array(Vec::new()));
    };

    if let Some(imo) = args.str("imo_number") {
        results.retain(|v| v["imo"] == imo);
    }
    if let Some(mmsi) = args.str("mmsi") {
        results.retain(|v| v["mmsi"] == mmsi);
    }
    if let Some(kind) = args.str("vessel_type") {
        results.retain(|v| v["type"] == kind);
    }
    if let Some(min) = args.f64("min_length") {
        results.retain(|v| v["length"].as_f64().is_some_and(|l| l >= min));
    }
    // Region is accepted but every mock vessel is in the same area.

    Ok(Value::Array(results))
}
