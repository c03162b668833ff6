use serde_json::{Value, json};

use crate::{Arguments, ToolFailure};

pub(super) fn execute(args: &Arguments) -> Result<Value, ToolFailure> {
    let ports = json!([
        {
            "name": "Kalamış Marina",
            "country": "Turkey",
            "city": "Istanbul",
            "type": "marina",
            "latitude": 40.9823,
            "longitude": 29.0456,
            "berths": 750,
            "max_length": 50,
            "depth": 4.5,
            "facilities": ["fuel", "water", "electricity", "wifi", "restaurant", "security", "customs"],
            "services": ["maintenance", "repairs", "provisioning"],
            "contact": {
                "phone": "+90-216-XXX-XXXX",
                "email": "info@kalamismarina.com",
                "vhf": "Channel 73"
            }
        },
        {
            "name": "Istanbul Marina",
            "country": "Turkey",
            "city": "Istanbul",
            "type": "marina",
            "latitude": 41.0245,
            "longitude": 28.9785,
            "berths": 420,
            "max_length": 80,
            "depth": 6.0,
            "facilities": ["fuel", "water", "electricity", "wifi", "restaurant", "hotel", "security"],
            "services": ["maintenance", "repairs", "storage"],
            "contact": {
                "phone": "+90-212-XXX-XXXX",
                "email": "info@istanbulmarina.com",
                "vhf": "Channel 71"
            }
        }
    ]);

    let Value::Array(mut results) = ports else {
        return Ok(Value::Array(Vec::new()));
    };

    if let Some(name) = args.str("port_name") {
        let name = name.to_lowercase();
        results.retain(|p| field_contains(p, "name", &name));
    }
    if let Some(country) = args.str("country") {
        let country = country.to_lowercase();
        results.retain(|p| field_contains(p, "country", &country));
    }
    if let Some(kind) = args.str("port_type") {
        results.retain(|p| p["type"] == kind);
    }
    if let Some(has_fuel) = args.bool("has_fuel") {
        results.retain(|p| {
            let fuel = p["facilities"]
                .as_array()
                .is_some_and(|f| f.iter().any(|x| x == "fuel"));
            fuel == has_fuel
        });
    }

    Ok(Value::Array(results))
}

fn field_contains(port: &Value, field: &str, needle: &str) -> bool {
    port[field]
        .as_str()
        .is_some_and(|s| s.to_lowercase().contains(needle))
}
