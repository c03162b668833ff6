use chrono::{Days, Utc};
use serde_json::{Value, json};

use crate::{Arguments, ToolFailure};

const MAX_DAYS: i64 = 7;

pub(super) fn execute(args: &Arguments) -> Result<Value, ToolFailure> {
    let latitude = args.require_f64("latitude")?;
    let longitude = args.require_f64("longitude")?;
    let days = args.i64("days").unwrap_or(3);
    let include_wind = args.bool("include_wind").unwrap_or(true);
    let include_waves = args.bool("include_waves").unwrap_or(true);
    let include_tides = args.bool("include_tides").unwrap_or(false);

    let today = Utc::now().date_naive();
    let mut forecasts = Vec::new();

    for i in 0..days.clamp(0, MAX_DAYS) {
        let date = today
            .checked_add_days(Days::new(i as u64))
            .unwrap_or(today);

        let mut day = json!({
            "date": date.format("%Y-%m-%d").to_string(),
            "temperature": {
                "high": 22 + i,
                "low": 16 + i,
                "water": 19
            },
            "conditions": if i % 2 == 0 { "Partly cloudy" } else { "Clear" },
            "visibility": if i < 3 { "Good" } else { "Moderate" },
            "precipitation": if i > 2 { 10 } else { 0 }
        });

        if include_wind {
            day["wind"] = json!({
                "speed": 10 + i * 2,
                "direction": if i % 2 == 0 { "NW" } else { "SW" },
                "gusts": 15 + i * 2
            });
        }
        if include_waves {
            day["waves"] = json!({
                "height": 1.0 + i as f64 * 0.3,
                "period": 5 + i,
                "direction": "W"
            });
        }
        if include_tides {
            day["tides"] = json!([
                {"time": "06:30", "type": "high", "height": 1.2},
                {"time": "12:45", "type": "low", "height": 0.3},
                {"time": "18:30", "type": "high", "height": 1.4},
                {"time": "00:45", "type": "low", "height": 0.4}
            ]);
        }

        forecasts.push(day);
    }

    let warnings: Vec<&str> = if days > 2 {
        vec!["Small craft advisory in effect"]
    } else {
        Vec::new()
    };

    Ok(json!({
        "location": {
            "latitude": latitude,
            "longitude": longitude
        },
        "forecast": forecasts,
        "warnings": warnings
    }))
}
