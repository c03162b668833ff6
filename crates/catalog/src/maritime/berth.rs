use chrono::NaiveDate;
use serde_json::{Value, json};

use crate::{Arguments, ToolFailure};

pub(super) fn execute(args: &Arguments) -> Result<Value, ToolFailure> {
    let marina_id = args.require_str("marina_id")?;
    let vessel_length = args.require_f64("vessel_length")?;
    let start_date = args.require_str("start_date")?;
    let end_date = args.require_str("end_date")?;

    let start = parse_date("start_date", start_date)?;
    let end = parse_date("end_date", end_date)?;
    let days = (end - start).num_days();

    let berths = json!([
        {
            "berth_id": "A-12",
            "length": 15.0,
            "width": 5.0,
            "depth": 3.5,
            "type": "floating",
            "utilities": ["electricity", "water", "wifi"],
            "daily_rate": 150,
            "available": true
        },
        {
            "berth_id": "B-08",
            "length": 20.0,
            "width": 6.0,
            "depth": 4.0,
            "type": "fixed",
            "utilities": ["electricity", "water", "wifi", "cable_tv"],
            "daily_rate": 200,
            "available": true
        },
        {
            "berth_id": "C-15",
            "length": 25.0,
            "width": 7.0,
            "depth": 5.0,
            "type": "floating",
            "utilities": ["electricity", "water", "wifi", "pump_out"],
            "daily_rate": 250,
            "available": false
        }
    ]);

    let suitable: Vec<Value> = berths
        .as_array()
        .into_iter()
        .flatten()
        .filter(|b| {
            b["length"].as_f64().is_some_and(|l| l >= vessel_length)
                && b["available"].as_bool().unwrap_or(false)
        })
        .cloned()
        .map(|mut b| {
            let rate = b["daily_rate"].as_i64().unwrap_or(0);
            b["total_cost"] = json!(rate * days);
            b
        })
        .collect();

    let recommendations: Vec<Value> = suitable.iter().take(2).cloned().collect();

    Ok(json!({
        "marina_id": marina_id,
        "vessel_length": vessel_length,
        "period": {
            "start": start_date,
            "end": end_date,
            "days": days
        },
        "available_berths": suitable.len(),
        "berths": suitable,
        "recommendations": recommendations
    }))
}

fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, ToolFailure> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| ToolFailure::new(format!("invalid {field} '{raw}': {e}")))
}
