//! Demo maritime catalog.
//!
//! Three mock servers with canned data, used by the CLI and the end-to-end
//! tests. Each tool is a pure filter over a fixed dataset.

mod berth;
mod forecast;
mod ports;
mod vessels;

use crate::{Catalog, ParamKind, ParamSpec, Result, ToolDescriptor};

pub const MARITIME_DATA: &str = "maritime-data";
pub const BERTH_MANAGEMENT: &str = "berth-management";
pub const WEATHER: &str = "weather";

/// Build the demo catalog.
pub fn catalog() -> Result<Catalog> {
    let catalog = Catalog::builder()
        .with(
            ToolDescriptor::new(
                MARITIME_DATA,
                "vessel_tracking",
                "Vessel tracking tool - track vessels by region, IMO number, or MMSI. \
                 Returns vessel position, speed, course, and status information.",
            )
            .with_category("maritime")
            .with_param(ParamSpec::optional("region", ParamKind::String).describe("Geographic region"))
            .with_param(ParamSpec::optional("imo_number", ParamKind::String).describe("IMO number"))
            .with_param(ParamSpec::optional("mmsi", ParamKind::String).describe("Maritime Mobile Service Identity"))
            .with_param(ParamSpec::optional("vessel_type", ParamKind::String).describe("cargo, tanker, passenger, yacht"))
            .with_param(ParamSpec::optional("min_length", ParamKind::Number).describe("Minimum length in meters")),
            vessels::execute,
        )?
        .with(
            ToolDescriptor::new(
                MARITIME_DATA,
                "port_info",
                "Port and marina information tool. Returns details about ports, marinas, \
                 berths, and facilities.",
            )
            .with_category("maritime")
            .with_param(ParamSpec::optional("port_name", ParamKind::String))
            .with_param(ParamSpec::optional("country", ParamKind::String))
            .with_param(ParamSpec::optional("port_type", ParamKind::String).describe("marina, commercial, naval"))
            .with_param(ParamSpec::optional("has_fuel", ParamKind::Boolean)),
            ports::execute,
        )?
        .with(
            ToolDescriptor::new(
                BERTH_MANAGEMENT,
                "check_availability",
                "Check berth availability at marina for a vessel and date range.",
            )
            .with_category("maritime")
            .with_param(ParamSpec::required("marina_id", ParamKind::String))
            .with_param(ParamSpec::required("vessel_length", ParamKind::Number).describe("Vessel length in meters"))
            .with_param(ParamSpec::required("start_date", ParamKind::String).describe("YYYY-MM-DD"))
            .with_param(ParamSpec::required("end_date", ParamKind::String).describe("YYYY-MM-DD"))
            .with_param(ParamSpec::optional("vessel_type", ParamKind::String).describe("motor, sail, catamaran")),
            berth::execute,
        )?
        .with(
            ToolDescriptor::new(
                WEATHER,
                "marine_forecast",
                "Marine weather forecast tool. Provides weather forecasts for maritime operations.",
            )
            .with_category("weather")
            .with_param(ParamSpec::required("latitude", ParamKind::Number))
            .with_param(ParamSpec::required("longitude", ParamKind::Number))
            .with_param(ParamSpec::optional("days", ParamKind::Integer).describe("1-7, default 3"))
            .with_param(ParamSpec::optional("include_wind", ParamKind::Boolean))
            .with_param(ParamSpec::optional("include_waves", ParamKind::Boolean))
            .with_param(ParamSpec::optional("include_tides", ParamKind::Boolean)),
            forecast::execute,
        )?
        .build();
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Arguments, SearchQuery, ToolLoader};
    use serde_json::json;
    use std::sync::Arc;

    fn loader() -> ToolLoader {
        ToolLoader::new(Arc::new(catalog().unwrap()))
    }

    #[test]
    fn demo_servers() {
        assert_eq!(
            catalog().unwrap().list_servers(),
            vec![MARITIME_DATA, BERTH_MANAGEMENT, WEATHER]
        );
    }

    #[test]
    fn vessel_search_finds_tracking_tool() {
        let found = catalog()
            .unwrap()
            .search(&SearchQuery::new("vessel").category("maritime"));
        assert_eq!(found[0].name, "vessel_tracking");
    }

    #[test]
    fn vessel_tracking_returns_all_three_without_filters() {
        let out = loader()
            .load_tool(MARITIME_DATA, "vessel_tracking")
            .unwrap()
            .invoke(&Arguments::new().with("region", "Mediterranean"))
            .unwrap();
        let lengths: Vec<f64> = out
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["length"].as_f64().unwrap())
            .collect();
        assert_eq!(lengths, vec![45.0, 120.0, 180.0]);
    }

    #[test]
    fn vessel_tracking_filters_by_type() {
        let out = loader()
            .load_tool(MARITIME_DATA, "vessel_tracking")
            .unwrap()
            .invoke(&Arguments::new().with("vessel_type", "yacht"))
            .unwrap();
        assert_eq!(out.as_array().unwrap().len(), 1);
        assert_eq!(out[0]["name"], json!("MARITIME QUEEN"));
    }

    #[test]
    fn port_info_filters_by_country_case_insensitively() {
        let out = loader()
            .load_tool(MARITIME_DATA, "port_info")
            .unwrap()
            .invoke(&Arguments::new().with("country", "turkey"))
            .unwrap();
        assert_eq!(out.as_array().unwrap().len(), 2);
    }

    #[test]
    fn no_match_is_an_empty_list() {
        let out = loader()
            .load_tool(MARITIME_DATA, "port_info")
            .unwrap()
            .invoke(&Arguments::new().with("country", "Norway"))
            .unwrap();
        assert_eq!(out, json!([]));
    }

    #[test]
    fn availability_prices_the_stay() {
        let out = loader()
            .load_tool(BERTH_MANAGEMENT, "check_availability")
            .unwrap()
            .invoke(
                &Arguments::new()
                    .with("marina_id", "Kalamış Marina")
                    .with("vessel_length", 18.5)
                    .with("start_date", "2025-11-15")
                    .with("end_date", "2025-11-20"),
            )
            .unwrap();
        assert_eq!(out["available_berths"], json!(1));
        assert_eq!(out["period"]["days"], json!(5));
        assert_eq!(out["berths"][0]["berth_id"], json!("B-08"));
        assert_eq!(out["berths"][0]["total_cost"], json!(1000));
    }

    #[test]
    fn availability_rejects_bad_dates() {
        let err = loader()
            .load_tool(BERTH_MANAGEMENT, "check_availability")
            .unwrap()
            .invoke(
                &Arguments::new()
                    .with("marina_id", "x")
                    .with("vessel_length", 10)
                    .with("start_date", "15/11/2025")
                    .with("end_date", "2025-11-20"),
            )
            .unwrap_err();
        assert!(err.to_string().contains("invalid start_date"));
    }

    #[test]
    fn forecast_caps_days_and_warns() {
        let out = loader()
            .load_tool(WEATHER, "marine_forecast")
            .unwrap()
            .invoke(
                &Arguments::new()
                    .with("latitude", 40.98)
                    .with("longitude", 29.04)
                    .with("days", 10),
            )
            .unwrap();
        assert_eq!(out["forecast"].as_array().unwrap().len(), 7);
        assert_eq!(out["warnings"], json!(["Small craft advisory in effect"]));
        assert_eq!(out["forecast"][0]["wind"]["speed"], json!(10));
        assert!(out["forecast"][0].get("tides").is_none());
    }
}
