//! The emitted document

use schemars::JsonSchema;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Uniform metrics document, independent of the vendor generation
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct OutputDocument {
    /// Vendor code of the realtime response
    pub code: i64,
    /// Vendor message of the realtime response
    pub info: String,
    pub payload: Payload,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, JsonSchema)]
pub struct Payload {
    /// Grid + PV + battery power (W)
    pub consumption: f64,
    /// Sum of grid phase powers (W); positive is import
    pub grid: f64,
    /// PV string powers plus DC meter (W)
    pub modules: f64,
    pub battery: BatteryNow,
    pub today: Today,
    pub rawdata: RawData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, JsonSchema)]
pub struct BatteryNow {
    /// State of charge (%)
    pub soc: f64,
    /// Battery power (W); positive is discharge
    pub load: f64,
}

/// Energy totals of the current day (kWh)
#[derive(Debug, Clone, Default, PartialEq, Serialize, JsonSchema)]
pub struct Today {
    pub consumption: f64,
    pub grid: TodayGrid,
    pub modules: f64,
    pub battery: TodayBattery,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, JsonSchema)]
pub struct TodayGrid {
    /// Fed into the grid
    pub supply: f64,
    /// Bought from the grid
    pub purchase: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, JsonSchema)]
pub struct TodayBattery {
    pub charge: f64,
    pub discharge: f64,
}

/// Untouched vendor payloads
#[derive(Debug, Clone, Default, PartialEq, Serialize, JsonSchema)]
pub struct RawData {
    pub realtime: Value,
    /// Keyed by granularity name; `null` for caches without data
    pub statistics: BTreeMap<String, Value>,
}
