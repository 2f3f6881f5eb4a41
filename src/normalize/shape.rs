//! Vendor payload layouts
//!
//! Realtime payloads come flat (`ppv1`, `pmeter_l1`, ...) or nested
//! (`ppvDetail`, `pgridDetail`). Daily statistics come as per-day arrays
//! indexed by day of month, or as named totals of the queried day.

use super::TodayFormula;
use crate::config::ApiGeneration;
use crate::error::{BridgeError, Result};
use chrono::{Datelike, NaiveDate};
use serde_json::{Map, Value, json};

/// Instantaneous power readings with absent fields read as zero
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PowerReadings {
    pub grid_phases: [f64; 3],
    pub pv_strings: [f64; 4],
    /// DC-coupled PV meter, for generations that report one
    pub dc_meter: Option<f64>,
    pub battery: f64,
    pub soc: f64,
}

impl PowerReadings {
    pub fn grid(&self) -> f64 {
        self.grid_phases.iter().sum()
    }

    pub fn modules(&self) -> f64 {
        self.pv_strings.iter().sum::<f64>() + self.dc_meter.unwrap_or(0.0)
    }

    pub fn consumption(&self) -> f64 {
        self.grid() + self.modules() + self.battery
    }
}

/// Daily energy figures of one day; `None` when the vendor omitted a field
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DailyFigures {
    pub load: Option<f64>,
    pub output: Option<f64>,
    pub input: Option<f64>,
    pub pv: Option<f64>,
    pub charge: Option<f64>,
    pub discharge: Option<f64>,
    pub grid_charge: Option<f64>,
    pub charging_pile: Option<f64>,
}

/// `today.*` values of the output document
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TodayAggregate {
    pub consumption: f64,
    pub grid_supply: f64,
    pub grid_purchase: f64,
    pub modules: f64,
    pub battery_charge: f64,
    pub battery_discharge: f64,
}

/// Translation between one generation's payloads and the uniform readings
pub trait VendorShapeAdapter: Send + Sync {
    fn generation(&self) -> ApiGeneration;

    fn formula(&self) -> TodayFormula;

    fn parse_realtime(&self, raw: &Value) -> Result<PowerReadings>;

    /// Extract the figures of `today` from a daily statistics payload
    fn parse_statistics(&self, daily: &Value, today: NaiveDate) -> Result<DailyFigures>;

    /// Realtime payload with every reading at zero
    fn zero_realtime(&self) -> Value;

    fn compute_today_aggregate(&self, figures: &DailyFigures) -> TodayAggregate {
        TodayAggregate {
            consumption: self.formula().apply(figures),
            grid_supply: figures.output.unwrap_or(0.0),
            grid_purchase: figures.input.unwrap_or(0.0),
            modules: figures.pv.unwrap_or(0.0),
            battery_charge: figures.charge.unwrap_or(0.0),
            battery_discharge: figures.discharge.unwrap_or(0.0),
        }
    }
}

/// Numeric reading that tolerates strings and nulls
pub(crate) fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn field(map: &Map<String, Value>, key: &str) -> f64 {
    number(map.get(key)).unwrap_or(0.0)
}

fn object<'a>(raw: &'a Value, what: &str) -> Result<&'a Map<String, Value>> {
    raw.as_object()
        .ok_or_else(|| BridgeError::parse(format!("{} payload is not an object", what)))
}

fn parse_flat_realtime(raw: &Value, with_dc_meter: bool) -> Result<PowerReadings> {
    let map = object(raw, "realtime")?;
    Ok(PowerReadings {
        grid_phases: [
            field(map, "pmeter_l1"),
            field(map, "pmeter_l2"),
            field(map, "pmeter_l3"),
        ],
        pv_strings: [
            field(map, "ppv1"),
            field(map, "ppv2"),
            field(map, "ppv3"),
            field(map, "ppv4"),
        ],
        dc_meter: with_dc_meter.then(|| field(map, "pmeter_dc")),
        battery: field(map, "pbat"),
        soc: field(map, "soc"),
    })
}

fn flat_zero(with_dc_meter: bool) -> Value {
    let mut zero = json!({
        "ppv1": 0, "ppv2": 0, "ppv3": 0, "ppv4": 0,
        "pmeter_l1": 0, "pmeter_l2": 0, "pmeter_l3": 0,
        "pbat": 0, "soc": 0
    });
    if with_dc_meter {
        zero["pmeter_dc"] = json!(0);
    }
    zero
}

fn parse_named_statistics(daily: &Value) -> Result<DailyFigures> {
    // some endpoints wrap the day in a one-element list
    let daily = match daily {
        Value::Array(items) => items.first().unwrap_or(&Value::Null),
        other => other,
    };
    let map = object(daily, "daily statistics")?;
    Ok(DailyFigures {
        load: number(map.get("eLoad")),
        output: number(map.get("eOutput")),
        input: number(map.get("eInput")),
        pv: number(map.get("epv")),
        charge: number(map.get("eCharge")),
        discharge: number(map.get("eDischarge")),
        grid_charge: number(map.get("eGridCharge")),
        charging_pile: number(map.get("eChargingPile")),
    })
}

/// Session-token API: flat realtime, per-day arrays
#[derive(Debug, Clone, Copy)]
pub struct LegacyShape {
    pub formula: TodayFormula,
}

impl LegacyShape {
    /// Position of `today` in the per-day arrays
    pub fn day_index(today: NaiveDate) -> usize {
        today.day0() as usize
    }
}

impl VendorShapeAdapter for LegacyShape {
    fn generation(&self) -> ApiGeneration {
        ApiGeneration::Legacy
    }

    fn formula(&self) -> TodayFormula {
        self.formula
    }

    fn parse_realtime(&self, raw: &Value) -> Result<PowerReadings> {
        parse_flat_realtime(raw, false)
    }

    fn parse_statistics(&self, daily: &Value, today: NaiveDate) -> Result<DailyFigures> {
        let map = object(daily, "daily statistics")?;
        let index = Self::day_index(today);
        let at = |key: &str| {
            map.get(key)
                .and_then(Value::as_array)
                .and_then(|days| number(days.get(index)))
        };
        Ok(DailyFigures {
            load: at("Eloads"),
            output: at("Eoutputs"),
            input: at("Einputs"),
            pv: at("Epvs"),
            charge: at("ECharge"),
            discharge: at("EDischarge"),
            grid_charge: at("EGridCharge"),
            charging_pile: at("EChargingPile"),
        })
    }

    fn zero_realtime(&self) -> Value {
        flat_zero(false)
    }
}

/// Signed portal API: flat realtime with DC meter, named daily totals
#[derive(Debug, Clone, Copy)]
pub struct PortalShape {
    pub formula: TodayFormula,
}

impl VendorShapeAdapter for PortalShape {
    fn generation(&self) -> ApiGeneration {
        ApiGeneration::Portal
    }

    fn formula(&self) -> TodayFormula {
        self.formula
    }

    fn parse_realtime(&self, raw: &Value) -> Result<PowerReadings> {
        parse_flat_realtime(raw, true)
    }

    fn parse_statistics(&self, daily: &Value, _today: NaiveDate) -> Result<DailyFigures> {
        parse_named_statistics(daily)
    }

    fn zero_realtime(&self) -> Value {
        flat_zero(true)
    }
}

/// Open API: nested realtime details, named daily totals
#[derive(Debug, Clone, Copy)]
pub struct OpenApiShape {
    pub formula: TodayFormula,
}

impl VendorShapeAdapter for OpenApiShape {
    fn generation(&self) -> ApiGeneration {
        ApiGeneration::OpenApi
    }

    fn formula(&self) -> TodayFormula {
        self.formula
    }

    fn parse_realtime(&self, raw: &Value) -> Result<PowerReadings> {
        let map = object(raw, "realtime")?;

        let pv_strings = match map.get("ppvDetail").and_then(Value::as_object) {
            Some(d) => [
                field(d, "ppv1"),
                field(d, "ppv2"),
                field(d, "ppv3"),
                field(d, "ppv4"),
            ],
            None => [field(map, "ppv"), 0.0, 0.0, 0.0],
        };
        let dc_meter = map
            .get("ppvDetail")
            .and_then(Value::as_object)
            .map(|d| field(d, "pmeterDc"));
        let grid_phases = match map.get("pgridDetail").and_then(Value::as_object) {
            Some(d) => [
                field(d, "pmeterL1"),
                field(d, "pmeterL2"),
                field(d, "pmeterL3"),
            ],
            None => [field(map, "pgrid"), 0.0, 0.0],
        };

        Ok(PowerReadings {
            grid_phases,
            pv_strings,
            dc_meter,
            battery: field(map, "pbat"),
            soc: field(map, "soc"),
        })
    }

    fn parse_statistics(&self, daily: &Value, _today: NaiveDate) -> Result<DailyFigures> {
        parse_named_statistics(daily)
    }

    fn zero_realtime(&self) -> Value {
        json!({
            "ppv": 0,
            "ppvDetail": {"ppv1": 0, "ppv2": 0, "ppv3": 0, "ppv4": 0, "pmeterDc": 0},
            "pgrid": 0,
            "pgridDetail": {"pmeterL1": 0, "pmeterL2": 0, "pmeterL3": 0},
            "pbat": 0,
            "soc": 0
        })
    }
}
