//! Normalization into the uniform output document
//!
//! `Normalizer::build` is a pure function of the realtime snapshot, the
//! statistics view and the local calendar date. Vendor differences live
//! behind [`VendorShapeAdapter`].

use crate::config::ApiGeneration;
use crate::error::Result;
use crate::realtime::RealtimeSnapshot;
use crate::stats::{Granularity, StatisticsView};
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub mod document;
pub mod shape;

pub use document::{BatteryNow, OutputDocument, Payload, RawData, Today, TodayBattery, TodayGrid};
pub use shape::{
    DailyFigures, LegacyShape, OpenApiShape, PortalShape, PowerReadings, TodayAggregate,
    VendorShapeAdapter,
};

/// How `today.consumption` is derived from the daily figures.
///
/// Each vendor generation approximates the day's consumption differently and
/// the results are not interchangeable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TodayFormula {
    /// Per-day load array entry
    DailyLoadIndex,
    /// `eDischarge + eChargingPile`
    DischargePlusChargingPile,
    /// `eInput + epv - eOutput - eGridCharge`
    EnergyBalance,
}

impl TodayFormula {
    pub fn default_for(generation: ApiGeneration) -> Self {
        match generation {
            ApiGeneration::Legacy => Self::DailyLoadIndex,
            ApiGeneration::Portal => Self::DischargePlusChargingPile,
            ApiGeneration::OpenApi => Self::EnergyBalance,
        }
    }

    pub fn apply(&self, f: &DailyFigures) -> f64 {
        let v = |x: Option<f64>| x.unwrap_or(0.0);
        match self {
            Self::DailyLoadIndex => v(f.load),
            Self::DischargePlusChargingPile => v(f.discharge) + v(f.charging_pile),
            Self::EnergyBalance => v(f.input) + v(f.pv) - v(f.output) - v(f.grid_charge),
        }
    }
}

/// Adapter for the configured generation
pub fn build_adapter(
    generation: ApiGeneration,
    formula: TodayFormula,
) -> Arc<dyn VendorShapeAdapter> {
    match generation {
        ApiGeneration::Legacy => Arc::new(LegacyShape { formula }),
        ApiGeneration::Portal => Arc::new(PortalShape { formula }),
        ApiGeneration::OpenApi => Arc::new(OpenApiShape { formula }),
    }
}

pub struct Normalizer;

impl Normalizer {
    /// Build the document. Fails only when the realtime payload is unusable;
    /// unreadable daily statistics yield zeroed `today` values.
    pub fn build(
        adapter: &dyn VendorShapeAdapter,
        realtime: &RealtimeSnapshot,
        statistics: &StatisticsView,
        today: NaiveDate,
    ) -> Result<OutputDocument> {
        let readings = adapter.parse_realtime(&realtime.data)?;

        let figures = statistics
            .get(&Granularity::Daily)
            .and_then(|s| s.trusted_data())
            .and_then(|daily| adapter.parse_statistics(daily, today).ok())
            .unwrap_or_default();
        let agg = adapter.compute_today_aggregate(&figures);

        let rawdata = RawData {
            realtime: realtime.data.clone(),
            statistics: statistics
                .iter()
                .map(|(g, s)| {
                    (
                        g.as_str().to_string(),
                        s.trusted_data().cloned().unwrap_or(Value::Null),
                    )
                })
                .collect(),
        };

        Ok(OutputDocument {
            code: realtime.code,
            info: realtime.info.clone(),
            payload: Payload {
                consumption: readings.consumption(),
                grid: readings.grid(),
                modules: readings.modules(),
                battery: BatteryNow {
                    soc: readings.soc,
                    load: readings.battery,
                },
                today: Today {
                    consumption: agg.consumption,
                    grid: TodayGrid {
                        supply: agg.grid_supply,
                        purchase: agg.grid_purchase,
                    },
                    modules: agg.modules,
                    battery: TodayBattery {
                        charge: agg.battery_charge,
                        discharge: agg.battery_discharge,
                    },
                },
                rawdata,
            },
        })
    }
}
