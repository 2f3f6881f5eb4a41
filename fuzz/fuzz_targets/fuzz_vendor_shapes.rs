#![no_main]
use alphaess_bridge::config::ApiGeneration;
use alphaess_bridge::normalize::{TodayFormula, build_adapter};
use chrono::NaiveDate;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    let Some(today) = NaiveDate::from_ymd_opt(2024, 5, 3) else {
        return;
    };

    // Every generation must tolerate arbitrary payload shapes
    for generation in [ApiGeneration::Legacy, ApiGeneration::Portal, ApiGeneration::OpenApi] {
        let adapter = build_adapter(generation, TodayFormula::default_for(generation));
        let _ = adapter.parse_realtime(&raw);
        if let Ok(figures) = adapter.parse_statistics(&raw, today) {
            let _ = adapter.compute_today_aggregate(&figures);
        }
    }
});
