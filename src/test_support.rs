use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};

use skymerge::{RawPayload, Skymerge, SourceId, Timestamp, TranslatorConfig};

/// Realtime station table: metric units, an enumeration, a gated gust
/// reading, a derived dew point, and an alias.
#[allow(dead_code)]
pub fn station_table() -> TranslatorConfig {
    TranslatorConfig::from_json(
        r#"{
        "enums": {
            "PrecipitationType": { "0": "None", "1": "Rain", "2": "Snow" }
        },
        "timestamp_key": "time_epoch",
        "timestamp_unit": "seconds",
        "sections": { "obs": "now" },
        "fields": [
            { "source_key": "air_temperature", "key": "environment.temperature.temperature", "unit": "c" },
            { "source_key": ["relative_humidity", "rh"], "key": "environment.humidity.humidity", "unit": "percent" },
            { "source_key": "wind_avg", "key": "environment.wind.speed.speed", "unit": "mps" },
            { "source_key": "wind_direction", "key": "environment.wind.direction.direction", "unit": "deg" },
            { "source_key": "wind_gust", "key": "environment.wind.gust.gust", "unit": "mps",
              "requires": { "environment.wind.speed.speed": { "op": "gt", "value": 0.0 } } },
            { "source_key": "station_pressure", "key": "environment.pressure.pressure", "unit": "hpa" },
            { "source_key": "precip_type", "key": "environment.precipitation.type.type",
              "unit": "enum:PrecipitationType", "format": "integer" },
            { "source_key": "precip_accum", "key": "environment.precipitation.amount.amount",
              "unit": "mm", "default": 0.0 },
            { "key": "environment.temperature.dewpoint", "unit": "c",
              "calc": { "kind": "dew-point",
                        "temperature": "environment.temperature.temperature",
                        "humidity": "environment.humidity.humidity" } },
            { "key": "environment.temperature.feelslike",
              "alias_of": "environment.temperature.temperature" }
        ]
    }"#,
    )
    .expect("station table parses")
}

/// Forecast-service table: imperial spellings and a three-section data map,
/// so cross-source merges exercise unit conversion and period fallback.
#[allow(dead_code)]
pub fn forecast_table() -> TranslatorConfig {
    TranslatorConfig::from_json(
        r#"{
        "timestamp_key": "time",
        "timestamp_unit": "seconds",
        "sections": { "current": "now", "hourly": "hour", "daily": "day" },
        "fields": [
            { "source_key": "temperature_2m", "key": "environment.temperature.temperature", "unit": "f" },
            { "source_key": "relativehumidity_2m", "key": "environment.humidity.humidity", "unit": "percent" },
            { "source_key": "windspeed_10m", "key": "environment.wind.speed.speed", "unit": "mph" },
            { "source_key": "pressure_msl", "key": "environment.pressure.pressure", "unit": "hpa" },
            { "source_key": "precipitation", "key": "environment.precipitation.amount.amount", "unit": "in" }
        ]
    }"#,
    )
    .expect("forecast table parses")
}

fn object(value: Value) -> RawPayload {
    match value {
        Value::Object(map) => map,
        _ => unreachable!("payload builders emit objects"),
    }
}

/// One well-formed station payload.
#[allow(dead_code)]
pub fn station_payload(timestamp: Timestamp, celsius: f64, humidity: f64) -> RawPayload {
    object(json!({
        "time_epoch": timestamp,
        "air_temperature": celsius,
        "relative_humidity": humidity,
        "wind_avg": 3.2,
        "wind_gust": 5.8,
        "wind_direction": 270,
        "station_pressure": 1013.2,
        "precip_type": 0
    }))
}

/// A burst of station payloads spaced one minute apart, with jittered
/// readings and occasionally missing optional fields.
#[allow(dead_code)]
pub fn station_burst(start: Timestamp, count: u32, seed: u64) -> Vec<RawPayload> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut payloads = Vec::with_capacity(count as usize);

    for i in 0..count {
        let mut payload = object(json!({
            "time_epoch": start + i as i64 * 60,
            "air_temperature": rng.random_range(-10.0..35.0),
            "relative_humidity": rng.random_range(20.0..100.0),
            "wind_avg": rng.random_range(0.0..20.0),
            "wind_direction": rng.random_range(0..360),
            "station_pressure": rng.random_range(980.0..1040.0),
            "precip_type": rng.random_range(0..3)
        }));
        if rng.random_bool(0.5) {
            payload.insert("wind_gust".to_string(), json!(rng.random_range(0.0..30.0)));
        }
        if rng.random_bool(0.3) {
            payload.insert("precip_accum".to_string(), json!(rng.random_range(0.0..5.0)));
        }
        payloads.push(payload);
    }

    payloads
}

/// A multi-section forecast document with a current block and `hours`
/// hourly entries.
#[allow(dead_code)]
pub fn forecast_document(start: Timestamp, hours: u32) -> Value {
    let mut rng = StdRng::seed_from_u64(start as u64);
    let hourly: Vec<Value> = (0..hours)
        .map(|i| {
            json!({
                "time": start + i as i64 * 3_600,
                "temperature_2m": rng.random_range(30.0..90.0),
                "relativehumidity_2m": rng.random_range(20.0..100.0),
                "windspeed_10m": rng.random_range(0.0..40.0),
                "precipitation": rng.random_range(0.0..0.5)
            })
        })
        .collect();

    json!({
        "current": {
            "time": start,
            "temperature_2m": 68.0,
            "relativehumidity_2m": 55.0,
            "windspeed_10m": 8.0,
            "pressure_msl": 1015.0
        },
        "hourly": hourly
    })
}

/// An engine with the station and forecast sources registered, station
/// first (rank 0).
#[allow(dead_code)]
pub fn two_source_engine() -> (Skymerge, SourceId, SourceId) {
    let engine = Skymerge::new();
    let station = engine
        .register_source("station", &station_table())
        .expect("station registers");
    let forecast = engine
        .register_source("forecast", &forecast_table())
        .expect("forecast registers");
    (engine, station, forecast)
}
