//! # Translators
//!
//! Declarative per-source field tables. A translator maps a source's raw
//! field names onto canonical keys and units, applies gating conditions and
//! derived calculations, and carries the routing table ("data map") that
//! assigns raw payload sections to period buckets. Tables are validated once
//! at registration; decoding afterwards never fails, it only skips.

use crate::error::{MergeError, Result};
use crate::key::{CategoryKey, Period, SourceId};
use crate::series::Timestamp;
use crate::units::{EnumUnit, Measurement, Unit};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// A raw payload as handed over by a source adapter.
pub type RawPayload = serde_json::Map<String, Value>;

/// One or several raw field names feeding the same entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceKeys {
    One(String),
    Many(Vec<String>),
}

impl SourceKeys {
    fn iter(&self) -> impl Iterator<Item = &str> {
        match self {
            SourceKeys::One(key) => std::slice::from_ref(key).iter().map(String::as_str),
            SourceKeys::Many(keys) => keys.as_slice().iter().map(String::as_str),
        }
    }
}

/// How a raw value is coerced before the unit is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValueFormat {
    /// JSON number, or a numeric string.
    #[default]
    Number,
    /// Rounded to an integer; the usual format for enumeration codes.
    Integer,
    /// A string; resolved against the enumeration's labels when the entry is
    /// enumeration-typed, otherwise parsed as a number.
    Text,
}

/// Comparison operator for a `requires` condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompareOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

/// Gate on an already-decoded sibling key: the guarded field is only decoded
/// when the condition holds. Thresholds compare against the sibling's value
/// in its declared unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub op: CompareOp,
    pub value: f64,
}

impl Condition {
    fn holds(&self, value: f64) -> bool {
        match self.op {
            CompareOp::Gt => value > self.value,
            CompareOp::Ge => value >= self.value,
            CompareOp::Lt => value < self.value,
            CompareOp::Le => value <= self.value,
            CompareOp::Eq => value == self.value,
            CompareOp::Ne => value != self.value,
        }
    }
}

/// A derived value computed from already-decoded sibling fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum Calculation {
    /// numerator ÷ denominator, e.g. distance over time.
    Ratio { numerator: String, denominator: String },
    /// A sibling scaled by a constant factor.
    Scale { of: String, factor: f64 },
    /// Sum of several siblings of one dimension.
    Sum { of: Vec<String> },
    /// Magnus-formula dew point from temperature and relative humidity.
    DewPoint { temperature: String, humidity: String },
}

/// Unit of the raw timestamp field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimestampUnit {
    #[default]
    Seconds,
    Millis,
}

/// One declarative row of a translator table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMap {
    /// Raw field name(s) in the source payload. Absent for calculation and
    /// alias entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_key: Option<SourceKeys>,
    /// Canonical key the decoded value lands under.
    pub key: String,
    /// Unit spelling (`"c"`, `"mps"`, `"mm/h"`, `"enum:PrecipitationType"`).
    /// Ignored for alias entries, which copy the referenced value wholesale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<ValueFormat>,
    /// Fallback when the raw field is present but null or unparseable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<f64>,
    /// Conditions on sibling keys, all of which must hold.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requires: BTreeMap<String, Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calc: Option<Calculation>,
    /// Copy an already-produced value under this entry's key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias_of: Option<String>,
}

/// The serde-loadable translator table for one source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranslatorConfig {
    /// Named enumeration label tables, referenced as `enum:Name`.
    #[serde(default)]
    pub enums: BTreeMap<String, BTreeMap<i64, String>>,
    /// Raw field holding the observation timestamp.
    #[serde(default)]
    pub timestamp_key: Option<String>,
    #[serde(default)]
    pub timestamp_unit: TimestampUnit,
    /// Data map: payload section name → period bucket.
    #[serde(default)]
    pub sections: BTreeMap<String, Period>,
    pub fields: Vec<FieldMap>,
}

impl TranslatorConfig {
    /// Parse a JSON document into a translator configuration.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|err| MergeError::TranslatorConfig {
            source: String::new(),
            detail: err.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
enum Input {
    Raw(Vec<String>),
    Calc(Calc),
    Alias(CategoryKey),
}

#[derive(Debug, Clone)]
enum Calc {
    Ratio {
        numerator: CategoryKey,
        denominator: CategoryKey,
    },
    Scale {
        of: CategoryKey,
        factor: f64,
    },
    Sum {
        of: Vec<CategoryKey>,
    },
    DewPoint {
        temperature: CategoryKey,
        humidity: CategoryKey,
    },
}

#[derive(Debug, Clone)]
struct Entry {
    key: CategoryKey,
    unit: Unit,
    format: ValueFormat,
    default: Option<f64>,
    requires: Vec<(CategoryKey, Condition)>,
    input: Input,
    /// One-shot flag so a mis-ordered calculation is reported once, not per
    /// payload.
    warned: Arc<AtomicBool>,
}

/// Structurally-equal output of one decode pass.
#[derive(Debug, Default, PartialEq)]
pub struct Decoded {
    /// Canonical key → measurement pairs produced by this pass.
    pub values: FxHashMap<CategoryKey, Measurement>,
    /// Mapped fields skipped by a gate, a null, or an unparseable value.
    pub skipped: usize,
    /// Payload fields with no mapping at all.
    pub unmapped: usize,
}

/// A validated per-source translator. Cheap to clone; decode is pure.
#[derive(Debug, Clone)]
pub struct Translator {
    source: SourceId,
    entries: Vec<Entry>,
    by_raw: FxHashMap<String, usize>,
    by_key: FxHashMap<CategoryKey, usize>,
    sections: FxHashMap<String, Period>,
    timestamp_key: Option<String>,
    timestamp_unit: TimestampUnit,
}

impl Translator {
    /// Validate a configuration into a translator. Every problem here is a
    /// registration-time failure; nothing is deferred to the decode path.
    pub fn from_config(source: SourceId, config: &TranslatorConfig) -> Result<Translator> {
        let fail = |detail: String| MergeError::TranslatorConfig {
            source: source.as_str().to_string(),
            detail,
        };

        let enums: BTreeMap<&str, EnumUnit> = config
            .enums
            .iter()
            .map(|(name, labels)| (name.as_str(), EnumUnit::new(name, labels.clone())))
            .collect();

        let mut entries = Vec::with_capacity(config.fields.len());
        let mut by_raw: FxHashMap<String, usize> = FxHashMap::default();
        let mut by_key: FxHashMap<CategoryKey, usize> = FxHashMap::default();

        // First pass: keys, units, raw-name uniqueness
        for field in &config.fields {
            let key = CategoryKey::parse(&field.key)?;
            let index = entries.len();
            if by_key.insert(key.clone(), index).is_some() {
                return Err(fail(format!("duplicate mapping for canonical key {}", key)));
            }

            let input_kind = (
                field.source_key.is_some(),
                field.calc.is_some(),
                field.alias_of.is_some(),
            );
            match input_kind {
                (true, false, false) | (false, true, false) | (false, false, true) => {}
                _ => {
                    return Err(fail(format!(
                        "entry for {} must have exactly one of source_key, calc, alias_of",
                        key
                    )))
                }
            }

            let unit = if field.alias_of.is_some() {
                // Alias entries copy the referenced measurement wholesale
                Unit::Percent
            } else {
                let spelling = field
                    .unit
                    .as_deref()
                    .ok_or_else(|| fail(format!("entry for {} is missing a unit", key)))?;
                if let Some(name) = spelling.strip_prefix("enum:") {
                    let enum_unit = enums
                        .get(name)
                        .ok_or_else(|| fail(format!("unknown enumeration {:?}", name)))?;
                    Unit::Enumeration(enum_unit.clone())
                } else {
                    Unit::parse(spelling)
                        .ok_or_else(|| fail(format!("unknown unit {:?}", spelling)))?
                }
            };

            if let Some(raw_keys) = &field.source_key {
                for raw in raw_keys.iter() {
                    if by_raw.insert(raw.to_string(), index).is_some() {
                        return Err(fail(format!("raw field {:?} is mapped twice", raw)));
                    }
                }
            }

            let mut requires = Vec::with_capacity(field.requires.len());
            for (dep, condition) in &field.requires {
                requires.push((CategoryKey::parse(dep)?, condition.clone()));
            }

            entries.push(Entry {
                key,
                unit,
                format: field.format.unwrap_or_default(),
                default: field.default,
                requires,
                input: Input::Raw(Vec::new()),
                warned: Arc::new(AtomicBool::new(false)),
            });
        }

        // Second pass: resolve inputs now that every canonical key is known
        for (index, field) in config.fields.iter().enumerate() {
            let resolve = |name: &str| -> Result<CategoryKey> {
                let key = CategoryKey::parse(name)?;
                if !by_key.contains_key(&key) {
                    return Err(fail(format!(
                        "entry for {} references {}, which this table does not declare",
                        entries[index].key, key
                    )));
                }
                Ok(key)
            };

            for (dep, _) in &entries[index].requires {
                if !by_key.contains_key(dep) {
                    return Err(fail(format!(
                        "entry for {} requires {}, which this table does not declare",
                        entries[index].key, dep
                    )));
                }
            }

            entries[index].input = if let Some(target) = &field.alias_of {
                Input::Alias(resolve(target)?)
            } else if let Some(calc) = &field.calc {
                Input::Calc(match calc {
                    Calculation::Ratio {
                        numerator,
                        denominator,
                    } => Calc::Ratio {
                        numerator: resolve(numerator)?,
                        denominator: resolve(denominator)?,
                    },
                    Calculation::Scale { of, factor } => Calc::Scale {
                        of: resolve(of)?,
                        factor: *factor,
                    },
                    Calculation::Sum { of } => Calc::Sum {
                        of: of
                            .iter()
                            .map(|name| resolve(name))
                            .collect::<Result<Vec<_>>>()?,
                    },
                    Calculation::DewPoint {
                        temperature,
                        humidity,
                    } => Calc::DewPoint {
                        temperature: resolve(temperature)?,
                        humidity: resolve(humidity)?,
                    },
                })
            } else {
                let raw_keys = field
                    .source_key
                    .as_ref()
                    .map(|keys| keys.iter().map(str::to_string).collect())
                    .unwrap_or_default();
                Input::Raw(raw_keys)
            };
        }

        Ok(Translator {
            source,
            entries,
            by_raw,
            by_key,
            sections: config
                .sections
                .iter()
                .map(|(name, period)| (name.clone(), *period))
                .collect(),
            timestamp_key: config.timestamp_key.clone(),
            timestamp_unit: config.timestamp_unit,
        })
    }

    pub fn source(&self) -> &SourceId {
        &self.source
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// True if this table declares the canonical key.
    pub fn declares(&self, key: &CategoryKey) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn declared_keys(&self) -> impl Iterator<Item = &CategoryKey> {
        self.by_key.keys()
    }

    /// The period bucket a payload section routes to, per the data map.
    pub fn period_for_section(&self, section: &str) -> Option<Period> {
        self.sections.get(section).copied()
    }

    pub fn sections(&self) -> impl Iterator<Item = (&str, Period)> {
        self.sections.iter().map(|(name, period)| (name.as_str(), *period))
    }

    /// Extract the payload's own timestamp, if the source declares one.
    pub fn timestamp_of(&self, payload: &RawPayload) -> Option<Timestamp> {
        let raw = payload.get(self.timestamp_key.as_deref()?)?;
        let numeric = match raw {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        let seconds = match self.timestamp_unit {
            TimestampUnit::Seconds => numeric,
            TimestampUnit::Millis => numeric / 1_000.0,
        };
        Some(seconds as Timestamp)
    }

    /// Decode one raw payload. Pure: identical payloads yield structurally
    /// equal output. Individual fields degrade to skips, never to errors.
    pub fn decode(&self, payload: &RawPayload) -> Decoded {
        let mut decoded = Decoded {
            values: FxHashMap::with_capacity_and_hasher(self.entries.len(), Default::default()),
            ..Decoded::default()
        };

        for (index, entry) in self.entries.iter().enumerate() {
            let produced = match &entry.input {
                Input::Raw(raw_keys) => {
                    let Some((raw_name, raw_value)) = raw_keys
                        .iter()
                        .find_map(|name| payload.get(name).map(|value| (name, value)))
                    else {
                        // Absent mapped fields are simply not in this payload
                        continue;
                    };
                    if !self.requires_hold(entry, &decoded.values) {
                        trace!(source = %self.source, key = %entry.key, "requires unmet, field skipped");
                        decoded.skipped += 1;
                        continue;
                    }
                    match self.coerce(entry, raw_value) {
                        Some(value) => Some(Measurement::new(value, entry.unit.clone())),
                        None => match entry.default {
                            Some(default) => {
                                debug!(source = %self.source, key = %entry.key, raw = %raw_name,
                                       "unusable raw value, applying default");
                                Some(Measurement::new(default, entry.unit.clone()))
                            }
                            None => {
                                trace!(source = %self.source, key = %entry.key, raw = %raw_name,
                                       "unusable raw value, field skipped");
                                decoded.skipped += 1;
                                None
                            }
                        },
                    }
                }
                Input::Calc(calc) => {
                    if !self.requires_hold(entry, &decoded.values) {
                        decoded.skipped += 1;
                        continue;
                    }
                    self.compute(index, entry, calc, &decoded.values)
                }
                // Aliases resolve after every other entry has had its chance
                Input::Alias(_) => continue,
            };

            if let Some(measurement) = produced {
                decoded.values.insert(entry.key.clone(), measurement);
            }
        }

        for entry in &self.entries {
            if let Input::Alias(target) = &entry.input {
                if let Some(value) = decoded.values.get(target).cloned() {
                    decoded.values.insert(entry.key.clone(), value);
                }
            }
        }

        for raw_name in payload.keys() {
            let is_timestamp = self.timestamp_key.as_deref() == Some(raw_name.as_str());
            if !self.by_raw.contains_key(raw_name) && !is_timestamp {
                trace!(source = %self.source, raw = %raw_name, "no mapping for raw field");
                decoded.unmapped += 1;
            }
        }

        decoded
    }

    fn requires_hold(&self, entry: &Entry, values: &FxHashMap<CategoryKey, Measurement>) -> bool {
        entry.requires.iter().all(|(dep, condition)| {
            values
                .get(dep)
                .map(|measurement| condition.holds(measurement.value()))
                .unwrap_or(false)
        })
    }

    fn coerce(&self, entry: &Entry, raw: &Value) -> Option<f64> {
        match entry.format {
            ValueFormat::Number => match raw {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            },
            ValueFormat::Integer => match raw {
                Value::Number(n) => n.as_f64().map(f64::round),
                Value::String(s) => s.trim().parse::<f64>().ok().map(f64::round),
                _ => None,
            },
            ValueFormat::Text => {
                let text = raw.as_str()?;
                if let Unit::Enumeration(enum_unit) = &entry.unit {
                    enum_unit.code_for(text.trim()).map(|code| code as f64)
                } else {
                    text.trim().parse::<f64>().ok()
                }
            }
        }
    }

    /// Fetch a calculation dependency from the values decoded so far. A
    /// dependency declared later in the table is a configuration mistake and
    /// is reported once.
    fn fetch<'a>(
        &self,
        entry_index: usize,
        entry: &Entry,
        dep: &CategoryKey,
        values: &'a FxHashMap<CategoryKey, Measurement>,
    ) -> Option<&'a Measurement> {
        if let Some(measurement) = values.get(dep) {
            return Some(measurement);
        }
        if self.by_key.get(dep).is_some_and(|&dep_index| dep_index > entry_index)
            && !entry.warned.swap(true, Ordering::Relaxed)
        {
            warn!(source = %self.source, key = %entry.key, dependency = %dep,
                  "calculation depends on a field declared later in the table");
        }
        None
    }

    fn compute(
        &self,
        index: usize,
        entry: &Entry,
        calc: &Calc,
        values: &FxHashMap<CategoryKey, Measurement>,
    ) -> Option<Measurement> {
        let result = match calc {
            Calc::Ratio {
                numerator,
                denominator,
            } => {
                let numerator = self.fetch(index, entry, numerator, values)?;
                let denominator = self.fetch(index, entry, denominator, values)?;
                numerator.div(denominator).ok()?
            }
            Calc::Scale { of, factor } => self.fetch(index, entry, of, values)?.scale(*factor),
            Calc::Sum { of } => {
                let mut keys = of.iter();
                let mut total = self.fetch(index, entry, keys.next()?, values)?.clone();
                for dep in keys {
                    total = total.add(self.fetch(index, entry, dep, values)?).ok()?;
                }
                total
            }
            Calc::DewPoint {
                temperature,
                humidity,
            } => {
                let temperature = self
                    .fetch(index, entry, temperature, values)?
                    .convert_to(&Unit::Celsius)
                    .ok()?;
                let humidity = self.fetch(index, entry, humidity, values)?.value();
                if humidity <= 0.0 {
                    return None;
                }
                // Magnus approximation over water
                const B: f64 = 17.62;
                const C: f64 = 243.12;
                let t = temperature.value();
                let gamma = (humidity / 100.0).ln() + B * t / (C + t);
                Measurement::new(C * gamma / (B - gamma), Unit::Celsius)
            }
        };

        match result.convert_to(&entry.unit) {
            Ok(converted) => Some(converted),
            Err(_) => {
                if !entry.warned.swap(true, Ordering::Relaxed) {
                    warn!(source = %self.source, key = %entry.key,
                          "calculation result does not match the entry's declared unit");
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> RawPayload {
        value.as_object().cloned().expect("object payload")
    }

    fn station_config() -> TranslatorConfig {
        serde_json::from_value(json!({
            "enums": {
                "PrecipitationType": { "0": "None", "1": "Rain", "2": "Snow", "3": "Mix" }
            },
            "timestamp_key": "time",
            "sections": { "obs": "now", "hourly": "hour", "daily": "day" },
            "fields": [
                { "source_key": "air_temperature", "key": "environment.temperature.temperature", "unit": "c" },
                { "source_key": "relative_humidity", "key": "environment.humidity.humidity", "unit": "%" },
                { "source_key": ["wind_avg", "wind_speed"], "key": "environment.wind.speed.speed", "unit": "mps" },
                { "source_key": "wind_direction", "key": "environment.wind.direction.direction", "unit": "deg",
                  "requires": { "environment.wind.speed.speed": { "op": "gt", "value": 0.0 } } },
                { "source_key": "precip_type", "key": "environment.precipitation.type", "unit": "enum:PrecipitationType",
                  "format": "integer" },
                { "key": "environment.temperature.dewpoint", "unit": "c",
                  "calc": { "kind": "dew-point",
                            "temperature": "environment.temperature.temperature",
                            "humidity": "environment.humidity.humidity" } },
                { "key": "environment.precipitation.description", "alias_of": "environment.precipitation.type" }
            ]
        }))
        .unwrap()
    }

    fn translator() -> Translator {
        Translator::from_config(SourceId::new("wf"), &station_config()).unwrap()
    }

    #[test]
    fn test_basic_decode() {
        let decoded = translator().decode(&payload(json!({
            "time": 1700000000,
            "air_temperature": 20.0,
            "relative_humidity": 50,
            "wind_avg": 3.4
        })));

        assert_eq!(decoded.skipped, 0);
        assert_eq!(decoded.unmapped, 0);

        let temp = decoded
            .values
            .get(&CategoryKey::parse("environment.temperature.temperature").unwrap())
            .unwrap();
        assert_eq!(temp.value(), 20.0);
        assert_eq!(*temp.unit(), Unit::Celsius);

        // Dew point at 20°C / 50% RH lands near 9.3°C
        let dewpoint = decoded
            .values
            .get(&CategoryKey::parse("environment.temperature.dewpoint").unwrap())
            .unwrap();
        assert!((dewpoint.value() - 9.26).abs() < 0.1);
    }

    #[test]
    fn test_unmapped_fields_are_counted_not_fatal() {
        let decoded = translator().decode(&payload(json!({
            "air_temperature": 18.5,
            "battery_volts": 2.61,
            "firmware_revision": 176
        })));

        assert_eq!(decoded.unmapped, 2);
        assert!(decoded
            .values
            .contains_key(&CategoryKey::parse("environment.temperature.temperature").unwrap()));
    }

    #[test]
    fn test_requires_gates_dependent_field() {
        let calm = translator().decode(&payload(json!({
            "wind_avg": 0.0,
            "wind_direction": 180
        })));
        assert!(!calm
            .values
            .contains_key(&CategoryKey::parse("environment.wind.direction.direction").unwrap()));
        assert_eq!(calm.skipped, 1);

        let breezy = translator().decode(&payload(json!({
            "wind_avg": 4.2,
            "wind_direction": 180
        })));
        let direction = breezy
            .values
            .get(&CategoryKey::parse("environment.wind.direction.direction").unwrap())
            .unwrap();
        assert_eq!(direction.value(), 180.0);
    }

    #[test]
    fn test_enum_decode_and_alias() {
        let decoded = translator().decode(&payload(json!({ "precip_type": 2 })));

        let kind = decoded
            .values
            .get(&CategoryKey::parse("environment.precipitation.type").unwrap())
            .unwrap();
        assert_eq!(kind.label(), Some("Snow"));

        // The alias copies the same measurement under a second key
        let description = decoded
            .values
            .get(&CategoryKey::parse("environment.precipitation.description").unwrap())
            .unwrap();
        assert_eq!(description.label(), Some("Snow"));
    }

    #[test]
    fn test_text_format_reverse_enum_lookup() {
        let config: TranslatorConfig = serde_json::from_value(json!({
            "enums": { "PrecipitationType": { "0": "None", "1": "Rain", "2": "Snow" } },
            "fields": [
                { "source_key": "precip", "key": "environment.precipitation.type",
                  "unit": "enum:PrecipitationType", "format": "text" }
            ]
        }))
        .unwrap();
        let translator = Translator::from_config(SourceId::new("txt"), &config).unwrap();

        let decoded = translator.decode(&payload(json!({ "precip": "snow" })));
        let kind = decoded
            .values
            .get(&CategoryKey::parse("environment.precipitation.type").unwrap())
            .unwrap();
        assert_eq!(kind.value(), 2.0);
    }

    #[test]
    fn test_default_applies_to_null_values() {
        let config: TranslatorConfig = serde_json::from_value(json!({
            "fields": [
                { "source_key": "uv", "key": "environment.light.uv", "unit": "%", "default": 0.0 }
            ]
        }))
        .unwrap();
        let translator = Translator::from_config(SourceId::new("d"), &config).unwrap();

        let decoded = translator.decode(&payload(json!({ "uv": null })));
        let uv = decoded
            .values
            .get(&CategoryKey::parse("environment.light.uv").unwrap())
            .unwrap();
        assert_eq!(uv.value(), 0.0);

        // An absent field stays absent; defaults never synthesize readings
        let decoded = translator.decode(&payload(json!({})));
        assert!(decoded.values.is_empty());
    }

    #[test]
    fn test_duplicate_raw_key_fails_registration() {
        let config: TranslatorConfig = serde_json::from_value(json!({
            "fields": [
                { "source_key": "temp", "key": "environment.temperature.temperature", "unit": "c" },
                { "source_key": "temp", "key": "environment.temperature.feels_like", "unit": "c" }
            ]
        }))
        .unwrap();
        let err = Translator::from_config(SourceId::new("dup"), &config).unwrap_err();
        assert!(matches!(err, MergeError::TranslatorConfig { .. }));
        assert!(err.to_string().contains("mapped twice"));
    }

    #[test]
    fn test_duplicate_canonical_key_fails_registration() {
        let config: TranslatorConfig = serde_json::from_value(json!({
            "fields": [
                { "source_key": "t1", "key": "environment.temperature.temperature", "unit": "c" },
                { "source_key": "t2", "key": "environment.temperature.temperature", "unit": "f" }
            ]
        }))
        .unwrap();
        let err = Translator::from_config(SourceId::new("dup"), &config).unwrap_err();
        assert!(err.to_string().contains("duplicate mapping"));
    }

    #[test]
    fn test_unknown_enum_and_unit_fail_registration() {
        let config: TranslatorConfig = serde_json::from_value(json!({
            "fields": [
                { "source_key": "x", "key": "a.b", "unit": "enum:Missing" }
            ]
        }))
        .unwrap();
        assert!(Translator::from_config(SourceId::new("s"), &config).is_err());

        let config: TranslatorConfig = serde_json::from_value(json!({
            "fields": [
                { "source_key": "x", "key": "a.b", "unit": "furlongs" }
            ]
        }))
        .unwrap();
        assert!(Translator::from_config(SourceId::new("s"), &config).is_err());
    }

    #[test]
    fn test_calc_reference_must_be_declared() {
        let config: TranslatorConfig = serde_json::from_value(json!({
            "fields": [
                { "key": "a.ratio", "unit": "%",
                  "calc": { "kind": "scale", "of": "a.unknown", "factor": 2.0 } }
            ]
        }))
        .unwrap();
        let err = Translator::from_config(SourceId::new("s"), &config).unwrap_err();
        assert!(err.to_string().contains("does not declare"));
    }

    #[test]
    fn test_misordered_calc_skips_without_output() {
        // The scale input is declared after the calculation that consumes it
        let config: TranslatorConfig = serde_json::from_value(json!({
            "fields": [
                { "key": "a.double", "unit": "mm",
                  "calc": { "kind": "scale", "of": "a.rain", "factor": 2.0 } },
                { "source_key": "rain", "key": "a.rain", "unit": "mm" }
            ]
        }))
        .unwrap();
        let translator = Translator::from_config(SourceId::new("s"), &config).unwrap();

        let decoded = translator.decode(&payload(json!({ "rain": 3.0 })));
        assert!(decoded
            .values
            .contains_key(&CategoryKey::parse("a.rain").unwrap()));
        assert!(!decoded
            .values
            .contains_key(&CategoryKey::parse("a.double").unwrap()));
    }

    #[test]
    fn test_section_routing_and_timestamps() {
        let translator = translator();
        assert_eq!(translator.period_for_section("obs"), Some(Period::Now));
        assert_eq!(translator.period_for_section("hourly"), Some(Period::Hour));
        assert_eq!(translator.period_for_section("minutely"), None);

        let ts = translator.timestamp_of(&payload(json!({ "time": 1700000000 })));
        assert_eq!(ts, Some(1700000000));
        assert_eq!(translator.timestamp_of(&payload(json!({}))), None);

        let millis_config: TranslatorConfig = serde_json::from_value(json!({
            "timestamp_key": "dt",
            "timestamp_unit": "millis",
            "fields": [
                { "source_key": "t", "key": "a.b", "unit": "c" }
            ]
        }))
        .unwrap();
        let millis = Translator::from_config(SourceId::new("ms"), &millis_config).unwrap();
        assert_eq!(
            millis.timestamp_of(&payload(json!({ "dt": 1700000000500u64 }))),
            Some(1700000000)
        );
    }

    #[test]
    fn test_decode_is_idempotent() {
        let translator = translator();
        let body = payload(json!({
            "time": 1700000000,
            "air_temperature": 20.0,
            "relative_humidity": 50,
            "wind_avg": 3.4,
            "wind_direction": 200,
            "precip_type": 1,
            "unmapped_extra": true
        }));

        let first = translator.decode(&body);
        let second = translator.decode(&body);
        assert_eq!(first, second);
    }
}
