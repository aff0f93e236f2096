//! # Dimensioned Measurements
//!
//! A single measurement type tagged with a unit drawn from a small conversion
//! table, replacing per-source unit classes. Conversion moves a value between
//! unit systems without ever changing its dimension; arithmetic across
//! unrelated dimensions is rejected rather than silently coerced. Equality
//! compares the logical quantity after conversion, so `Celsius(0)` equals
//! `Fahrenheit(32)`.

use crate::error::{MergeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// The physical or logical dimension a measurement carries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dimension {
    Temperature,
    Length,
    Time,
    Percentage,
    Angle,
    Pressure,
    Illuminance,
    Irradiance,
    /// Named enumeration, e.g. `PrecipitationType`.
    Enumeration(String),
    /// A composed dimension such as Length/Time (the speed and rate family).
    Ratio(Box<Dimension>, Box<Dimension>),
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Temperature => f.write_str("temperature"),
            Dimension::Length => f.write_str("length"),
            Dimension::Time => f.write_str("time"),
            Dimension::Percentage => f.write_str("percentage"),
            Dimension::Angle => f.write_str("angle"),
            Dimension::Pressure => f.write_str("pressure"),
            Dimension::Illuminance => f.write_str("illuminance"),
            Dimension::Irradiance => f.write_str("irradiance"),
            Dimension::Enumeration(name) => write!(f, "enumeration({})", name),
            Dimension::Ratio(num, den) => write!(f, "{}/{}", num, den),
        }
    }
}

/// Unit system a measurement is currently expressed in. `Native` is the
/// dimension's base unit (kelvin, meter, second, hectopascal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitSystem {
    Metric,
    Imperial,
    Native,
}

impl fmt::Display for UnitSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitSystem::Metric => f.write_str("metric"),
            UnitSystem::Imperial => f.write_str("imperial"),
            UnitSystem::Native => f.write_str("native"),
        }
    }
}

/// A named enumeration unit carrying its code → label table. The table is
/// shared by reference out of the translator configuration so decoded values
/// render without external context.
#[derive(Debug, Clone)]
pub struct EnumUnit {
    name: Arc<str>,
    labels: Arc<BTreeMap<i64, String>>,
}

impl EnumUnit {
    pub fn new(name: &str, labels: BTreeMap<i64, String>) -> Self {
        Self {
            name: Arc::from(name),
            labels: Arc::new(labels),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Display label for a code, if one is declared.
    pub fn label(&self, code: i64) -> Option<&str> {
        self.labels.get(&code).map(String::as_str)
    }

    /// Reverse lookup: case-insensitive label → code.
    pub fn code_for(&self, label: &str) -> Option<i64> {
        self.labels
            .iter()
            .find(|(_, candidate)| candidate.eq_ignore_ascii_case(label))
            .map(|(code, _)| *code)
    }
}

impl PartialEq for EnumUnit {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

/// A concrete unit. Each unit belongs to exactly one dimension and declares a
/// counterpart in every unit system; converting a measurement to a system
/// retargets it to that counterpart.
#[derive(Debug, Clone, PartialEq)]
pub enum Unit {
    // temperature
    Celsius,
    Fahrenheit,
    Kelvin,
    // length
    Millimeter,
    Centimeter,
    Meter,
    Kilometer,
    Inch,
    Foot,
    Mile,
    // time
    Second,
    Minute,
    Hour,
    Day,
    // pressure
    Hectopascal,
    Millibar,
    InchMercury,
    MillimeterMercury,
    // dimensionless families
    Degree,
    Percent,
    Lux,
    WattPerSquareMeter,
    /// Composed rate unit, e.g. `Per(Millimeter, Hour)` for precipitation.
    Per(Box<Unit>, Box<Unit>),
    /// Enumeration with an attached label table.
    Enumeration(EnumUnit),
}

impl Unit {
    /// The dimension this unit measures.
    pub fn dimension(&self) -> Dimension {
        match self {
            Unit::Celsius | Unit::Fahrenheit | Unit::Kelvin => Dimension::Temperature,
            Unit::Millimeter
            | Unit::Centimeter
            | Unit::Meter
            | Unit::Kilometer
            | Unit::Inch
            | Unit::Foot
            | Unit::Mile => Dimension::Length,
            Unit::Second | Unit::Minute | Unit::Hour | Unit::Day => Dimension::Time,
            Unit::Hectopascal | Unit::Millibar | Unit::InchMercury | Unit::MillimeterMercury => {
                Dimension::Pressure
            }
            Unit::Degree => Dimension::Angle,
            Unit::Percent => Dimension::Percentage,
            Unit::Lux => Dimension::Illuminance,
            Unit::WattPerSquareMeter => Dimension::Irradiance,
            Unit::Per(num, den) => {
                Dimension::Ratio(Box::new(num.dimension()), Box::new(den.dimension()))
            }
            Unit::Enumeration(e) => Dimension::Enumeration(e.name().to_string()),
        }
    }

    /// The system this unit belongs to. Time, angle, percentage, illuminance,
    /// irradiance, and enumerations are system-neutral and report `Native`.
    pub fn system(&self) -> UnitSystem {
        match self {
            Unit::Celsius
            | Unit::Millimeter
            | Unit::Centimeter
            | Unit::Meter
            | Unit::Kilometer
            | Unit::Hectopascal
            | Unit::Millibar
            | Unit::MillimeterMercury => UnitSystem::Metric,
            Unit::Fahrenheit | Unit::Inch | Unit::Foot | Unit::Mile | Unit::InchMercury => {
                UnitSystem::Imperial
            }
            Unit::Kelvin
            | Unit::Second
            | Unit::Minute
            | Unit::Hour
            | Unit::Day
            | Unit::Degree
            | Unit::Percent
            | Unit::Lux
            | Unit::WattPerSquareMeter
            | Unit::Enumeration(_) => UnitSystem::Native,
            Unit::Per(num, _) => num.system(),
        }
    }

    /// The unit this one becomes when expressed in `system`. A unit already in
    /// the target system maps to itself.
    pub fn counterpart(&self, system: UnitSystem) -> Unit {
        use Unit::*;
        use UnitSystem::*;
        // Wind family keeps its conventional display units per system rather
        // than composing per-component counterparts (m/s would otherwise
        // become ft/s).
        if let Per(num, den) = self {
            match (num.as_ref(), den.as_ref(), system) {
                (Meter, Second, Imperial) | (Kilometer, Hour, Imperial) => {
                    return Per(Box::new(Mile), Box::new(Hour))
                }
                (Mile, Hour, Metric) => return Per(Box::new(Kilometer), Box::new(Hour)),
                (Meter, Second, Native) | (Kilometer, Hour, Native) | (Mile, Hour, Native) => {
                    return Per(Box::new(Meter), Box::new(Second))
                }
                _ => {
                    return Per(
                        Box::new(num.counterpart(system)),
                        Box::new(den.counterpart(system)),
                    )
                }
            }
        }
        match (self, system) {
            (Celsius | Fahrenheit | Kelvin, Metric) => Celsius,
            (Celsius | Fahrenheit | Kelvin, Imperial) => Fahrenheit,
            (Celsius | Fahrenheit | Kelvin, Native) => Kelvin,

            (Millimeter | Inch, Metric) => Millimeter,
            (Centimeter, Metric) => Centimeter,
            (Meter | Foot, Metric) => Meter,
            (Kilometer | Mile, Metric) => Kilometer,
            (Millimeter | Centimeter | Inch, Imperial) => Inch,
            (Meter | Foot, Imperial) => Foot,
            (Kilometer | Mile, Imperial) => Mile,
            (
                Millimeter | Centimeter | Meter | Kilometer | Inch | Foot | Mile,
                Native,
            ) => Meter,

            (Hectopascal | InchMercury, Metric) => Hectopascal,
            (Millibar, Metric) => Millibar,
            (MillimeterMercury, Metric) => MillimeterMercury,
            (Hectopascal | Millibar | InchMercury | MillimeterMercury, Imperial) => InchMercury,
            (Hectopascal | Millibar | InchMercury | MillimeterMercury, Native) => Hectopascal,

            // System-neutral units never retarget
            (unit, _) => unit.clone(),
        }
    }

    /// Linear scale factor to the dimension's base unit (meter, second,
    /// hectopascal, ...). `None` for temperature (affine) and enumerations.
    fn base_factor(&self) -> Option<f64> {
        let factor = match self {
            Unit::Celsius | Unit::Fahrenheit | Unit::Kelvin | Unit::Enumeration(_) => return None,
            Unit::Millimeter => 0.001,
            Unit::Centimeter => 0.01,
            Unit::Meter => 1.0,
            Unit::Kilometer => 1_000.0,
            Unit::Inch => 0.0254,
            Unit::Foot => 0.3048,
            Unit::Mile => 1_609.344,
            Unit::Second => 1.0,
            Unit::Minute => 60.0,
            Unit::Hour => 3_600.0,
            Unit::Day => 86_400.0,
            Unit::Hectopascal => 1.0,
            Unit::Millibar => 1.0,
            Unit::InchMercury => 33.863_886,
            Unit::MillimeterMercury => 1.333_224,
            Unit::Degree | Unit::Percent | Unit::Lux | Unit::WattPerSquareMeter => 1.0,
            Unit::Per(num, den) => return Some(num.base_factor()? / den.base_factor()?),
        };
        Some(factor)
    }

    /// Convert a raw value from this unit into `target`, which must share the
    /// dimension.
    fn convert_value(&self, value: f64, target: &Unit) -> Result<f64> {
        if self == target {
            return Ok(value);
        }
        if self.dimension() != target.dimension() {
            return Err(MergeError::IncompatibleDimension {
                from: self.dimension(),
                to: target.dimension(),
            });
        }
        if self.dimension() == Dimension::Temperature {
            let kelvin = match self {
                Unit::Celsius => value + 273.15,
                Unit::Fahrenheit => (value + 459.67) * 5.0 / 9.0,
                _ => value,
            };
            return Ok(match target {
                Unit::Celsius => kelvin - 273.15,
                Unit::Fahrenheit => kelvin * 9.0 / 5.0 - 459.67,
                _ => kelvin,
            });
        }
        match (self.base_factor(), target.base_factor()) {
            (Some(from), Some(to)) => Ok(value * from / to),
            // Same enumeration (dimension equality already guaranteed the
            // name matches), or a ratio with a temperature component
            _ => {
                if matches!(self, Unit::Enumeration(_)) {
                    Ok(value)
                } else {
                    Err(MergeError::IncompatibleDimension {
                        from: self.dimension(),
                        to: target.dimension(),
                    })
                }
            }
        }
    }

    /// Short display suffix, e.g. `°C`, `mm/h`. Empty for enumerations, whose
    /// labels render instead.
    pub fn suffix(&self) -> String {
        match self {
            Unit::Celsius => "°C".to_string(),
            Unit::Fahrenheit => "°F".to_string(),
            Unit::Kelvin => "K".to_string(),
            Unit::Millimeter => "mm".to_string(),
            Unit::Centimeter => "cm".to_string(),
            Unit::Meter => "m".to_string(),
            Unit::Kilometer => "km".to_string(),
            Unit::Inch => "in".to_string(),
            Unit::Foot => "ft".to_string(),
            Unit::Mile => "mi".to_string(),
            Unit::Second => "s".to_string(),
            Unit::Minute => "min".to_string(),
            Unit::Hour => "h".to_string(),
            Unit::Day => "d".to_string(),
            Unit::Hectopascal => "hPa".to_string(),
            Unit::Millibar => "mb".to_string(),
            Unit::InchMercury => "inHg".to_string(),
            Unit::MillimeterMercury => "mmHg".to_string(),
            Unit::Degree => "°".to_string(),
            Unit::Percent => "%".to_string(),
            Unit::Lux => "lx".to_string(),
            Unit::WattPerSquareMeter => "W/m²".to_string(),
            Unit::Per(num, den) => format!("{}/{}", num.suffix(), den.suffix()),
            Unit::Enumeration(_) => String::new(),
        }
    }

    /// Compose a rate unit, e.g. `Unit::per(Unit::Meter, Unit::Second)`.
    pub fn per(numerator: Unit, denominator: Unit) -> Unit {
        Unit::Per(Box::new(numerator), Box::new(denominator))
    }

    /// Parse a unit spelling as used in translator files. Returns `None` for
    /// unknown spellings; enumeration references are resolved by the
    /// translator, not here.
    pub fn parse(text: &str) -> Option<Unit> {
        let text = text.trim().to_lowercase();
        let unit = match text.as_str() {
            "c" | "°c" | "celsius" => Unit::Celsius,
            "f" | "°f" | "fahrenheit" => Unit::Fahrenheit,
            "k" | "kelvin" => Unit::Kelvin,
            "mm" => Unit::Millimeter,
            "cm" => Unit::Centimeter,
            "m" => Unit::Meter,
            "km" => Unit::Kilometer,
            "in" | "inch" => Unit::Inch,
            "ft" => Unit::Foot,
            "mi" | "mile" => Unit::Mile,
            "s" | "sec" => Unit::Second,
            "min" => Unit::Minute,
            "h" | "hr" => Unit::Hour,
            "d" | "day" => Unit::Day,
            "hpa" => Unit::Hectopascal,
            "mb" | "mbar" => Unit::Millibar,
            "inhg" => Unit::InchMercury,
            "mmhg" => Unit::MillimeterMercury,
            "deg" | "°" => Unit::Degree,
            "%" | "percent" => Unit::Percent,
            "lx" | "lux" => Unit::Lux,
            "w/m2" | "w/m^2" | "wm2" => Unit::WattPerSquareMeter,
            "mph" => Unit::Per(Box::new(Unit::Mile), Box::new(Unit::Hour)),
            "mps" => Unit::Per(Box::new(Unit::Meter), Box::new(Unit::Second)),
            "kph" => Unit::Per(Box::new(Unit::Kilometer), Box::new(Unit::Hour)),
            compound => {
                let (num, den) = compound.split_once('/')?;
                return Some(Unit::Per(
                    Box::new(Unit::parse(num)?),
                    Box::new(Unit::parse(den)?),
                ));
            }
        };
        Some(unit)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::Enumeration(e) => write!(f, "enum:{}", e.name()),
            other => f.write_str(&other.suffix()),
        }
    }
}

/// A numeric value tagged with a unit. Immutable: conversion and arithmetic
/// produce new instances.
#[derive(Debug, Clone)]
pub struct Measurement {
    value: f64,
    unit: Unit,
}

impl Measurement {
    pub fn new(value: f64, unit: Unit) -> Self {
        Self { value, unit }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    pub fn dimension(&self) -> Dimension {
        self.unit.dimension()
    }

    pub fn system(&self) -> UnitSystem {
        self.unit.system()
    }

    /// Express the same quantity in the target system's counterpart unit.
    /// The dimension identity never changes across conversion.
    pub fn convert(&self, system: UnitSystem) -> Result<Measurement> {
        self.convert_to(&self.unit.counterpart(system))
    }

    /// Express the same quantity in an explicit unit of the same dimension.
    pub fn convert_to(&self, unit: &Unit) -> Result<Measurement> {
        let value = self.unit.convert_value(self.value, unit)?;
        Ok(Measurement::new(value, unit.clone()))
    }

    /// Add a measurement of the same dimension; the result stays in `self`'s
    /// unit.
    pub fn add(&self, other: &Measurement) -> Result<Measurement> {
        let other = self.coerce(other, "add")?;
        Ok(Measurement::new(self.value + other, self.unit.clone()))
    }

    /// Subtract a measurement of the same dimension.
    pub fn sub(&self, other: &Measurement) -> Result<Measurement> {
        let other = self.coerce(other, "subtract")?;
        Ok(Measurement::new(self.value - other, self.unit.clone()))
    }

    /// Multiply by a percentage (either operand); any other pairing is a
    /// dimension mismatch.
    pub fn mul(&self, other: &Measurement) -> Result<Measurement> {
        match (&self.unit, &other.unit) {
            (_, Unit::Percent) => Ok(Measurement::new(
                self.value * other.value / 100.0,
                self.unit.clone(),
            )),
            (Unit::Percent, _) => Ok(Measurement::new(
                other.value * self.value / 100.0,
                other.unit.clone(),
            )),
            _ => Err(MergeError::DimensionMismatch {
                op: "multiply",
                left: self.dimension(),
                right: other.dimension(),
            }),
        }
    }

    /// Divide: same-dimension operands yield a percentage; distinct linear
    /// dimensions compose into a ratio (Length ÷ Time → the speed family).
    pub fn div(&self, other: &Measurement) -> Result<Measurement> {
        let mismatch = || MergeError::DimensionMismatch {
            op: "divide",
            left: self.dimension(),
            right: other.dimension(),
        };
        if matches!(self.dimension(), Dimension::Temperature | Dimension::Enumeration(_))
            || matches!(other.dimension(), Dimension::Temperature | Dimension::Enumeration(_))
        {
            return Err(mismatch());
        }
        if self.dimension() == other.dimension() {
            let divisor = self.unit.convert_value(other.value, &self.unit)?;
            if divisor == 0.0 {
                return Err(mismatch());
            }
            return Ok(Measurement::new(self.value / divisor * 100.0, Unit::Percent));
        }
        if other.value == 0.0 {
            return Err(mismatch());
        }
        Ok(Measurement::new(
            self.value / other.value,
            Unit::Per(Box::new(self.unit.clone()), Box::new(other.unit.clone())),
        ))
    }

    /// Scale by a bare factor, staying in the same unit.
    pub fn scale(&self, factor: f64) -> Measurement {
        Measurement::new(self.value * factor, self.unit.clone())
    }

    /// Display label for enumeration measurements.
    pub fn label(&self) -> Option<&str> {
        match &self.unit {
            Unit::Enumeration(e) => e.label(self.value.round() as i64),
            _ => None,
        }
    }

    /// Render with an explicit precision and the unit suffix. Enumerations
    /// render their label (falling back to the raw code).
    pub fn display_with_precision(&self, precision: usize) -> String {
        if let Unit::Enumeration(_) = self.unit {
            return self
                .label()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}", self.value.round() as i64));
        }
        format!("{:.*} {}", precision, self.value, self.unit.suffix())
    }

    fn coerce(&self, other: &Measurement, op: &'static str) -> Result<f64> {
        if self.dimension() != other.dimension()
            || matches!(self.unit, Unit::Enumeration(_))
        {
            return Err(MergeError::DimensionMismatch {
                op,
                left: self.dimension(),
                right: other.dimension(),
            });
        }
        other.unit.convert_value(other.value, &self.unit)
    }
}

impl PartialEq for Measurement {
    /// Quantity equality: the other value is converted into this unit before
    /// comparison, within floating-point tolerance. Unrelated dimensions are
    /// never equal.
    fn eq(&self, other: &Self) -> bool {
        if self.dimension() != other.dimension() {
            return false;
        }
        match other.unit.convert_value(other.value, &self.unit) {
            Ok(converted) => {
                let scale = self.value.abs().max(converted.abs()).max(1.0);
                (self.value - converted).abs() <= 1e-6 * scale
            }
            Err(_) => false,
        }
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_with_precision(1))
    }
}
