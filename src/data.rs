use std::fmt::Display;

use strum_macros::EnumIter;

/// Values at or above this are SCPI's overload/not-a-number markers (9.9E37, 9.91E37)
pub const SCPI_OVERLOAD: f64 = 9.9e37;

const SI_PREFIXES: &[(f64, &str)] = &[
    (1e12, "T"),
    (1e9, "G"),
    (1e6, "M"),
    (1e3, "k"),
    (1e0, ""),
    (1e-3, "m"),
    (1e-6, "u"),
    (1e-9, "n"),
    (1e-12, "p"),
];

/// Largest SI prefix that keeps the scaled value at or above 1, femto below that.
fn get_prefix_and_scale(val: f64) -> (&'static str, f64) {
    if val == 0.0 {
        return ("", val);
    }
    match SI_PREFIXES.iter().find(|(scale, _)| val.abs() >= *scale) {
        Some((scale, prefix)) => (*prefix, val / *scale),
        None => ("f", val / 1e-15),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter)]
pub enum Unit {
    /// Unitless
    None,
    /// Voltage - volts
    Voltage,
    /// Current - amps
    Current,
    /// Resistance - ohms
    Resistance,
    /// Power - watts
    Power,
}
impl Unit {
    pub fn unit_abbrev(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Voltage => "V",
            Self::Current => "A",
            Self::Resistance => "Ω",
            Self::Power => "W",
        }
    }
}

/// A single measurement. Overloaded readings are stored as NaN.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reading {
    pub unit: Unit,
    pub value: f64,
}
impl Reading {
    /// Build from a raw instrument value, mapping the overload marker to NaN.
    pub fn from_scpi(unit: Unit, value: f64) -> Self {
        let value = if value.abs() >= SCPI_OVERLOAD {
            f64::NAN
        } else {
            value
        };
        Self { unit, value }
    }

    pub fn is_overload(&self) -> bool {
        self.value.is_nan()
    }
}
impl Display for Reading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.value.is_nan() {
            write!(f, "OVERLOAD {}", self.unit.unit_abbrev())
        } else {
            let (prefix, value) = get_prefix_and_scale(self.value);

            write!(f, "{} {}{}", value, prefix, self.unit.unit_abbrev())
        }
    }
}

/// A record of samples sharing one unit, evenly spaced by `interval` when acquired over time.
#[derive(Clone, Debug, PartialEq)]
pub struct Readings {
    pub unit: Unit,
    pub interval: Option<f64>,
    pub values: Vec<f64>,
}
impl Readings {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sample time relative to the first sample.
    pub fn time_of(&self, index: usize) -> Option<f64> {
        self.interval.map(|dt| dt * index as f64)
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn reading_display_uses_si_prefixes() {
        let r = Reading::from_scpi(Unit::Voltage, 2500.0);
        assert_eq!(r.to_string(), "2.5 kV");
        let r = Reading::from_scpi(Unit::Resistance, 4700.0);
        assert_eq!(r.to_string(), "4.7 kΩ");
        let r = Reading::from_scpi(Unit::Current, 0.0);
        assert_eq!(r.to_string(), "0 A");
        let r = Reading::from_scpi(Unit::Current, -0.25);
        assert_eq!(r.to_string(), "-250 mA");
    }

    #[test]
    fn overload_becomes_nan() {
        let r = Reading::from_scpi(Unit::Resistance, 9.9e37);
        assert!(r.is_overload());
        assert_eq!(r.to_string(), "OVERLOAD Ω");
        assert!(!Reading::from_scpi(Unit::Voltage, -1.0).is_overload());
    }

    #[test]
    fn every_unit_has_an_abbreviation_except_none() {
        for unit in Unit::iter() {
            assert_eq!(unit.unit_abbrev().is_empty(), unit == Unit::None);
        }
    }

    #[test]
    fn readings_time_axis() {
        let rec = Readings {
            unit: Unit::Voltage,
            interval: Some(0.5),
            values: vec![0.0; 4],
        };
        assert_eq!(rec.len(), 4);
        assert_eq!(rec.time_of(3), Some(1.5));
    }
}
