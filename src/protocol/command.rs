//! Declarative command tables
//!
//! Every driver operation is a [`CommandDescriptor`]: a SCPI template with `{chan}` and
//! named placeholders, the arguments it takes and what the instrument answers. Arguments are
//! validated against the descriptor before anything is formatted, so a rejected call never
//! reaches the bus.

use std::{collections::HashMap, fmt::Display, time::Duration};

use strum_macros::AsRefStr;

use super::ReplyKind;
use crate::{
    error::{Error, Result},
    resource::TransportKind,
};

/// An argument as given by the caller.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Real(f64),
    Int(i64),
    Text(String),
}
impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Real(v) => write!(f, "{v:?}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Text(v) => f.write_str(v),
        }
    }
}
impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}
impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Self::Real(value.into())
    }
}
impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}
impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}
impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Int(value.into())
    }
}
impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Text(if value { "ON" } else { "OFF" }.into())
    }
}
impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}
impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Quantities whose limits depend on the channel being driven.
#[derive(Clone, Copy, Debug, PartialEq, Eq, AsRefStr)]
pub enum Quantity {
    Voltage,
    Current,
    #[strum(serialize = "over-voltage limit")]
    OverVoltage,
    #[strum(serialize = "over-current limit")]
    OverCurrent,
}

/// Output limits of one source channel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChannelRating {
    pub min_voltage: f64,
    pub max_voltage: f64,
    pub max_current: f64,
}
impl ChannelRating {
    pub const fn new(min_voltage: f64, max_voltage: f64, max_current: f64) -> Self {
        Self {
            min_voltage,
            max_voltage,
            max_current,
        }
    }

    /// Accepted setting range for `quantity`. Protection levels may be set up to 10% past
    /// the rated output.
    pub fn range(&self, quantity: Quantity) -> (f64, f64) {
        let span = self.min_voltage.abs().max(self.max_voltage.abs());
        match quantity {
            Quantity::Voltage => (self.min_voltage, self.max_voltage),
            Quantity::Current => (0.0, self.max_current),
            Quantity::OverVoltage => (0.0, span * 1.1),
            Quantity::OverCurrent => (0.0, self.max_current * 1.1),
        }
    }
}

/// What an argument may hold.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ValueSpec {
    /// Finite number in `min..=max`, or one of the keywords
    Real {
        min: f64,
        max: f64,
        keywords: &'static [&'static str],
    },
    Int {
        min: i64,
        max: i64,
    },
    /// One of a fixed set of tokens, matched ignoring case
    Choice(&'static [&'static str]),
    /// Free text without message separators or quotes
    Text,
    /// Number limited by the addressed channel's rating
    Rated(Quantity),
}

pub const ON_OFF: ValueSpec = ValueSpec::Choice(&["ON", "OFF", "1", "0"]);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ArgSpec {
    pub name: &'static str,
    pub spec: ValueSpec,
}
pub const fn arg(name: &'static str, spec: ValueSpec) -> ArgSpec {
    ArgSpec { name, spec }
}

/// Channel count and ratings a command is checked against.
#[derive(Clone, Copy, Debug)]
pub struct ChannelLimits<'a> {
    pub count: u8,
    pub ratings: &'a [ChannelRating],
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CommandDescriptor {
    /// Operation name, unique within a table
    pub name: &'static str,
    pub template: &'static str,
    pub args: &'static [ArgSpec],
    pub reply: ReplyKind,
    /// Extra wait after the command completes
    pub settle: Duration,
}
impl CommandDescriptor {
    pub const fn write(name: &'static str, template: &'static str, args: &'static [ArgSpec]) -> Self {
        Self {
            name,
            template,
            args,
            reply: ReplyKind::None,
            settle: Duration::ZERO,
        }
    }

    pub const fn query(name: &'static str, template: &'static str, reply: ReplyKind) -> Self {
        Self {
            name,
            template,
            args: &[],
            reply,
            settle: Duration::ZERO,
        }
    }

    pub const fn with_args(self, args: &'static [ArgSpec]) -> Self {
        Self { args, ..self }
    }

    pub const fn with_settle(self, settle: Duration) -> Self {
        Self { settle, ..self }
    }

    pub fn takes_channel(&self) -> bool {
        self.template.contains("{chan}")
    }

    /// Validate the channel and arguments, then fill in the template.
    pub fn format(
        &self,
        channel: Option<u8>,
        args: &[(&str, Value)],
        limits: &ChannelLimits<'_>,
    ) -> Result<String> {
        let mut vars = HashMap::new();

        match (self.takes_channel(), channel) {
            (true, Some(chan)) if (1..=limits.count).contains(&chan) => {
                vars.insert("chan".to_string(), chan.to_string());
            }
            (true, Some(chan)) => {
                return Err(Error::Validation(format!(
                    "{}: channel {chan} out of range 1..={}",
                    self.name, limits.count
                )));
            }
            (true, None) => {
                return Err(Error::Validation(format!("{}: channel required", self.name)));
            }
            (false, Some(chan)) => {
                return Err(Error::Validation(format!(
                    "{}: takes no channel, got {chan}",
                    self.name
                )));
            }
            (false, None) => {}
        }

        if let Some((unknown, _)) = args
            .iter()
            .find(|(name, _)| !self.args.iter().any(|a| a.name == *name))
        {
            return Err(Error::Validation(format!(
                "{}: unexpected argument `{unknown}`",
                self.name
            )));
        }

        for spec in self.args {
            let Some((_, value)) = args.iter().find(|(name, _)| *name == spec.name) else {
                return Err(Error::Validation(format!(
                    "{}: missing argument `{}`",
                    self.name, spec.name
                )));
            };
            let rating = channel.and_then(|c| limits.ratings.get(usize::from(c) - 1));
            let token = validate(spec.spec, value, rating)
                .map_err(|why| Error::Validation(format!("{} {}: {why}", self.name, spec.name)))?;
            vars.insert(spec.name.to_string(), token);
        }

        strfmt::strfmt(self.template, &vars)
            .map_err(|e| Error::Validation(format!("{}: {e}", self.name)))
    }
}

/// Check `value` against `spec` and produce the token sent on the wire.
fn validate(
    spec: ValueSpec,
    value: &Value,
    rating: Option<&ChannelRating>,
) -> std::result::Result<String, String> {
    match spec {
        ValueSpec::Real { min, max, keywords } => {
            if let Value::Text(text) = value {
                if let Some(kw) = keywords.iter().find(|k| k.eq_ignore_ascii_case(text.trim())) {
                    return Ok(kw.to_string());
                }
            }
            let v = as_real(value)?;
            check_range(v, min, max)?;
            Ok(format!("{v:?}"))
        }
        ValueSpec::Int { min, max } => {
            let v = match value {
                Value::Int(v) => *v,
                Value::Real(v) if v.fract() == 0.0 && v.is_finite() => *v as i64,
                Value::Text(t) => t.trim().parse().map_err(|_| format!("`{t}` is not an integer"))?,
                Value::Real(v) => return Err(format!("{v} is not an integer")),
            };
            if !(min..=max).contains(&v) {
                return Err(format!("{v} out of range {min}..={max}"));
            }
            Ok(v.to_string())
        }
        ValueSpec::Choice(choices) => {
            let given = value.to_string();
            choices
                .iter()
                .find(|c| c.eq_ignore_ascii_case(given.trim()))
                .map(|c| c.to_string())
                .ok_or_else(|| format!("`{given}` is not one of {}", choices.join(", ")))
        }
        ValueSpec::Text => match value {
            Value::Text(t) if t.contains(['\n', '\r', ';', '"']) => {
                Err(format!("`{}` contains a reserved character", t.escape_default()))
            }
            other => Ok(other.to_string()),
        },
        ValueSpec::Rated(quantity) => {
            let Some(rating) = rating else {
                return Err(format!("no rating known for this {}", quantity.as_ref().to_lowercase()));
            };
            let (min, max) = rating.range(quantity);
            let v = as_real(value)?;
            check_range(v, min, max)?;
            Ok(format!("{v:?}"))
        }
    }
}

fn as_real(value: &Value) -> std::result::Result<f64, String> {
    match value {
        Value::Real(v) => Ok(*v),
        Value::Int(v) => Ok(*v as f64),
        Value::Text(t) => t
            .trim()
            .parse()
            .map_err(|_| format!("`{t}` is not a number")),
    }
}

fn check_range(v: f64, min: f64, max: f64) -> std::result::Result<(), String> {
    if v.is_finite() && v >= min && v <= max {
        Ok(())
    } else {
        Err(format!("{v} out of range {min}..={max}"))
    }
}

/// Everything a model understands, plus how it may be reached.
#[derive(Debug)]
pub struct CommandTable {
    pub model: &'static str,
    /// Largest channel number any variant of the model has
    pub channels: u8,
    pub transports: &'static [TransportKind],
    pub default_timeout: Duration,
    pub commands: &'static [CommandDescriptor],
}
impl CommandTable {
    pub fn get(&self, name: &str) -> Result<&'static CommandDescriptor> {
        let commands: &'static [CommandDescriptor] = self.commands;
        commands
            .iter()
            .chain(ieee488::COMMON)
            .find(|c| c.name == name)
            .ok_or_else(|| Error::NotSupported(format!("{} has no `{name}` operation", self.model)))
    }

    pub fn supports(&self, kind: TransportKind) -> bool {
        self.transports.contains(&kind)
    }
}

/// IEEE 488.2 common commands, understood by every model
pub mod ieee488 {
    use std::time::Duration;

    use super::CommandDescriptor;
    use crate::protocol::ReplyKind;

    pub const IDN: CommandDescriptor = CommandDescriptor::query("identify", "*IDN?", ReplyKind::Text);
    /// Instruments are unresponsive for a while after a reset
    pub const RST: CommandDescriptor =
        CommandDescriptor::write("factory_reset", "*RST", &[]).with_settle(Duration::from_secs(5));
    pub const CLS: CommandDescriptor = CommandDescriptor::write("clear_status", "*CLS", &[]);
    pub const WAI: CommandDescriptor = CommandDescriptor::write("wai", "*WAI", &[]);
    pub const OPC: CommandDescriptor =
        CommandDescriptor::query("operation_complete", "*OPC?", ReplyKind::Numeric);

    pub const COMMON: &[CommandDescriptor] = &[IDN, RST, CLS, WAI, OPC];
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATINGS: &[ChannelRating] = &[
        ChannelRating::new(0.0, 30.0, 3.0),
        ChannelRating::new(0.0, 30.0, 3.0),
        ChannelRating::new(0.0, 5.0, 3.0),
    ];
    const LIMITS: ChannelLimits<'static> = ChannelLimits {
        count: 3,
        ratings: RATINGS,
    };

    const SET_VOLTAGE: CommandDescriptor = CommandDescriptor::write(
        "set_voltage",
        ":SOUR{chan}:VOLT {value}",
        &[arg("value", ValueSpec::Rated(Quantity::Voltage))],
    );
    const OUTPUT: CommandDescriptor =
        CommandDescriptor::write("output", ":OUTP CH{chan},{state}", &[arg("state", ON_OFF)]);
    const RANGE: CommandDescriptor = CommandDescriptor::write(
        "range",
        "CURR:RANG {value}",
        &[arg(
            "value",
            ValueSpec::Real {
                min: 0.0,
                max: 0.105,
                keywords: &["MIN", "MAX", "DEF"],
            },
        )],
    );

    #[test]
    fn formats_channel_and_values() {
        let cmd = SET_VOLTAGE
            .format(Some(1), &[("value", 5.0.into())], &LIMITS)
            .unwrap();
        assert_eq!(cmd, ":SOUR1:VOLT 5.0");

        let cmd = OUTPUT
            .format(Some(2), &[("state", "on".into())], &LIMITS)
            .unwrap();
        assert_eq!(cmd, ":OUTP CH2,ON");

        let cmd = RANGE.format(None, &[("value", "max".into())], &LIMITS).unwrap();
        assert_eq!(cmd, "CURR:RANG MAX");
        let cmd = RANGE.format(None, &[("value", 0.01.into())], &LIMITS).unwrap();
        assert_eq!(cmd, "CURR:RANG 0.01");
    }

    #[test]
    fn rejects_channels_outside_the_model() {
        for chan in [0, 4] {
            assert!(matches!(
                SET_VOLTAGE.format(Some(chan), &[("value", 1.0.into())], &LIMITS),
                Err(Error::Validation(_))
            ));
        }
        assert!(matches!(
            SET_VOLTAGE.format(None, &[("value", 1.0.into())], &LIMITS),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            RANGE.format(Some(1), &[("value", 0.01.into())], &LIMITS),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn rated_values_follow_the_channel() {
        assert!(
            SET_VOLTAGE
                .format(Some(1), &[("value", 30.0.into())], &LIMITS)
                .is_ok()
        );
        assert!(matches!(
            SET_VOLTAGE.format(Some(3), &[("value", 30.0.into())], &LIMITS),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            SET_VOLTAGE.format(Some(1), &[("value", f64::NAN.into())], &LIMITS),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(matches!(
            OUTPUT.format(Some(1), &[("state", "maybe".into())], &LIMITS),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            OUTPUT.format(Some(1), &[], &LIMITS),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            OUTPUT.format(Some(1), &[("state", "ON".into()), ("extra", 1.into())], &LIMITS),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            RANGE.format(None, &[("value", 0.2.into())], &LIMITS),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn text_may_not_break_the_message() {
        const LABEL: CommandDescriptor = CommandDescriptor::write(
            "label",
            "CH{chan}:LAB \"{text}\"",
            &[arg("text", ValueSpec::Text)],
        );
        assert_eq!(
            LABEL
                .format(Some(1), &[("text", "Vout".into())], &LIMITS)
                .unwrap(),
            "CH1:LAB \"Vout\""
        );
        assert!(
            LABEL
                .format(Some(1), &[("text", "a;*RST".into())], &LIMITS)
                .is_err()
        );
    }

    #[test]
    fn lookup_includes_common_commands() {
        let table = CommandTable {
            model: "Test",
            channels: 3,
            transports: &[TransportKind::Ip],
            default_timeout: Duration::from_secs(1),
            commands: &[SET_VOLTAGE],
        };
        assert_eq!(table.get("set_voltage").unwrap().template, ":SOUR{chan}:VOLT {value}");
        assert_eq!(table.get("identify").unwrap().template, "*IDN?");
        assert!(matches!(table.get("sweep"), Err(Error::NotSupported(_))));
        assert!(!table.supports(TransportKind::Gpib));
    }
}
