use std::{sync::Arc, time::Duration};

use log::{info, warn};
use strum_macros::{AsRefStr, EnumIter};

use crate::{
    bus::{Connector, SystemConnector},
    connection::ConnectionSpec,
    data::{Reading, Unit},
    equipment::{DriverCore, Instrument, Opened},
    error::{Error, Result},
    model::{Manufacturer, RigolFamily},
    protocol::{
        ChannelRating, CommandDescriptor, CommandTable, ON_OFF, Quantity, ReplyKind, ValueSpec,
        arg,
    },
    resource::TransportKind,
};

const SELECT_OUTPUT: CommandDescriptor = CommandDescriptor::write("select_output", ":INST:NSEL {chan}", &[]);
const TOGGLE_OUTPUT: CommandDescriptor =
    CommandDescriptor::write("toggle_output", ":OUTP CH{chan},{state}", &[arg("state", ON_OFF)]);
const OUTPUT_STATE: CommandDescriptor =
    CommandDescriptor::query("output_state", ":OUTP? CH{chan}", ReplyKind::Text);
const SET_VOLTAGE: CommandDescriptor = CommandDescriptor::write(
    "set_voltage",
    ":SOUR{chan}:VOLT {value}",
    &[arg("value", ValueSpec::Rated(Quantity::Voltage))],
);
const SET_CURRENT: CommandDescriptor = CommandDescriptor::write(
    "set_current",
    ":SOUR{chan}:CURR {value}",
    &[arg("value", ValueSpec::Rated(Quantity::Current))],
);
const SET_OVP: CommandDescriptor = CommandDescriptor::write(
    "set_ovp",
    ":SOUR{chan}:VOLT:PROT {value}",
    &[arg("value", ValueSpec::Rated(Quantity::OverVoltage))],
);
const TOGGLE_OVP: CommandDescriptor = CommandDescriptor::write(
    "toggle_ovp",
    ":SOUR{chan}:VOLT:PROT:STAT {state}",
    &[arg("state", ON_OFF)],
);
const SET_OCP: CommandDescriptor = CommandDescriptor::write(
    "set_ocp",
    ":SOUR{chan}:CURR:PROT {value}",
    &[arg("value", ValueSpec::Rated(Quantity::OverCurrent))],
);
const TOGGLE_OCP: CommandDescriptor = CommandDescriptor::write(
    "toggle_ocp",
    ":SOUR{chan}:CURR:PROT:STAT {state}",
    &[arg("state", ON_OFF)],
);
const MEAS_VOLTAGE: CommandDescriptor =
    CommandDescriptor::query("meas_voltage", ":MEAS:VOLT? CH{chan}", ReplyKind::Numeric);
const MEAS_CURRENT: CommandDescriptor =
    CommandDescriptor::query("meas_current", ":MEAS:CURR? CH{chan}", ReplyKind::Numeric);
const MEAS_POWER: CommandDescriptor =
    CommandDescriptor::query("meas_power", ":MEAS:POWE? CH{chan}", ReplyKind::Numeric);
const APPLY: CommandDescriptor = CommandDescriptor::write(
    "apply",
    ":APPL CH{chan},{voltage},{current}",
    &[
        arg("voltage", ValueSpec::Rated(Quantity::Voltage)),
        arg("current", ValueSpec::Rated(Quantity::Current)),
    ],
);

pub static TABLE: CommandTable = CommandTable {
    model: "Rigol DP800",
    channels: 3,
    transports: &[TransportKind::Ip, TransportKind::Usb],
    default_timeout: Duration::from_secs(2),
    commands: &[
        SELECT_OUTPUT,
        TOGGLE_OUTPUT,
        OUTPUT_STATE,
        SET_VOLTAGE,
        SET_CURRENT,
        SET_OVP,
        TOGGLE_OVP,
        SET_OCP,
        TOGGLE_OCP,
        MEAS_VOLTAGE,
        MEAS_CURRENT,
        MEAS_POWER,
        APPLY,
    ],
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, AsRefStr)]
pub enum Dp800Model {
    DP811,
    DP813,
    DP821,
    DP822,
    DP831,
    DP832,
}
impl Dp800Model {
    /// Output ratings, one per channel
    pub fn ratings(&self) -> &'static [ChannelRating] {
        match self {
            Self::DP811 => const { &[ChannelRating::new(0.0, 40.0, 10.0)] },
            Self::DP813 => const { &[ChannelRating::new(0.0, 20.0, 20.0)] },
            Self::DP821 => const { &[
                ChannelRating::new(0.0, 60.0, 1.0),
                ChannelRating::new(0.0, 8.0, 10.0),
            ] },
            Self::DP822 => const { &[
                ChannelRating::new(0.0, 20.0, 5.0),
                ChannelRating::new(0.0, 5.0, 16.0),
            ] },
            Self::DP831 => const { &[
                ChannelRating::new(0.0, 8.0, 5.0),
                ChannelRating::new(0.0, 30.0, 2.0),
                ChannelRating::new(-30.0, 0.0, 2.0),
            ] },
            Self::DP832 => const { &[
                ChannelRating::new(0.0, 30.0, 3.0),
                ChannelRating::new(0.0, 30.0, 3.0),
                ChannelRating::new(0.0, 5.0, 3.0),
            ] },
        }
    }

    /// Variant from a model string such as `DP832A`
    pub fn from_model(model: &str) -> Option<Self> {
        let mdl = model.trim().to_uppercase();
        if mdl.starts_with("DP811") {
            Some(Self::DP811)
        } else if mdl.starts_with("DP813") {
            Some(Self::DP813)
        } else if mdl.starts_with("DP821") {
            Some(Self::DP821)
        } else if mdl.starts_with("DP822") {
            Some(Self::DP822)
        } else if mdl.starts_with("DP831") {
            Some(Self::DP831)
        } else if mdl.starts_with("DP832") {
            Some(Self::DP832)
        } else {
            None
        }
    }
}

/// Rigol DP800 series programmable power supply
pub struct Dp800 {
    core: DriverCore,
    variant: Dp800Model,
}
impl Dp800 {
    /// Open assuming a DP832, the most common variant.
    pub async fn open(spec: ConnectionSpec) -> Opened<Self> {
        Self::open_with(spec, Arc::new(SystemConnector)).await
    }

    pub async fn open_with(spec: ConnectionSpec, connector: Arc<dyn Connector>) -> Opened<Self> {
        Self::open_variant(spec, connector, Dp800Model::DP832).await
    }

    pub async fn open_variant(
        spec: ConnectionSpec,
        connector: Arc<dyn Connector>,
        variant: Dp800Model,
    ) -> Opened<Self> {
        let (core, failure) = DriverCore::open(spec, connector, &TABLE, variant.ratings()).await;
        Opened::new(Self { core, variant }, failure)
    }

    pub fn variant(&self) -> Dp800Model {
        self.variant
    }

    /// Identify the instrument and switch to the matching variant's ratings.
    pub async fn detect_model(&mut self) -> Result<Dp800Model> {
        let info = self.core.identify().await?;
        if info.man_family != Manufacturer::Rigol(RigolFamily::DP800) {
            warn!("{info} does not look like a DP800 series supply");
        }
        let variant = Dp800Model::from_model(&info.model).ok_or_else(|| {
            Error::NotSupported(format!("Unknown DP800 variant {}", info.model))
        })?;

        info!("Using {} ratings", variant.as_ref());
        self.variant = variant;
        self.core.set_ratings(variant.ratings());
        Ok(variant)
    }

    pub async fn select_output(&mut self, chan: u8) -> Result<()> {
        self.core.run(&SELECT_OUTPUT, Some(chan), &[]).await?;
        Ok(())
    }

    /// Switch an output on or off, then read back the state the supply reports.
    pub async fn toggle_output(&mut self, chan: u8, state: &str) -> Result<bool> {
        self.core
            .run(&TOGGLE_OUTPUT, Some(chan), &[("state", state.into())])
            .await?;
        self.output_enabled(chan).await
    }

    pub async fn output_enabled(&mut self, chan: u8) -> Result<bool> {
        let state = self
            .core
            .run(&OUTPUT_STATE, Some(chan), &[])
            .await?
            .into_text()?;
        parse_on_off(&state)
    }

    pub async fn set_voltage(&mut self, chan: u8, volts: f64) -> Result<()> {
        self.core
            .run(&SET_VOLTAGE, Some(chan), &[("value", volts.into())])
            .await?;
        Ok(())
    }

    pub async fn set_current(&mut self, chan: u8, amps: f64) -> Result<()> {
        self.core
            .run(&SET_CURRENT, Some(chan), &[("value", amps.into())])
            .await?;
        Ok(())
    }

    pub async fn set_ovp(&mut self, chan: u8, volts: f64) -> Result<()> {
        self.core
            .run(&SET_OVP, Some(chan), &[("value", volts.into())])
            .await?;
        Ok(())
    }

    pub async fn toggle_ovp(&mut self, chan: u8, state: &str) -> Result<()> {
        self.core
            .run(&TOGGLE_OVP, Some(chan), &[("state", state.into())])
            .await?;
        Ok(())
    }

    pub async fn set_ocp(&mut self, chan: u8, amps: f64) -> Result<()> {
        self.core
            .run(&SET_OCP, Some(chan), &[("value", amps.into())])
            .await?;
        Ok(())
    }

    pub async fn toggle_ocp(&mut self, chan: u8, state: &str) -> Result<()> {
        self.core
            .run(&TOGGLE_OCP, Some(chan), &[("state", state.into())])
            .await?;
        Ok(())
    }

    pub async fn meas_voltage(&mut self, chan: u8) -> Result<Reading> {
        let v = self.core.run(&MEAS_VOLTAGE, Some(chan), &[]).await?.into_f64()?;
        Ok(Reading::from_scpi(Unit::Voltage, v))
    }

    pub async fn meas_current(&mut self, chan: u8) -> Result<Reading> {
        let v = self.core.run(&MEAS_CURRENT, Some(chan), &[]).await?.into_f64()?;
        Ok(Reading::from_scpi(Unit::Current, v))
    }

    pub async fn meas_power(&mut self, chan: u8) -> Result<Reading> {
        let v = self.core.run(&MEAS_POWER, Some(chan), &[]).await?.into_f64()?;
        Ok(Reading::from_scpi(Unit::Power, v))
    }

    /// Set voltage and current limit in one command.
    pub async fn apply(&mut self, chan: u8, volts: f64, amps: f64) -> Result<()> {
        self.core
            .run(
                &APPLY,
                Some(chan),
                &[("voltage", volts.into()), ("current", amps.into())],
            )
            .await?;
        Ok(())
    }
}
impl Instrument for Dp800 {
    fn core(&self) -> &DriverCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DriverCore {
        &mut self.core
    }
}

fn parse_on_off(state: &str) -> Result<bool> {
    match state.trim().to_uppercase().as_str() {
        "ON" | "1" => Ok(true),
        "OFF" | "0" => Ok(false),
        other => Err(Error::Parse(format!("`{other}` is not an output state"))),
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn variants_round_trip_through_model_names() {
        for variant in Dp800Model::iter() {
            assert_eq!(Dp800Model::from_model(variant.as_ref()), Some(variant));
            assert!(!variant.ratings().is_empty());
        }
        assert_eq!(Dp800Model::from_model("DP832A"), Some(Dp800Model::DP832));
        assert_eq!(Dp800Model::from_model("DP711"), None);
    }

    #[test]
    fn output_state_replies() {
        assert!(parse_on_off("ON").unwrap());
        assert!(parse_on_off("1").unwrap());
        assert!(!parse_on_off("off").unwrap());
        assert!(matches!(parse_on_off("2"), Err(Error::Parse(_))));
    }

    #[test]
    fn negative_channel_accepts_negative_voltage() {
        let limits = crate::protocol::ChannelLimits {
            count: 3,
            ratings: Dp800Model::DP831.ratings(),
        };
        assert_eq!(
            SET_VOLTAGE
                .format(Some(3), &[("value", (-12.5).into())], &limits)
                .unwrap(),
            ":SOUR3:VOLT -12.5"
        );
        assert!(
            SET_VOLTAGE
                .format(Some(1), &[("value", (-1.0).into())], &limits)
                .is_err()
        );
    }
}
