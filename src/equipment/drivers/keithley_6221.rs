use std::{sync::Arc, time::Duration};

use crate::{
    bus::{Connector, SystemConnector},
    connection::ConnectionSpec,
    equipment::{DriverCore, Instrument, Opened},
    error::Result,
    protocol::{CommandDescriptor, CommandTable, ON_OFF, Value, ValueSpec, arg},
    resource::TransportKind,
};

/// The source needs about a second to settle after output and range changes
const SETTLE: Duration = Duration::from_secs(1);

const CLEAR: CommandDescriptor = CommandDescriptor::write("clear", "CLE", &[]);
const OUTPUT: CommandDescriptor =
    CommandDescriptor::write("output", "OUTP {state}", &[arg("state", ON_OFF)]).with_settle(SETTLE);
const CURRENT_RANGE: CommandDescriptor = CommandDescriptor::write(
    "current_range",
    "CURR:RANG {value}",
    &[arg(
        "value",
        ValueSpec::Real {
            min: 0.0,
            max: 0.105,
            keywords: &["MIN", "MAX", "DEF"],
        },
    )],
)
.with_settle(SETTLE);
const AUTO_RANGE: CommandDescriptor =
    CommandDescriptor::write("auto_range", "CURR:RANG:AUTO {state}", &[arg("state", ON_OFF)])
        .with_settle(SETTLE);
const CURRENT: CommandDescriptor = CommandDescriptor::write(
    "current",
    "CURR {value}",
    &[arg(
        "value",
        ValueSpec::Real {
            min: -0.105,
            max: 0.105,
            keywords: &["MIN", "MAX", "DEF"],
        },
    )],
)
.with_settle(SETTLE);
const COMPLIANCE: CommandDescriptor = CommandDescriptor::write(
    "compliance",
    "CURR:COMP {value}",
    &[arg(
        "value",
        ValueSpec::Real {
            min: 0.1,
            max: 105.0,
            keywords: &["MIN", "MAX", "DEF"],
        },
    )],
)
.with_settle(SETTLE);

/// Only the Ethernet interface is supported.
pub static TABLE: CommandTable = CommandTable {
    model: "Keithley 6221",
    channels: 0,
    transports: &[TransportKind::Ip],
    default_timeout: Duration::from_secs(2),
    commands: &[CLEAR, OUTPUT, CURRENT_RANGE, AUTO_RANGE, CURRENT, COMPLIANCE],
};

/// Keithley 6221 AC/DC precision current source
pub struct Keithley6221 {
    core: DriverCore,
}
impl Keithley6221 {
    pub async fn open(spec: ConnectionSpec) -> Opened<Self> {
        Self::open_with(spec, Arc::new(SystemConnector)).await
    }

    pub async fn open_with(spec: ConnectionSpec, connector: Arc<dyn Connector>) -> Opened<Self> {
        let (core, failure) = DriverCore::open(spec, connector, &TABLE, &[]).await;
        Opened::new(Self { core }, failure)
    }

    /// Output off and level to zero.
    pub async fn clear(&mut self) -> Result<()> {
        self.core.run(&CLEAR, None, &[]).await?;
        Ok(())
    }

    pub async fn output(&mut self, state: &str) -> Result<()> {
        self.core.run(&OUTPUT, None, &[("state", state.into())]).await?;
        Ok(())
    }

    /// Fixed source range, picked as the lowest range that can source `amps`. Disables
    /// autorange.
    pub async fn current_range(&mut self, amps: impl Into<Value>) -> Result<()> {
        self.core
            .run(&CURRENT_RANGE, None, &[("value", amps.into())])
            .await?;
        Ok(())
    }

    pub async fn auto_range(&mut self, state: &str) -> Result<()> {
        self.core
            .run(&AUTO_RANGE, None, &[("state", state.into())])
            .await?;
        Ok(())
    }

    /// DC output level, -105 mA to 105 mA
    pub async fn current(&mut self, amps: f64) -> Result<()> {
        self.core.run(&CURRENT, None, &[("value", amps.into())]).await?;
        Ok(())
    }

    /// Compliance voltage, 0.1 V to 105 V
    pub async fn compliance(&mut self, volts: f64) -> Result<()> {
        self.core
            .run(&COMPLIANCE, None, &[("value", volts.into())])
            .await?;
        Ok(())
    }
}
impl Instrument for Keithley6221 {
    fn core(&self) -> &DriverCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DriverCore {
        &mut self.core
    }
}
