use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    bus::{Connector, SystemConnector},
    connection::ConnectionSpec,
    data::{Reading, Unit},
    equipment::{DriverCore, Instrument, Opened, multimeter::{MultimeterEquipment, meas}},
    error::Result,
    protocol::{CommandDescriptor, CommandTable, ReplyKind, Value},
    resource::TransportKind,
};

const MEAS_DCV: CommandDescriptor = CommandDescriptor::query(
    "meas_dcv",
    "MEASURE:VOLTAGE:DC? {range},{resolution}",
    ReplyKind::Numeric,
)
.with_args(meas::DCV_ARGS);
const MEAS_RES: CommandDescriptor = CommandDescriptor::query(
    "meas_res",
    "MEASURE:RESISTANCE? {range},{resolution}",
    ReplyKind::Numeric,
)
.with_args(meas::RES_ARGS);

/// The 2100 only has a USB-TMC interface.
pub static TABLE: CommandTable = CommandTable {
    model: "Keithley 2100",
    channels: 0,
    transports: &[TransportKind::Usb],
    default_timeout: Duration::from_secs(5),
    commands: &[MEAS_DCV, MEAS_RES],
};

/// Keithley 2100 6½ digit USB multimeter
pub struct Keithley2100 {
    core: DriverCore,
}
impl Keithley2100 {
    pub async fn open(spec: ConnectionSpec) -> Opened<Self> {
        Self::open_with(spec, Arc::new(SystemConnector)).await
    }

    pub async fn open_with(spec: ConnectionSpec, connector: Arc<dyn Connector>) -> Opened<Self> {
        let (core, failure) = DriverCore::open(spec, connector, &TABLE, &[]).await;
        Opened::new(Self { core }, failure)
    }
}
impl Instrument for Keithley2100 {
    fn core(&self) -> &DriverCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DriverCore {
        &mut self.core
    }
}
#[async_trait]
impl MultimeterEquipment for Keithley2100 {
    async fn meas_dcv(&mut self, range: Value, resolution: Value) -> Result<Reading> {
        let v = self
            .core
            .run(&MEAS_DCV, None, &[("range", range), ("resolution", resolution)])
            .await?
            .into_f64()?;
        Ok(Reading::from_scpi(Unit::Voltage, v))
    }

    async fn meas_res(&mut self, range: Value, resolution: Value) -> Result<Reading> {
        let v = self
            .core
            .run(&MEAS_RES, None, &[("range", range), ("resolution", resolution)])
            .await?
            .into_f64()?;
        Ok(Reading::from_scpi(Unit::Resistance, v))
    }
}
