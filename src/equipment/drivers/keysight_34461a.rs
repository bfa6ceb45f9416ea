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

/* Same MEASure subset as the Keithley 2100, so the two are interchangeable */
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

pub static TABLE: CommandTable = CommandTable {
    model: "Keysight 34461A",
    channels: 0,
    transports: &[TransportKind::Ip, TransportKind::Usb],
    default_timeout: Duration::from_secs(5),
    commands: &[MEAS_DCV, MEAS_RES],
};

/// Keysight Truevolt 34461A multimeter
pub struct Keysight34461A {
    core: DriverCore,
}
impl Keysight34461A {
    pub async fn open(spec: ConnectionSpec) -> Opened<Self> {
        Self::open_with(spec, Arc::new(SystemConnector)).await
    }

    pub async fn open_with(spec: ConnectionSpec, connector: Arc<dyn Connector>) -> Opened<Self> {
        let (core, failure) = DriverCore::open(spec, connector, &TABLE, &[]).await;
        Opened::new(Self { core }, failure)
    }
}
impl Instrument for Keysight34461A {
    fn core(&self) -> &DriverCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DriverCore {
        &mut self.core
    }
}
#[async_trait]
impl MultimeterEquipment for Keysight34461A {
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
