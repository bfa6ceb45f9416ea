//! Instrument drivers
//!
//! Every driver wraps a [`DriverCore`]: the protocol layer plus the model's command table.
//! Operations check the connection first, then channel and argument validity, and only then
//! touch the bus.

use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};
use strum_macros::{AsRefStr, EnumIter};

pub mod drivers;
pub mod multimeter;

use crate::{
    bus::Connector,
    connection::{ConnectionManager, ConnectionSpec, ConnectionStatus},
    error::{Error, Result},
    model::{
        KeithleyFamily, KeysightFamily, Manufacturer, ModelInfo, RigolFamily, TektronixFamily,
    },
    protocol::{
        ChannelLimits, ChannelRating, CommandDescriptor, CommandTable, Reply, ScpiProtocol, Value,
        ieee488,
    },
};

/// Outcome of opening a driver. A failed open still hands back the driver, so the caller can
/// inspect its status or retry [`Instrument::connect`].
pub enum Opened<D> {
    Ready(D),
    Failed(D, Error),
}
impl<D> Opened<D> {
    pub(crate) fn new(driver: D, failure: Option<Error>) -> Self {
        match failure {
            None => Self::Ready(driver),
            Some(err) => Self::Failed(driver, err),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn reason(&self) -> Option<&Error> {
        match self {
            Self::Ready(_) => None,
            Self::Failed(_, err) => Some(err),
        }
    }

    /// The driver when it connected, the connection error otherwise.
    pub fn into_result(self) -> Result<D> {
        match self {
            Self::Ready(driver) => Ok(driver),
            Self::Failed(_, err) => Err(err),
        }
    }

    /// The driver, whatever its state.
    pub fn into_driver(self) -> D {
        match self {
            Self::Ready(driver) | Self::Failed(driver, _) => driver,
        }
    }
}

/// State shared by all drivers.
pub struct DriverCore {
    proto: ScpiProtocol,
    table: &'static CommandTable,
    channels: u8,
    ratings: &'static [ChannelRating],
}
impl DriverCore {
    /// Connect to `spec` using `table`'s default timeout unless the spec sets one.
    pub(crate) async fn open(
        spec: ConnectionSpec,
        connector: Arc<dyn Connector>,
        table: &'static CommandTable,
        ratings: &'static [ChannelRating],
    ) -> (Self, Option<Error>) {
        let spec = spec.or_timeout(table.default_timeout);
        let mut core = Self {
            proto: ScpiProtocol::new(ConnectionManager::with_connector(spec, connector)),
            table,
            channels: channel_count(table, ratings),
            ratings,
        };
        let failure = core.connect().await.err();
        (core, failure)
    }

    pub async fn connect(&mut self) -> Result<()> {
        let kind = self.proto.connection().spec().kind();
        if !self.table.supports(kind) {
            let err = Error::Connection(format!(
                "{} cannot be reached over {kind}",
                self.table.model
            ));
            self.proto.connection_mut().mark_error(&err);
            return Err(err);
        }
        self.proto.connect().await
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        self.proto.disconnect().await
    }

    pub fn status(&self) -> ConnectionStatus {
        self.proto.status()
    }

    pub fn table(&self) -> &'static CommandTable {
        self.table
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn ratings(&self) -> &'static [ChannelRating] {
        self.ratings
    }

    /// Switch to the limits of a specific model variant.
    pub(crate) fn set_ratings(&mut self, ratings: &'static [ChannelRating]) {
        self.ratings = ratings;
        self.channels = channel_count(self.table, ratings);
    }

    /// Raw protocol access for commands the table does not cover.
    pub fn protocol_mut(&mut self) -> &mut ScpiProtocol {
        &mut self.proto
    }

    pub(crate) async fn run(
        &mut self,
        desc: &CommandDescriptor,
        channel: Option<u8>,
        args: &[(&str, Value)],
    ) -> Result<Reply> {
        let limits = ChannelLimits {
            count: self.channels,
            ratings: self.ratings,
        };
        self.proto.execute(desc, channel, args, &limits).await
    }

    /// Run a table operation by name.
    pub async fn call(
        &mut self,
        name: &str,
        channel: Option<u8>,
        args: &[(&str, Value)],
    ) -> Result<Reply> {
        let desc = self.table.get(name)?;
        self.run(desc, channel, args).await
    }

    pub async fn identify(&mut self) -> Result<ModelInfo> {
        let idn = self.run(&ieee488::IDN, None, &[]).await?.into_text()?;
        let info = ModelInfo::from_idn(&idn)?;
        info!("{} identified as {info}", self.proto.connection().spec().resource());
        Ok(info)
    }
}

fn channel_count(table: &CommandTable, ratings: &[ChannelRating]) -> u8 {
    if ratings.is_empty() {
        table.channels
    } else {
        ratings.len().min(usize::from(table.channels)) as u8
    }
}

/// Operations every driver supports.
#[async_trait]
pub trait Instrument: Send {
    fn core(&self) -> &DriverCore;

    fn core_mut(&mut self) -> &mut DriverCore;

    fn status(&self) -> ConnectionStatus {
        self.core().status()
    }

    async fn connect(&mut self) -> Result<()> {
        self.core_mut().connect().await
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.core_mut().disconnect().await
    }

    async fn identify(&mut self) -> Result<ModelInfo> {
        self.core_mut().identify().await
    }

    /// `*RST`, then wait for the instrument to come back.
    async fn factory_reset(&mut self) -> Result<()> {
        self.core_mut().run(&ieee488::RST, None, &[]).await?;
        Ok(())
    }
}

/// Supported instrument families.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, AsRefStr)]
pub enum DriverKind {
    #[strum(serialize = "Rigol DP800")]
    RigolDp800,
    #[strum(serialize = "Rigol DG4000")]
    RigolDg4000,
    #[strum(serialize = "Keithley 2100")]
    Keithley2100,
    #[strum(serialize = "Keysight 34461A")]
    Keysight34461A,
    #[strum(serialize = "Keithley 6221")]
    Keithley6221,
    #[strum(serialize = "Tektronix DPO4000")]
    TekDpo4000,
}
impl DriverKind {
    pub fn table(&self) -> &'static CommandTable {
        match self {
            Self::RigolDp800 => &drivers::rigol_dp800::TABLE,
            Self::RigolDg4000 => &drivers::rigol_dg4000::TABLE,
            Self::Keithley2100 => &drivers::keithley_2100::TABLE,
            Self::Keysight34461A => &drivers::keysight_34461a::TABLE,
            Self::Keithley6221 => &drivers::keithley_6221::TABLE,
            Self::TekDpo4000 => &drivers::tek_dpo4000::TABLE,
        }
    }

    /// Driver for an identified instrument, if there is one.
    pub fn for_model(info: &ModelInfo) -> Option<Self> {
        match info.man_family {
            Manufacturer::Rigol(RigolFamily::DP800) => Some(Self::RigolDp800),
            Manufacturer::Rigol(RigolFamily::DG4000) => Some(Self::RigolDg4000),
            Manufacturer::Keithley(KeithleyFamily::Dmm2100) => Some(Self::Keithley2100),
            Manufacturer::Keithley(KeithleyFamily::CurrentSource622x) => Some(Self::Keithley6221),
            Manufacturer::Keysight(KeysightFamily::Truevolt3446x) => Some(Self::Keysight34461A),
            Manufacturer::Tektronix(TektronixFamily::DPO4000) => Some(Self::TekDpo4000),
            _ => {
                warn!("No driver for {info}");
                None
            }
        }
    }
}
