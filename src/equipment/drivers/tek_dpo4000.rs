use std::{sync::Arc, time::Duration};

use log::debug;

use crate::{
    bus::{Connector, SystemConnector},
    connection::ConnectionSpec,
    data::{Readings, Unit},
    equipment::{DriverCore, Instrument, Opened},
    error::{Error, Result},
    protocol::{CommandDescriptor, CommandTable, ON_OFF, ReplyKind, Value, ValueSpec, arg, ieee488},
    resource::TransportKind,
};

const HORIZONTAL_RECORD_LENGTH: CommandDescriptor = CommandDescriptor::write(
    "horizontal_record_length",
    "HOR:RECO {value}",
    &[arg(
        "value",
        ValueSpec::Int {
            min: 1000,
            max: 20_000_000,
        },
    )],
);
const HORIZONTAL_SCALE: CommandDescriptor = CommandDescriptor::write(
    "horizontal_scale",
    "HOR:SCA {value}",
    &[arg(
        "value",
        ValueSpec::Real {
            min: 400e-12,
            max: 1000.0,
            keywords: &[],
        },
    )],
);
const BANDWIDTH: CommandDescriptor = CommandDescriptor::write(
    "bandwidth",
    "CH{chan}:BAN {value}",
    &[arg(
        "value",
        ValueSpec::Real {
            min: 0.0,
            max: 1.5e9,
            keywords: &["TWE", "TWENTY", "TWO", "TWOFIFTY", "FUL", "FULL"],
        },
    )],
);
const COUPLING: CommandDescriptor = CommandDescriptor::write(
    "coupling",
    "CH{chan}:COUP {value}",
    &[arg("value", ValueSpec::Choice(&["AC", "DC", "GND"]))],
);
const DESKEW: CommandDescriptor = CommandDescriptor::write(
    "deskew",
    "CH{chan}:DESK {value}",
    &[arg(
        "value",
        ValueSpec::Real {
            min: -100e-9,
            max: 100e-9,
            keywords: &[],
        },
    )],
);
const INVERT: CommandDescriptor =
    CommandDescriptor::write("invert", "CH{chan}:INV {state}", &[arg("state", ON_OFF)]);
const LABEL: CommandDescriptor = CommandDescriptor::write(
    "label",
    "CH{chan}:LAB \"{text}\"",
    &[arg("text", ValueSpec::Text)],
);
const VERTICAL_POSITION: CommandDescriptor = CommandDescriptor::write(
    "vertical_position",
    "CH{chan}:POS {value}",
    &[arg(
        "value",
        ValueSpec::Real {
            min: -8.0,
            max: 8.0,
            keywords: &[],
        },
    )],
);
const PROBE_GAIN: CommandDescriptor = CommandDescriptor::write(
    "probe_gain",
    "CH{chan}:PRO:GAIN {value}",
    &[arg(
        "value",
        ValueSpec::Real {
            min: 1e-4,
            max: 1e4,
            keywords: &[],
        },
    )],
);
const VERTICAL_SCALE: CommandDescriptor = CommandDescriptor::write(
    "vertical_scale",
    "CH{chan}:SCA {value}",
    &[arg(
        "value",
        ValueSpec::Real {
            min: 1e-3,
            max: 10.0,
            keywords: &[],
        },
    )],
);
const TERMINATION: CommandDescriptor = CommandDescriptor::write(
    "termination",
    "CH{chan}:TER {value}",
    &[arg(
        "value",
        ValueSpec::Real {
            min: 50.0,
            max: 1e6,
            keywords: &["FIF", "FIFTY", "MEG"],
        },
    )],
);
const UNITS: CommandDescriptor = CommandDescriptor::write(
    "units",
    "CH{chan}:YUN \"{units}\"",
    &[arg(
        "units",
        ValueSpec::Choice(&[
            "%", "/Hz", "A", "A/A", "A/V", "A/W", "A/dB", "A/s", "AA", "AW", "AdB", "As", "B",
            "Hz", "IRE", "S/s", "V", "V/A", "V/V", "V/W", "V/dB", "V/s", "VV", "VW", "VdB",
            "Volts", "Vs", "W", "W/A", "W/V", "W/W", "W/dB", "W/s", "WA", "WV", "WW", "WdB",
            "Ws", "dB", "dB/A", "dB/V", "dB/W", "dB/dB", "dBA", "dBV", "dBW", "dBdB", "day",
            "degrees", "div", "hr", "min", "ohms", "percent", "s",
        ]),
    )],
);
const SELECT_CHANNEL: CommandDescriptor =
    CommandDescriptor::write("select_channel", "SEL:CH{chan} {state}", &[arg("state", ON_OFF)]);
const ACQUIRE_STOPAFTER: CommandDescriptor = CommandDescriptor::write(
    "acquire_stopafter",
    "ACQ:STOPA {value}",
    &[arg(
        "value",
        ValueSpec::Choice(&["RUNST", "RUNSTOP", "SEQ", "SEQUENCE"]),
    )],
);
const ACQUIRE_STATE: CommandDescriptor = CommandDescriptor::write(
    "acquire_state",
    "ACQ:STATE {value}",
    &[arg(
        "value",
        ValueSpec::Choice(&["ON", "OFF", "RUN", "STOP", "1", "0"]),
    )],
);
const DATA_SOURCE: CommandDescriptor = CommandDescriptor::write("data_source", "DATA:SOU CH{chan}", &[]);
const DATA_WIDTH: CommandDescriptor = CommandDescriptor::write(
    "data_width",
    "DATA:WIDTH {value}",
    &[arg("value", ValueSpec::Int { min: 1, max: 2 })],
);
const DATA_ENCODING: CommandDescriptor = CommandDescriptor::write(
    "data_encoding",
    "DATA:ENC {value}",
    &[arg(
        "value",
        ValueSpec::Choice(&[
            "ASCI", "ASCII", "RIB", "RIBINARY", "RPB", "RPBINARY", "SRI", "SRIBINARY", "SRP",
            "SRPBINARY",
        ]),
    )],
);
const WFMPRE_YMULT: CommandDescriptor =
    CommandDescriptor::query("wfmpre_ymult", "WFMPRE:YMULT?", ReplyKind::Numeric);
const WFMPRE_YZERO: CommandDescriptor =
    CommandDescriptor::query("wfmpre_yzero", "WFMPRE:YZERO?", ReplyKind::Numeric);
const WFMPRE_YOFF: CommandDescriptor =
    CommandDescriptor::query("wfmpre_yoff", "WFMPRE:YOFF?", ReplyKind::Numeric);
const WFMPRE_XINCR: CommandDescriptor =
    CommandDescriptor::query("wfmpre_xincr", "WFMPRE:XINCR?", ReplyKind::Numeric);
const CURVE: CommandDescriptor = CommandDescriptor::query("curve", "CURVE?", ReplyKind::Block);
const MEASURE_SOURCE: CommandDescriptor =
    CommandDescriptor::write("measure_source", "MEASU:IMM:SOU1 CH{chan}", &[]);
const MEASURE_TYPE: CommandDescriptor = CommandDescriptor::write(
    "measure_type",
    "MEASU:IMM:TYP {value}",
    &[arg(
        "value",
        ValueSpec::Choice(&[
            "AMP", "AMPLITUDE", "AREA", "BUR", "BURST", "CAR", "CAREA", "CME", "CMEAN", "CRM",
            "CRMS", "DEL", "DELAY", "FALL", "FREQ", "FREQUENCY", "HIGH", "HITS", "LOW", "MAXI",
            "MAXIMUM", "MEAN", "MINI", "MINIMUM", "NDU", "NDUTY", "NOV", "NOVERSHOOT", "NWI",
            "NWIDTH", "PDU", "PDUTY", "PER", "PERIOD", "PHA", "PHASE", "PK2", "PK2PK", "POV",
            "POVERSHOOT", "PWI", "PWIDTH", "RIS", "RISE", "RMS",
        ]),
    )],
);
const MEASURE_VALUE: CommandDescriptor =
    CommandDescriptor::query("measure_value", "MEASU:IMM:VAL?", ReplyKind::Numeric);

pub static TABLE: CommandTable = CommandTable {
    model: "Tektronix DPO4000",
    channels: 4,
    transports: &[TransportKind::Ip, TransportKind::Usb],
    /* Long records take a while to transfer */
    default_timeout: Duration::from_secs(20),
    commands: &[
        HORIZONTAL_RECORD_LENGTH,
        HORIZONTAL_SCALE,
        BANDWIDTH,
        COUPLING,
        DESKEW,
        INVERT,
        LABEL,
        VERTICAL_POSITION,
        PROBE_GAIN,
        VERTICAL_SCALE,
        TERMINATION,
        UNITS,
        SELECT_CHANNEL,
        ACQUIRE_STOPAFTER,
        ACQUIRE_STATE,
        DATA_SOURCE,
        DATA_WIDTH,
        DATA_ENCODING,
        WFMPRE_YMULT,
        WFMPRE_YZERO,
        WFMPRE_YOFF,
        WFMPRE_XINCR,
        CURVE,
        MEASURE_SOURCE,
        MEASURE_TYPE,
        MEASURE_VALUE,
    ],
};

/// Binary waveform encodings `CURVE?` can return
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    /// Signed, most significant byte first
    Rib,
    /// Unsigned, most significant byte first
    Rpb,
    /// Signed, least significant byte first
    Sri,
    /// Unsigned, least significant byte first
    Srp,
}
impl Encoding {
    pub fn from_token(token: &str) -> Result<Self> {
        match token.to_uppercase().as_str() {
            "RIB" | "RIBINARY" => Ok(Self::Rib),
            "RPB" | "RPBINARY" => Ok(Self::Rpb),
            "SRI" | "SRIBINARY" => Ok(Self::Sri),
            "SRP" | "SRPBINARY" => Ok(Self::Srp),
            _ => Err(Error::Validation(format!(
                "`{token}` is not a binary waveform encoding"
            ))),
        }
    }

    fn token(&self) -> &'static str {
        match self {
            Self::Rib => "RIB",
            Self::Rpb => "RPB",
            Self::Sri => "SRI",
            Self::Srp => "SRP",
        }
    }

    /// Raw sample codes from `CURVE?` data.
    pub fn decode(&self, raw: &[u8], width: u8) -> Result<Vec<f64>> {
        match width {
            1 => Ok(raw
                .iter()
                .map(|b| match self {
                    Self::Rib | Self::Sri => f64::from(*b as i8),
                    Self::Rpb | Self::Srp => f64::from(*b),
                })
                .collect()),
            2 => {
                if raw.len() % 2 != 0 {
                    return Err(Error::Parse(format!(
                        "{} bytes of curve data is not a whole number of 16-bit samples",
                        raw.len()
                    )));
                }
                Ok(raw
                    .chunks_exact(2)
                    .map(|c| {
                        let bytes = [c[0], c[1]];
                        match self {
                            Self::Rib => f64::from(i16::from_be_bytes(bytes)),
                            Self::Rpb => f64::from(u16::from_be_bytes(bytes)),
                            Self::Sri => f64::from(i16::from_le_bytes(bytes)),
                            Self::Srp => f64::from(u16::from_le_bytes(bytes)),
                        }
                    })
                    .collect())
            }
            _ => Err(Error::Validation(format!("Data width must be 1 or 2, got {width}"))),
        }
    }
}

/// Scaling of the curve currently selected by `DATA:SOU`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WaveformPreamble {
    pub ymult: f64,
    pub yzero: f64,
    pub yoff: f64,
    pub xincr: f64,
}
impl WaveformPreamble {
    pub fn to_volts(&self, code: f64) -> f64 {
        (code - self.yoff) * self.ymult + self.yzero
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Waveform {
    pub preamble: WaveformPreamble,
    /// Curve bytes as transferred
    pub raw: Vec<u8>,
    pub volts: Readings,
}

/// Tektronix DPO4000/MSO4000 series oscilloscope
pub struct Dpo4000 {
    core: DriverCore,
}
impl Dpo4000 {
    pub async fn open(spec: ConnectionSpec) -> Opened<Self> {
        Self::open_with(spec, Arc::new(SystemConnector)).await
    }

    pub async fn open_with(spec: ConnectionSpec, connector: Arc<dyn Connector>) -> Opened<Self> {
        let (core, failure) = DriverCore::open(spec, connector, &TABLE, &[]).await;
        Opened::new(Self { core }, failure)
    }

    async fn write(&mut self, desc: &CommandDescriptor, chan: Option<u8>, value: Option<Value>) -> Result<()> {
        match (desc.args.first(), value) {
            (Some(spec), Some(value)) => self.core.run(desc, chan, &[(spec.name, value)]).await?,
            _ => self.core.run(desc, chan, &[]).await?,
        };
        Ok(())
    }

    async fn query_f64(&mut self, desc: &CommandDescriptor) -> Result<f64> {
        self.core.run(desc, None, &[]).await?.into_f64()
    }

    pub async fn wai(&mut self) -> Result<()> {
        self.write(&ieee488::WAI, None, None).await
    }

    /// Block until pending operations finish. `*OPC?` only answers once they have, so this
    /// is bounded by the connection timeout; there is no retry.
    pub async fn wait_until_ready(&mut self) -> Result<()> {
        let done = self.query_f64(&ieee488::OPC).await?;
        if done == 1.0 {
            Ok(())
        } else {
            Err(Error::Parse(format!("*OPC? answered {done}, expected 1")))
        }
    }

    pub async fn horizontal_record_length(&mut self, points: u32) -> Result<()> {
        self.write(&HORIZONTAL_RECORD_LENGTH, None, Some(points.into())).await
    }

    /// Seconds per division
    pub async fn horizontal_scale(&mut self, seconds: f64) -> Result<()> {
        self.write(&HORIZONTAL_SCALE, None, Some(seconds.into())).await
    }

    /// `TWEnty`, `TWOfifty`, `FULl` or a frequency in Hz.
    pub async fn bandwidth(&mut self, chan: u8, bandwidth: impl Into<Value>) -> Result<()> {
        self.write(&BANDWIDTH, Some(chan), Some(bandwidth.into())).await
    }

    pub async fn coupling(&mut self, chan: u8, coupling: &str) -> Result<()> {
        self.write(&COUPLING, Some(chan), Some(coupling.into())).await
    }

    /// -100 ns to +100 ns
    pub async fn deskew(&mut self, chan: u8, seconds: f64) -> Result<()> {
        self.write(&DESKEW, Some(chan), Some(seconds.into())).await
    }

    pub async fn invert(&mut self, chan: u8, state: &str) -> Result<()> {
        self.write(&INVERT, Some(chan), Some(state.into())).await
    }

    pub async fn label(&mut self, chan: u8, label: &str) -> Result<()> {
        self.write(&LABEL, Some(chan), Some(label.into())).await
    }

    /// -8 to +8 divisions
    pub async fn vertical_position(&mut self, chan: u8, divisions: f64) -> Result<()> {
        self.write(&VERTICAL_POSITION, Some(chan), Some(divisions.into())).await
    }

    pub async fn probe_gain(&mut self, chan: u8, gain: f64) -> Result<()> {
        self.write(&PROBE_GAIN, Some(chan), Some(gain.into())).await
    }

    /// Volts per division
    pub async fn vertical_scale(&mut self, chan: u8, scale: f64) -> Result<()> {
        self.write(&VERTICAL_SCALE, Some(chan), Some(scale.into())).await
    }

    /// `FIFty`, `MEG` or an impedance in ohms.
    pub async fn termination(&mut self, chan: u8, term: impl Into<Value>) -> Result<()> {
        self.write(&TERMINATION, Some(chan), Some(term.into())).await
    }

    pub async fn units(&mut self, chan: u8, units: &str) -> Result<()> {
        self.write(&UNITS, Some(chan), Some(units.into())).await
    }

    /// Show a channel and make it available for acquisition.
    pub async fn select_channel(&mut self, chan: u8, state: &str) -> Result<()> {
        self.write(&SELECT_CHANNEL, Some(chan), Some(state.into())).await
    }

    /// `RUNSTop` or `SEQuence`
    pub async fn acquire_stopafter(&mut self, mode: &str) -> Result<()> {
        self.write(&ACQUIRE_STOPAFTER, None, Some(mode.into())).await
    }

    pub async fn acquire_state(&mut self, state: &str) -> Result<()> {
        self.write(&ACQUIRE_STATE, None, Some(state.into())).await
    }

    pub async fn data_source(&mut self, chan: u8) -> Result<()> {
        self.write(&DATA_SOURCE, Some(chan), None).await
    }

    pub async fn data_width(&mut self, width: u8) -> Result<()> {
        self.write(&DATA_WIDTH, None, Some(u32::from(width).into())).await
    }

    pub async fn data_encoding(&mut self, encoding: &str) -> Result<()> {
        self.write(&DATA_ENCODING, None, Some(encoding.into())).await
    }

    pub async fn wfmpre_ymult(&mut self) -> Result<f64> {
        self.query_f64(&WFMPRE_YMULT).await
    }

    pub async fn wfmpre_yzero(&mut self) -> Result<f64> {
        self.query_f64(&WFMPRE_YZERO).await
    }

    pub async fn wfmpre_yoff(&mut self) -> Result<f64> {
        self.query_f64(&WFMPRE_YOFF).await
    }

    pub async fn wfmpre_xincr(&mut self) -> Result<f64> {
        self.query_f64(&WFMPRE_XINCR).await
    }

    /// Stop condition and run state, then `*WAI`.
    pub async fn configure_acquisition(&mut self, stopafter: &str, state: &str) -> Result<()> {
        self.acquire_stopafter(stopafter).await?;
        self.acquire_state(state).await?;
        self.wai().await
    }

    /// Read the preamble and curve of `chan` and scale the samples to volts. A failed
    /// transfer is returned as is, call again to retry.
    pub async fn acquire_waveform(
        &mut self,
        chan: u8,
        width: u8,
        encoding: &str,
    ) -> Result<Waveform> {
        self.core.protocol_mut().connection().ensure_connected()?;
        let encoding = Encoding::from_token(encoding)?;
        if !(1..=2).contains(&width) {
            return Err(Error::Validation(format!(
                "Data width must be 1 or 2, got {width}"
            )));
        }

        self.data_source(chan).await?;
        self.data_width(width).await?;
        self.data_encoding(encoding.token()).await?;

        self.wai().await?;
        let preamble = WaveformPreamble {
            ymult: self.wfmpre_ymult().await?,
            yzero: self.wfmpre_yzero().await?,
            yoff: self.wfmpre_yoff().await?,
            xincr: self.wfmpre_xincr().await?,
        };

        let raw = self.core.run(&CURVE, None, &[]).await?.into_block()?;
        debug!("CH{chan}: {} bytes of curve data, {preamble:?}", raw.len());

        let values = encoding
            .decode(&raw, width)?
            .into_iter()
            .map(|code| preamble.to_volts(code))
            .collect();

        Ok(Waveform {
            preamble,
            raw,
            volts: Readings {
                unit: Unit::Voltage,
                interval: Some(preamble.xincr),
                values,
            },
        })
    }

    /// One-off measurement of `kind` (`AMPlitude`, `FREQuency`, `PK2pk`, ...) on `chan`.
    pub async fn measure_immediate(&mut self, chan: u8, kind: &str) -> Result<f64> {
        self.write(&MEASURE_SOURCE, Some(chan), None).await?;
        self.write(&MEASURE_TYPE, None, Some(kind.into())).await?;
        self.query_f64(&MEASURE_VALUE).await
    }
}
impl Instrument for Dpo4000 {
    fn core(&self) -> &DriverCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DriverCore {
        &mut self.core
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_all_binary_encodings() {
        assert_eq!(Encoding::Rpb.decode(&[0, 128, 255], 1).unwrap(), vec![0.0, 128.0, 255.0]);
        assert_eq!(Encoding::Rib.decode(&[0, 128, 255], 1).unwrap(), vec![0.0, -128.0, -1.0]);
        assert_eq!(Encoding::Rib.decode(&[0xff, 0xfe], 2).unwrap(), vec![-2.0]);
        assert_eq!(Encoding::Sri.decode(&[0xfe, 0xff], 2).unwrap(), vec![-2.0]);
        assert_eq!(Encoding::Rpb.decode(&[0x01, 0x00], 2).unwrap(), vec![256.0]);
        assert_eq!(Encoding::Srp.decode(&[0x01, 0x00], 2).unwrap(), vec![1.0]);
        assert!(matches!(Encoding::Rpb.decode(&[1, 2, 3], 2), Err(Error::Parse(_))));
        assert!(Encoding::from_token("ascii").is_err());
    }

    #[test]
    fn preamble_scaling() {
        let pre = WaveformPreamble {
            ymult: 0.04,
            yzero: 0.0,
            yoff: 128.0,
            xincr: 1e-9,
        };
        assert_eq!(pre.to_volts(128.0), 0.0);
        assert_eq!(pre.to_volts(153.0), 25.0 * 0.04);
    }
}
