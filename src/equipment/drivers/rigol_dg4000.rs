use std::{sync::Arc, time::Duration};

use crate::{
    bus::{Connector, SystemConnector},
    connection::ConnectionSpec,
    equipment::{DriverCore, Instrument, Opened},
    error::Result,
    protocol::{CommandDescriptor, CommandTable, ON_OFF, Value, ValueSpec, arg},
    resource::TransportKind,
};

const FREQ: ValueSpec = ValueSpec::Real {
    min: 1e-6,
    max: 160e6,
    keywords: &["MIN", "MAX"],
};
const PERCENT: ValueSpec = ValueSpec::Real {
    min: 0.0,
    max: 100.0,
    keywords: &["MIN", "MAX"],
};
/// Levels into a high impedance load
const LEVEL: ValueSpec = ValueSpec::Real {
    min: -10.0,
    max: 10.0,
    keywords: &["MIN", "MAX"],
};

/// Built-in waveform names accepted by `:FUNC:SHAP`
const SHAPES: &[&str] = &[
    "SIN", "SINUSOID", "SQU", "SQUARE", "RAMP", "PULS", "PULSE", "NOIS", "NOISE", "USER", "HARM",
    "HARMONIC", "CUST", "CUSTOM", "DC", "ABSSINE", "ABSSINEHALF", "AMPALT", "ATTALT",
    "GAUSSPULSE", "NEGRAMP", "NPULSE", "PPULSE", "SINETRA", "SINEVER", "STAIRDN", "STAIRUD",
    "STAIRUP", "TRAPEZIA", "BANDLIMITED", "BUTTERWORTH", "CHEBYSHEV1", "CHEBYSHEV2", "COMBIN",
    "CPULSE", "CWPULSE", "DAMPEDOSC", "DUALTONE", "GAMMA", "GATEVIBR", "LFMPULSE", "MCNOSIE",
    "NIMHDISCHARGE", "PAHCUR", "QUAKE", "RADAR", "RIPPLE", "ROUNDHALF", "ROUNDPM", "STEPRESP",
    "SWINGOSC", "TV", "VOICE", "THREEAM", "THREEFM", "THREEPM", "THREEPWM", "THREEPFM",
    "CARDIAC", "EOG", "EEG", "EMG", "PULSILOGRAM", "RESSPEED", "LFPULSE", "TENS1", "TENS2",
    "TENS3", "IGNITION", "ISO167502SP", "ISO167502VR", "ISO76372TP1", "ISO76372TP2A",
    "ISO76372TP2B", "ISO76372TP3A", "ISO76372TP3B", "ISO76372TP4", "ISO76372TP5A",
    "ISO76372TP5B", "SCR", "SURGE", "AIRY", "BESSELJ", "BESSELY", "CAUCHY", "CUBIC",
    "DIRICHLET", "ERF", "ERFC", "ERFCINV", "ERFINV", "EXPFALL", "EXPRISE", "GAUSS", "HAVERSINE",
    "LAGUERRE", "LAPLACE", "LEGEND", "LOG", "LOGNORMAL", "LORENTZ", "MAXWELL", "RAYLEIGH",
    "VERSIERA", "WEIBULL", "X2DATA", "COSH", "COSINT", "COT", "COTHCON", "COTHPRO", "CSCCON",
    "CSCPRO", "CSCHCON", "CSCHPRO", "RECIPCON", "RECIPPRO", "SECCON", "SECPRO", "SECH", "SINC",
    "SINH", "SININT", "SQRT", "TAN", "TANH", "ACOS", "ACOSH", "ACOTCON", "ACOTPRO", "ACOTHCON",
    "ACOTHPRO", "ACSCCON", "ACSCPRO", "ACSCHCON", "ACSCHPRO", "ASECCON", "ASECPRO", "ASECH",
    "ASIN", "ASINH", "ATAN", "ATANH", "BARLETT", "BARTHANN", "BLACKMAN", "BLACKMANH",
    "BOHMANWIN", "BOXCAR", "CHEBWIN", "FLATTOPWIN", "HAMMING", "HANNING", "KAISER",
    "NUTTALLWIN", "ARZENWIN", "TAYLORWIN", "TRIANG", "TUKEYWIN",
];

const OUTPUT_IMPEDANCE: CommandDescriptor = CommandDescriptor::write(
    "output_impedance",
    ":OUTP{chan}:IMP {value}",
    &[arg(
        "value",
        ValueSpec::Real {
            min: 1.0,
            max: 10e3,
            keywords: &["INF", "INFINITY", "MIN", "MINIMUM", "MAX", "MAXIMUM"],
        },
    )],
);
const NOISE_STATE: CommandDescriptor =
    CommandDescriptor::write("noise_state", ":OUTP{chan}:NOIS:STAT {state}", &[arg("state", ON_OFF)]);
const NOISE_SCALE: CommandDescriptor = CommandDescriptor::write(
    "noise_scale",
    ":OUTP{chan}:NOIS:SCAL {value}",
    &[arg(
        "value",
        ValueSpec::Real {
            min: 0.0,
            max: 50.0,
            keywords: &["MIN", "MAX"],
        },
    )],
);
const OUTPUT_POLARITY: CommandDescriptor = CommandDescriptor::write(
    "output_polarity",
    ":OUTP{chan}:POL {value}",
    &[arg(
        "value",
        ValueSpec::Choice(&["NORM", "NORMAL", "INV", "INVERTED"]),
    )],
);
const OUTPUT_STATE: CommandDescriptor =
    CommandDescriptor::write("output_state", ":OUTP{chan}:STAT {state}", &[arg("state", ON_OFF)]);
const SYNC_POLARITY: CommandDescriptor = CommandDescriptor::write(
    "sync_polarity",
    ":OUTP{chan}:SYNC:POL {value}",
    &[arg(
        "value",
        ValueSpec::Choice(&["POS", "POSITIVE", "NEG", "NEGATIVE"]),
    )],
);
const SYNC_STATE: CommandDescriptor =
    CommandDescriptor::write("sync_state", ":OUTP{chan}:SYNC:STAT {state}", &[arg("state", ON_OFF)]);
const CENTER_FREQ: CommandDescriptor =
    CommandDescriptor::write("center_freq", ":SOUR{chan}:FREQ:CENT {value}", &[arg("value", FREQ)]);
const FIXED_FREQ: CommandDescriptor =
    CommandDescriptor::write("fixed_freq", ":SOUR{chan}:FREQ:FIX {value}", &[arg("value", FREQ)]);
const SPAN_FREQ: CommandDescriptor = CommandDescriptor::write(
    "span_freq",
    ":SOUR{chan}:FREQ:SPAN {value}",
    &[arg(
        "value",
        ValueSpec::Real {
            min: 0.0,
            max: 160e6,
            keywords: &["MIN", "MAX"],
        },
    )],
);
const START_FREQ: CommandDescriptor =
    CommandDescriptor::write("start_freq", ":SOUR{chan}:FREQ:STAR {value}", &[arg("value", FREQ)]);
const STOP_FREQ: CommandDescriptor =
    CommandDescriptor::write("stop_freq", ":SOUR{chan}:FREQ:STOP {value}", &[arg("value", FREQ)]);
const ARB_STEP: CommandDescriptor =
    CommandDescriptor::write("arb_step", ":SOUR{chan}:FUNC:ARB:STEP {state}", &[arg("state", ON_OFF)]);
const RAMP_SYMMETRY: CommandDescriptor = CommandDescriptor::write(
    "ramp_symmetry",
    ":SOUR{chan}:FUNC:RAMP:SYMM {value}",
    &[arg("value", PERCENT)],
);
const SHAPE: CommandDescriptor = CommandDescriptor::write(
    "shape",
    ":SOUR{chan}:FUNC:SHAP {value}",
    &[arg("value", ValueSpec::Choice(SHAPES))],
);
const SQUARE_DUTY: CommandDescriptor = CommandDescriptor::write(
    "square_duty",
    ":SOUR{chan}:FUNC:SQU:DCYC {value}",
    &[arg("value", PERCENT)],
);
const PULSE_DUTY: CommandDescriptor = CommandDescriptor::write(
    "pulse_duty",
    ":SOUR{chan}:PULS:DCYC {value}",
    &[arg("value", PERCENT)],
);
const AMPLITUDE: CommandDescriptor = CommandDescriptor::write(
    "amplitude",
    ":SOUR{chan}:VOLT:LEV:IMM:AMPL {value}",
    &[arg(
        "value",
        ValueSpec::Real {
            min: 0.0,
            max: 20.0,
            keywords: &["MIN", "MAX"],
        },
    )],
);
const HIGH_LEVEL: CommandDescriptor = CommandDescriptor::write(
    "high_level",
    ":SOUR{chan}:VOLT:LEV:IMM:HIGH {value}",
    &[arg("value", LEVEL)],
);
const LOW_LEVEL: CommandDescriptor = CommandDescriptor::write(
    "low_level",
    ":SOUR{chan}:VOLT:LEV:IMM:LOW {value}",
    &[arg("value", LEVEL)],
);
const OFFSET: CommandDescriptor = CommandDescriptor::write(
    "offset",
    ":SOUR{chan}:VOLT:LEV:IMM:OFFS {value}",
    &[arg("value", LEVEL)],
);
const VOLTAGE_UNIT: CommandDescriptor = CommandDescriptor::write(
    "voltage_unit",
    ":SOUR{chan}:VOLT:UNIT {value}",
    &[arg("value", ValueSpec::Choice(&["VPP", "VRMS", "DBM"]))],
);
const APPLY_PULSE: CommandDescriptor = CommandDescriptor::write(
    "apply_pulse",
    ":SOUR{chan}:APPL:PULS {freq},{amp},{offset},{delay}",
    &[
        arg("freq", FREQ),
        arg(
            "amp",
            ValueSpec::Real {
                min: 0.0,
                max: 20.0,
                keywords: &["MIN", "MAX", "DEF"],
            },
        ),
        arg(
            "offset",
            ValueSpec::Real {
                min: -10.0,
                max: 10.0,
                keywords: &["MIN", "MAX", "DEF"],
            },
        ),
        arg(
            "delay",
            ValueSpec::Real {
                min: 0.0,
                max: 1e6,
                keywords: &["MIN", "MAX", "DEF"],
            },
        ),
    ],
);

pub static TABLE: CommandTable = CommandTable {
    model: "Rigol DG4000",
    channels: 2,
    transports: &[TransportKind::Ip, TransportKind::Usb],
    default_timeout: Duration::from_secs(2),
    commands: &[
        OUTPUT_IMPEDANCE,
        NOISE_STATE,
        NOISE_SCALE,
        OUTPUT_POLARITY,
        OUTPUT_STATE,
        SYNC_POLARITY,
        SYNC_STATE,
        CENTER_FREQ,
        FIXED_FREQ,
        SPAN_FREQ,
        START_FREQ,
        STOP_FREQ,
        ARB_STEP,
        RAMP_SYMMETRY,
        SHAPE,
        SQUARE_DUTY,
        PULSE_DUTY,
        AMPLITUDE,
        HIGH_LEVEL,
        LOW_LEVEL,
        OFFSET,
        VOLTAGE_UNIT,
        APPLY_PULSE,
    ],
};

/// Rigol DG4000 series two channel function/arbitrary waveform generator
pub struct Dg4000 {
    core: DriverCore,
}
impl Dg4000 {
    pub async fn open(spec: ConnectionSpec) -> Opened<Self> {
        Self::open_with(spec, Arc::new(SystemConnector)).await
    }

    pub async fn open_with(spec: ConnectionSpec, connector: Arc<dyn Connector>) -> Opened<Self> {
        let (core, failure) = DriverCore::open(spec, connector, &TABLE, &[]).await;
        Opened::new(Self { core }, failure)
    }

    async fn set(&mut self, desc: &CommandDescriptor, chan: u8, value: Value) -> Result<()> {
        let name = desc.args.first().map_or("value", |a| a.name);
        self.core.run(desc, Some(chan), &[(name, value)]).await?;
        Ok(())
    }

    /// Load impedance in ohms (1 to 10k) or `INF`/`MIN`/`MAX`.
    pub async fn output_impedance(&mut self, chan: u8, impedance: impl Into<Value>) -> Result<()> {
        self.set(&OUTPUT_IMPEDANCE, chan, impedance.into()).await
    }

    pub async fn noise_state(&mut self, chan: u8, state: &str) -> Result<()> {
        self.set(&NOISE_STATE, chan, state.into()).await
    }

    /// Superimposed noise, percent of amplitude (0 to 50).
    pub async fn noise_scale(&mut self, chan: u8, percent: f64) -> Result<()> {
        self.set(&NOISE_SCALE, chan, percent.into()).await
    }

    /// `NORMal` or `INVerted`
    pub async fn output_polarity(&mut self, chan: u8, polarity: &str) -> Result<()> {
        self.set(&OUTPUT_POLARITY, chan, polarity.into()).await
    }

    pub async fn output_state(&mut self, chan: u8, state: &str) -> Result<()> {
        self.set(&OUTPUT_STATE, chan, state.into()).await
    }

    /// `POSitive` or `NEGative`
    pub async fn sync_polarity(&mut self, chan: u8, polarity: &str) -> Result<()> {
        self.set(&SYNC_POLARITY, chan, polarity.into()).await
    }

    pub async fn sync_state(&mut self, chan: u8, state: &str) -> Result<()> {
        self.set(&SYNC_STATE, chan, state.into()).await
    }

    pub async fn center_freq(&mut self, chan: u8, hz: f64) -> Result<()> {
        self.set(&CENTER_FREQ, chan, hz.into()).await
    }

    pub async fn fixed_freq(&mut self, chan: u8, hz: f64) -> Result<()> {
        self.set(&FIXED_FREQ, chan, hz.into()).await
    }

    pub async fn span_freq(&mut self, chan: u8, hz: f64) -> Result<()> {
        self.set(&SPAN_FREQ, chan, hz.into()).await
    }

    pub async fn start_freq(&mut self, chan: u8, hz: f64) -> Result<()> {
        self.set(&START_FREQ, chan, hz.into()).await
    }

    pub async fn stop_freq(&mut self, chan: u8, hz: f64) -> Result<()> {
        self.set(&STOP_FREQ, chan, hz.into()).await
    }

    pub async fn arb_step(&mut self, chan: u8, state: &str) -> Result<()> {
        self.set(&ARB_STEP, chan, state.into()).await
    }

    pub async fn ramp_symmetry(&mut self, chan: u8, percent: f64) -> Result<()> {
        self.set(&RAMP_SYMMETRY, chan, percent.into()).await
    }

    pub async fn shape(&mut self, chan: u8, shape: &str) -> Result<()> {
        self.set(&SHAPE, chan, shape.into()).await
    }

    pub async fn square_duty(&mut self, chan: u8, percent: f64) -> Result<()> {
        self.set(&SQUARE_DUTY, chan, percent.into()).await
    }

    pub async fn pulse_duty(&mut self, chan: u8, percent: f64) -> Result<()> {
        self.set(&PULSE_DUTY, chan, percent.into()).await
    }

    /// Amplitude in the current voltage unit
    pub async fn amplitude(&mut self, chan: u8, value: f64) -> Result<()> {
        self.set(&AMPLITUDE, chan, value.into()).await
    }

    pub async fn high_level(&mut self, chan: u8, volts: f64) -> Result<()> {
        self.set(&HIGH_LEVEL, chan, volts.into()).await
    }

    pub async fn low_level(&mut self, chan: u8, volts: f64) -> Result<()> {
        self.set(&LOW_LEVEL, chan, volts.into()).await
    }

    pub async fn offset(&mut self, chan: u8, volts: f64) -> Result<()> {
        self.set(&OFFSET, chan, volts.into()).await
    }

    /// `VPP`, `VRMS` or `DBM`
    pub async fn voltage_unit(&mut self, chan: u8, unit: &str) -> Result<()> {
        self.set(&VOLTAGE_UNIT, chan, unit.into()).await
    }

    /// Pulse output with frequency, amplitude, offset and delay in one command.
    pub async fn apply_pulse(
        &mut self,
        chan: u8,
        freq: f64,
        amp: f64,
        offset: f64,
        delay: f64,
    ) -> Result<()> {
        self.core
            .run(
                &APPLY_PULSE,
                Some(chan),
                &[
                    ("freq", freq.into()),
                    ("amp", amp.into()),
                    ("offset", offset.into()),
                    ("delay", delay.into()),
                ],
            )
            .await?;
        Ok(())
    }
}
impl Instrument for Dg4000 {
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
    use crate::{error::Error, protocol::ChannelLimits};

    const LIMITS: ChannelLimits<'static> = ChannelLimits {
        count: 2,
        ratings: &[],
    };

    #[test]
    fn shapes_and_keywords() {
        assert_eq!(
            SHAPE
                .format(Some(1), &[("value", "sinusoid".into())], &LIMITS)
                .unwrap(),
            ":SOUR1:FUNC:SHAP SINUSOID"
        );
        assert_eq!(
            OUTPUT_IMPEDANCE
                .format(Some(2), &[("value", "inf".into())], &LIMITS)
                .unwrap(),
            ":OUTP2:IMP INF"
        );
        assert_eq!(
            OUTPUT_IMPEDANCE
                .format(Some(2), &[("value", 50.into())], &LIMITS)
                .unwrap(),
            ":OUTP2:IMP 50.0"
        );
        assert!(matches!(
            SHAPE.format(Some(1), &[("value", "TRIANGLE".into())], &LIMITS),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            NOISE_SCALE.format(Some(1), &[("value", 60.0.into())], &LIMITS),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            SYNC_STATE.format(Some(3), &[("state", "ON".into())], &LIMITS),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn apply_pulse_template() {
        let cmd = APPLY_PULSE
            .format(
                Some(1),
                &[
                    ("freq", 0.001.into()),
                    ("amp", 0.005.into()),
                    ("offset", (-1.0).into()),
                    ("delay", 0.0.into()),
                ],
                &LIMITS,
            )
            .unwrap();
        assert_eq!(cmd, ":SOUR1:APPL:PULS 0.001,0.005,-1.0,0.0");
    }
}
