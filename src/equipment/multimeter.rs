use async_trait::async_trait;

use super::Instrument;
use crate::{data::Reading, error::Result, protocol::Value};

/// One-shot DC voltage and resistance measurements.
///
/// `range` takes a value in the measured unit or `AUTO`/`MIN`/`MAX`/`DEF`; `resolution` a
/// value or `MIN`/`MAX`/`DEF`. Overloaded inputs come back as a NaN [`Reading`].
#[async_trait]
pub trait MultimeterEquipment: Instrument {
    async fn meas_dcv(&mut self, range: Value, resolution: Value) -> Result<Reading>;

    async fn meas_res(&mut self, range: Value, resolution: Value) -> Result<Reading>;
}

/// Argument specs shared by the `MEASure` commands of SCPI multimeters
pub(crate) mod meas {
    use crate::protocol::{ArgSpec, ValueSpec, arg};

    pub const RANGE_KEYWORDS: &[&str] = &["AUTO", "MIN", "MAX", "DEF"];
    pub const RESOLUTION_KEYWORDS: &[&str] = &["MIN", "MAX", "DEF"];

    pub const DCV_ARGS: &[ArgSpec] = &[
        arg(
            "range",
            ValueSpec::Real {
                min: 0.0,
                max: 1000.0,
                keywords: RANGE_KEYWORDS,
            },
        ),
        arg(
            "resolution",
            ValueSpec::Real {
                min: 0.0,
                max: 1.0,
                keywords: RESOLUTION_KEYWORDS,
            },
        ),
    ];

    pub const RES_ARGS: &[ArgSpec] = &[
        arg(
            "range",
            ValueSpec::Real {
                min: 0.0,
                max: 100e6,
                keywords: RANGE_KEYWORDS,
            },
        ),
        arg(
            "resolution",
            ValueSpec::Real {
                min: 0.0,
                max: 1e3,
                keywords: RESOLUTION_KEYWORDS,
            },
        ),
    ];
}
