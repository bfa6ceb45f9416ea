//! One module per supported instrument family. Each exposes its command `TABLE` and a
//! driver struct opened from a [`ConnectionSpec`](crate::connection::ConnectionSpec).

pub mod keithley_2100;
pub mod keithley_6221;
pub mod keysight_34461a;
pub mod rigol_dg4000;
pub mod rigol_dp800;
pub mod tek_dpo4000;

pub use keithley_2100::Keithley2100;
pub use keithley_6221::Keithley6221;
pub use keysight_34461a::Keysight34461A;
pub use rigol_dg4000::Dg4000;
pub use rigol_dp800::{Dp800, Dp800Model};
pub use tek_dpo4000::{Dpo4000, Waveform, WaveformPreamble};
