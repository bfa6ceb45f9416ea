use std::fmt::Display;

use crate::error::{Error, Result};

/// Identity reported by `*IDN?`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelInfo {
    /// Manufacturer and family
    pub man_family: Manufacturer,
    /// Manufacturer string
    pub manufacturer: String,
    /// Model string
    pub model: String,
    /// Serial number
    pub serial: Option<String>,
    /// Firmware version
    pub version: Option<String>,
}
impl ModelInfo {
    pub fn from_idn(idn: &str) -> Result<Self> {
        let idn_sep: Vec<_> = idn.trim().split(',').map(str::trim).collect();
        if idn_sep.len() < 2 || idn_sep[0].is_empty() {
            return Err(Error::Parse(format!("Invalid *IDN? response: {idn}")));
        }

        Ok(Self {
            man_family: Manufacturer::from_idn(&idn_sep),
            manufacturer: idn_sep[0].to_string(),
            model: idn_sep[1].to_string(),
            serial: idn_sep.get(2).filter(|s| !s.is_empty()).map(|s| s.to_string()),
            version: idn_sep.get(3).filter(|s| !s.is_empty()).map(|s| s.to_string()),
        })
    }
}
impl Display for ModelInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.manufacturer, self.model)?;
        if let Some(serial) = &self.serial {
            write!(f, " (S/N {serial})")?;
        }
        if let Some(version) = &self.version {
            write!(f, " firmware {version}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Manufacturer {
    /// Unknown manufacturer
    Unknown,
    /// Rigol
    Rigol(RigolFamily),
    /// Keithley, including Tektronix-branded Keithley units
    Keithley(KeithleyFamily),
    /// Keysight, also includes Agilent and HP
    Keysight(KeysightFamily),
    /// Tektronix
    Tektronix(TektronixFamily),
}
impl Manufacturer {
    fn from_idn(idn: &[&str]) -> Self {
        let man = idn[0].to_lowercase();
        let model = idn[1].to_lowercase();

        if man.contains("rigol") {
            Self::Rigol(RigolFamily::from_model(&model))
        } else if man.contains("keithley") {
            Self::Keithley(KeithleyFamily::from_model(&model))
        } else if man.contains("keysight") || man.contains("agilent") || man.starts_with("hewlett")
        {
            Self::Keysight(KeysightFamily::from_model(&model))
        } else if man.contains("tektronix") {
            Self::Tektronix(TektronixFamily::from_model(&model))
        } else {
            Self::Unknown
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RigolFamily {
    Unknown,
    /// Rigol DP800 series power supply
    DP800,
    /// Rigol DG4000 series function generator
    DG4000,
}
impl RigolFamily {
    fn from_model(model: &str) -> Self {
        if model.starts_with("dp8") {
            Self::DP800
        } else if model.starts_with("dg4") {
            Self::DG4000
        } else {
            Self::Unknown
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeithleyFamily {
    Unknown,
    /// Keithley 2100 6½ digit multimeter
    Dmm2100,
    /// Keithley 6220/6221 precision current source
    CurrentSource622x,
}
impl KeithleyFamily {
    fn from_model(model: &str) -> Self {
        /* Reported as "MODEL 2100" */
        let model = model.trim_start_matches("model").trim();
        if model.starts_with("2100") {
            Self::Dmm2100
        } else if model.starts_with("622") {
            Self::CurrentSource622x
        } else {
            Self::Unknown
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeysightFamily {
    Unknown,
    /// Truevolt 34460A/34461A multimeter
    Truevolt3446x,
}
impl KeysightFamily {
    fn from_model(model: &str) -> Self {
        if model.starts_with("3446") {
            Self::Truevolt3446x
        } else {
            Self::Unknown
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TektronixFamily {
    Unknown,
    /// DPO4000/MSO4000 series oscilloscope
    DPO4000,
}
impl TektronixFamily {
    fn from_model(model: &str) -> Self {
        if model.starts_with("dpo4") || model.starts_with("mso4") {
            Self::DPO4000
        } else {
            Self::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifies_supported_families() {
        let info = ModelInfo::from_idn("RIGOL TECHNOLOGIES,DP832,DP8A123456,00.01.14\n").unwrap();
        assert_eq!(info.man_family, Manufacturer::Rigol(RigolFamily::DP800));
        assert_eq!(info.model, "DP832");
        assert_eq!(info.serial.as_deref(), Some("DP8A123456"));
        assert_eq!(info.version.as_deref(), Some("00.01.14"));

        let info = ModelInfo::from_idn("KEITHLEY INSTRUMENTS INC.,MODEL 2100,1,01.08-01-01").unwrap();
        assert_eq!(info.man_family, Manufacturer::Keithley(KeithleyFamily::Dmm2100));

        let info = ModelInfo::from_idn("Keysight Technologies,34461A,MY53220001,A.02.14-02.40-02.14-00.49-01-01").unwrap();
        assert_eq!(info.man_family, Manufacturer::Keysight(KeysightFamily::Truevolt3446x));

        let info = ModelInfo::from_idn("TEKTRONIX,MSO4104,C010123,CF:91.1CT FV:v2.13").unwrap();
        assert_eq!(info.man_family, Manufacturer::Tektronix(TektronixFamily::DPO4000));

        let info = ModelInfo::from_idn("Acme,Widget").unwrap();
        assert_eq!(info.man_family, Manufacturer::Unknown);
        assert_eq!(info.serial, None);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(ModelInfo::from_idn("hello"), Err(Error::Parse(_))));
        assert!(matches!(ModelInfo::from_idn(""), Err(Error::Parse(_))));
    }

    #[test]
    fn display() {
        let info = ModelInfo::from_idn("RIGOL TECHNOLOGIES,DG4162,DG4E1234,00.01.12").unwrap();
        assert_eq!(
            info.to_string(),
            "RIGOL TECHNOLOGIES DG4162 (S/N DG4E1234) firmware 00.01.12"
        );
    }
}
