//! VISA-style resource identifiers
//!
//! Accepted forms (keywords are case-insensitive, the board number is optional):
//! - `TCPIP0::<host>::INSTR`, `TCPIP0::<host>::<device>::INSTR`
//! - `TCPIP0::<host>::<port>::SOCKET`
//! - `USB0::<vid>::<pid>::<serial>[::<interface>]::INSTR`
//! - `GPIB0::<primary>[::<secondary>]::INSTR`
//! - `ASRL<port>::INSTR`

use std::{fmt::Display, str::FromStr};

use strum_macros::{AsRefStr, EnumIter};

use crate::error::{Error, Result};

/// Port used for raw SCPI sockets when none is given
pub const SCPI_RAW_PORT: u16 = 5025;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, AsRefStr)]
pub enum TransportKind {
    #[strum(serialize = "IP")]
    Ip,
    #[strum(serialize = "USB")]
    Usb,
    #[strum(serialize = "GPIB")]
    Gpib,
    #[strum(serialize = "Serial")]
    Serial,
}
impl FromStr for TransportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ip" | "tcpip" | "ethernet" | "lan" => Ok(Self::Ip),
            "usb" => Ok(Self::Usb),
            "gpib" => Ok(Self::Gpib),
            "serial" | "asrl" => Ok(Self::Serial),
            _ => Err(Error::Connection(format!("Unknown transport kind '{s}'"))),
        }
    }
}
impl Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TcpipEndpoint {
    /// Instrument protocol endpoint, with optional device name (`inst0`, `hislip0`, ...)
    Instr(Option<String>),
    /// Raw socket on the given port
    Socket(u16),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resource {
    Tcpip {
        board: u16,
        host: String,
        endpoint: TcpipEndpoint,
    },
    Usb {
        board: u16,
        vendor: String,
        product: String,
        serial: String,
        interface: Option<u16>,
    },
    Gpib {
        board: u16,
        primary: u8,
        secondary: Option<u8>,
    },
    Serial {
        port: String,
    },
}
impl Resource {
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Tcpip { .. } => TransportKind::Ip,
            Self::Usb { .. } => TransportKind::Usb,
            Self::Gpib { .. } => TransportKind::Gpib,
            Self::Serial { .. } => TransportKind::Serial,
        }
    }

    /// Build a resource from a transport kind and a bare address.
    ///
    /// A full resource string is accepted for any kind as long as it names that kind. An IP
    /// address of the form `host:port` selects a raw socket.
    pub fn from_kind(kind: TransportKind, address: &str) -> Result<Self> {
        let address = address.trim();
        if address.is_empty() {
            return Err(Error::Connection(format!("Empty {kind} address")));
        }

        match address.parse::<Resource>() {
            Ok(res) if res.kind() == kind => return Ok(res),
            Ok(_) => {
                return Err(Error::Connection(format!(
                    "Resource '{address}' is not a {kind} resource"
                )));
            }
            Err(_) => {}
        }

        match kind {
            TransportKind::Ip => {
                if address.contains("::") {
                    return Err(Error::Connection(format!("Malformed IP address '{address}'")));
                }
                match address.rsplit_once(':') {
                    Some((host, port)) if !host.contains(':') => Ok(Self::Tcpip {
                        board: 0,
                        host: host.to_string(),
                        endpoint: TcpipEndpoint::Socket(port.parse().map_err(|_| {
                            Error::Connection(format!("Bad port in IP address '{address}'"))
                        })?),
                    }),
                    _ => Ok(Self::Tcpip {
                        board: 0,
                        host: address.to_string(),
                        endpoint: TcpipEndpoint::Instr(None),
                    }),
                }
            }
            TransportKind::Usb => format!("USB0::{address}::INSTR").parse(),
            TransportKind::Gpib => Ok(Self::Gpib {
                board: 0,
                primary: parse_gpib_address(address)?,
                secondary: None,
            }),
            TransportKind::Serial => Ok(Self::Serial {
                port: address.to_string(),
            }),
        }
    }

    /// Same host, but addressed through a raw SCPI socket.
    pub fn as_raw_socket(&self, port: u16) -> Option<Self> {
        match self {
            Self::Tcpip { board, host, .. } => Some(Self::Tcpip {
                board: *board,
                host: host.clone(),
                endpoint: TcpipEndpoint::Socket(port),
            }),
            _ => None,
        }
    }

    /// Operating system path of a serial resource. `ASRL<n>` follows the usual VISA
    /// numbering (`ASRL1` is the first port).
    pub fn serial_path(&self) -> Option<String> {
        let Self::Serial { port } = self else {
            return None;
        };

        match port.parse::<u16>() {
            Ok(n) if cfg!(windows) => Some(format!("COM{n}")),
            Ok(n) => Some(format!("/dev/ttyS{}", n.saturating_sub(1))),
            Err(_) => Some(port.clone()),
        }
    }
}
impl Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcpip {
                board,
                host,
                endpoint,
            } => match endpoint {
                TcpipEndpoint::Instr(None) => write!(f, "TCPIP{board}::{host}::INSTR"),
                TcpipEndpoint::Instr(Some(dev)) => write!(f, "TCPIP{board}::{host}::{dev}::INSTR"),
                TcpipEndpoint::Socket(port) => write!(f, "TCPIP{board}::{host}::{port}::SOCKET"),
            },
            Self::Usb {
                board,
                vendor,
                product,
                serial,
                interface,
            } => {
                write!(f, "USB{board}::{vendor}::{product}::{serial}")?;
                if let Some(intf) = interface {
                    write!(f, "::{intf}")?;
                }
                write!(f, "::INSTR")
            }
            Self::Gpib {
                board,
                primary,
                secondary,
            } => match secondary {
                Some(sec) => write!(f, "GPIB{board}::{primary}::{sec}::INSTR"),
                None => write!(f, "GPIB{board}::{primary}::INSTR"),
            },
            Self::Serial { port } => write!(f, "ASRL{port}::INSTR"),
        }
    }
}
impl FromStr for Resource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bad = |why: &str| Error::Connection(format!("Malformed resource '{s}': {why}"));

        let parts: Vec<_> = s.trim().split("::").collect();
        let (Some(first), Some(last)) = (parts.first(), parts.last()) else {
            return Err(bad("empty"));
        };
        if parts.len() < 2 {
            return Err(bad("missing resource class"));
        }
        let prefix = first.to_ascii_uppercase();
        let class = last.to_ascii_uppercase();
        let fields = &parts[1..parts.len() - 1];

        if let Some(port) = prefix.strip_prefix("ASRL") {
            if parts.len() != 2 || class != "INSTR" || port.is_empty() {
                return Err(bad("expected ASRL<port>::INSTR"));
            }
            /* Keep the original case, device paths are case-sensitive */
            return Ok(Self::Serial {
                port: first[4..].to_string(),
            });
        }

        if let Some(board) = prefix.strip_prefix("TCPIP") {
            let board = parse_board(board).ok_or_else(|| bad("bad board number"))?;
            return match (class.as_str(), fields) {
                ("INSTR", [host]) => Ok(Self::Tcpip {
                    board,
                    host: host.to_string(),
                    endpoint: TcpipEndpoint::Instr(None),
                }),
                ("INSTR", [host, dev]) => Ok(Self::Tcpip {
                    board,
                    host: host.to_string(),
                    endpoint: TcpipEndpoint::Instr(Some(dev.to_string())),
                }),
                ("SOCKET", [host, port]) => Ok(Self::Tcpip {
                    board,
                    host: host.to_string(),
                    endpoint: TcpipEndpoint::Socket(
                        port.parse().map_err(|_| bad("bad socket port"))?,
                    ),
                }),
                _ => Err(bad("expected TCPIP::<host>[::<device>]::INSTR or ::<port>::SOCKET")),
            };
        }

        if let Some(board) = prefix.strip_prefix("USB") {
            let board = parse_board(board).ok_or_else(|| bad("bad board number"))?;
            if class != "INSTR" {
                return Err(bad("USB resources must end in INSTR"));
            }
            let (vendor, product, serial, interface) = match fields {
                [v, p, s] => (v, p, s, None),
                [v, p, s, i] => (v, p, s, Some(i.parse().map_err(|_| bad("bad interface"))?)),
                _ => return Err(bad("expected USB::<vid>::<pid>::<serial>[::<intf>]::INSTR")),
            };
            if parse_usb_id(vendor).is_none() || parse_usb_id(product).is_none() {
                return Err(bad("vendor and product IDs must be numeric"));
            }
            return Ok(Self::Usb {
                board,
                vendor: vendor.to_string(),
                product: product.to_string(),
                serial: serial.to_string(),
                interface,
            });
        }

        if let Some(board) = prefix.strip_prefix("GPIB") {
            let board = parse_board(board).ok_or_else(|| bad("bad board number"))?;
            if class != "INSTR" {
                return Err(bad("GPIB resources must end in INSTR"));
            }
            return match fields {
                [primary] => Ok(Self::Gpib {
                    board,
                    primary: parse_gpib_address(primary)?,
                    secondary: None,
                }),
                [primary, secondary] => Ok(Self::Gpib {
                    board,
                    primary: parse_gpib_address(primary)?,
                    secondary: Some(parse_gpib_address(secondary)?),
                }),
                _ => Err(bad("expected GPIB::<primary>[::<secondary>]::INSTR")),
            };
        }

        Err(bad("unknown interface type"))
    }
}

fn parse_board(s: &str) -> Option<u16> {
    if s.is_empty() { Some(0) } else { s.parse().ok() }
}

fn parse_usb_id(s: &str) -> Option<u16> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

fn parse_gpib_address(s: &str) -> Result<u8> {
    match s.trim().parse::<u8>() {
        Ok(addr) if addr <= 30 => Ok(addr),
        _ => Err(Error::Connection(format!(
            "GPIB address '{s}' must be between 0 and 30"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcpip_forms() {
        let res: Resource = "TCPIP0::10.0.142.1::INSTR".parse().unwrap();
        assert_eq!(
            res,
            Resource::Tcpip {
                board: 0,
                host: "10.0.142.1".into(),
                endpoint: TcpipEndpoint::Instr(None)
            }
        );

        let res: Resource = "tcpip::scope.lab::hislip0::instr".parse().unwrap();
        assert_eq!(res.to_string(), "TCPIP0::scope.lab::hislip0::INSTR");

        let res: Resource = "TCPIP1::192.168.1.5::5025::SOCKET".parse().unwrap();
        assert_eq!(
            res,
            Resource::Tcpip {
                board: 1,
                host: "192.168.1.5".into(),
                endpoint: TcpipEndpoint::Socket(5025)
            }
        );
    }

    #[test]
    fn parses_usb_gpib_serial() {
        let res: Resource = "USB0::0x05E6::0x2100::8020357::INSTR".parse().unwrap();
        assert_eq!(res.kind(), TransportKind::Usb);
        assert_eq!(res.to_string(), "USB0::0x05E6::0x2100::8020357::INSTR");

        let res: Resource = "GPIB0::22::INSTR".parse().unwrap();
        assert_eq!(
            res,
            Resource::Gpib {
                board: 0,
                primary: 22,
                secondary: None
            }
        );

        let res: Resource = "ASRL/dev/ttyUSB0::INSTR".parse().unwrap();
        assert_eq!(res.serial_path().as_deref(), Some("/dev/ttyUSB0"));
    }

    #[test]
    fn rejects_malformed_resources() {
        for bad in [
            "",
            "TCPIP0::INSTR",
            "TCPIP0::host::notaport::SOCKET",
            "USB0::vendor::0x2100::SN::INSTR",
            "GPIB0::31::INSTR",
            "PXI0::1::INSTR",
            "ASRL::INSTR",
        ] {
            assert!(
                matches!(bad.parse::<Resource>(), Err(Error::Connection(_))),
                "{bad} should not parse"
            );
        }
    }

    #[test]
    fn builds_from_kind_and_address() {
        let res = Resource::from_kind(TransportKind::Ip, "10.0.142.2").unwrap();
        assert_eq!(res.to_string(), "TCPIP0::10.0.142.2::INSTR");

        let res = Resource::from_kind(TransportKind::Ip, "10.0.142.2:5555").unwrap();
        assert_eq!(res.to_string(), "TCPIP0::10.0.142.2::5555::SOCKET");

        let res = Resource::from_kind(TransportKind::Gpib, "7").unwrap();
        assert_eq!(res.to_string(), "GPIB0::7::INSTR");

        let res = Resource::from_kind(TransportKind::Usb, "0x1AB1::0x0E11::DP8C1234").unwrap();
        assert_eq!(res.to_string(), "USB0::0x1AB1::0x0E11::DP8C1234::INSTR");

        let res =
            Resource::from_kind(TransportKind::Usb, "USB0::0x1AB1::0x0E11::DP8C1234::INSTR")
                .unwrap();
        assert_eq!(res.kind(), TransportKind::Usb);

        let res = Resource::from_kind(TransportKind::Serial, "/dev/ttyACM0").unwrap();
        assert_eq!(res.to_string(), "ASRL/dev/ttyACM0::INSTR");

        assert!(Resource::from_kind(TransportKind::Usb, "GPIB0::7::INSTR").is_err());
    }

    #[test]
    fn transport_kind_names() {
        assert_eq!("ethernet".parse::<TransportKind>().unwrap(), TransportKind::Ip);
        assert_eq!(TransportKind::Gpib.to_string(), "GPIB");
        assert!("bluetooth".parse::<TransportKind>().is_err());
    }
}
