//! Byte-level sessions to a single instrument
//!
//! A [`BusSession`] only moves bytes. Terminators, timeouts and reply parsing belong to the
//! protocol layer on top of it.

use std::io;

use async_trait::async_trait;
#[cfg(not(feature = "visa"))]
use log::warn;
use tokio::io::{AsyncRead, AsyncReadExt};

#[cfg(not(feature = "visa"))]
use crate::resource::SCPI_RAW_PORT;
#[cfg(feature = "visa")]
use crate::connection::DEFAULT_TIMEOUT;
use crate::{
    connection::ConnectionSpec,
    error::{Error, Result},
    resource::{Resource, TcpipEndpoint},
};

pub mod mock;
mod serial;
mod tcp;
#[cfg(feature = "visa")]
pub(crate) mod visa;

pub use serial::SerialSession;
pub use tcp::TcpSession;
#[cfg(feature = "visa")]
pub use visa::VisaSession;

/// Initial buffer for fixed length reads, the rest is allocated as data arrives
const READ_CHUNK: usize = 64 * 1024;

/// Read exactly `length` bytes from `reader` without reserving the whole length up front.
pub(crate) async fn read_exactly<R: AsyncRead + Unpin>(
    reader: R,
    length: usize,
) -> io::Result<Vec<u8>> {
    let mut data = Vec::with_capacity(length.min(READ_CHUNK));
    reader.take(length as u64).read_to_end(&mut data).await?;
    if data.len() < length {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("stream ended after {} of {length} bytes", data.len()),
        ));
    }
    Ok(data)
}

#[async_trait]
pub trait BusSession: Send {
    /// Write the whole buffer to the instrument.
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Read up to and including `byte`. End of stream is an error.
    async fn read_until(&mut self, byte: u8) -> io::Result<Vec<u8>>;

    /// Read exactly `length` bytes.
    async fn read_exact(&mut self, length: usize) -> io::Result<Vec<u8>>;

    /// Release the underlying transport.
    async fn close(&mut self) -> io::Result<()>;

    fn describe(&self) -> String;
}

/// Opens bus sessions for resources.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, spec: &ConnectionSpec) -> Result<Box<dyn BusSession>>;
}

/// Opens real transports: raw sockets and serial ports natively, everything else through
/// VISA when built with the `visa` feature.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemConnector;
#[async_trait]
impl Connector for SystemConnector {
    async fn open(&self, spec: &ConnectionSpec) -> Result<Box<dyn BusSession>> {
        let resource = spec.resource();
        let failed = |e: io::Error| Error::Connection(format!("Could not open {resource}: {e}"));

        match resource {
            Resource::Tcpip {
                host,
                endpoint: TcpipEndpoint::Socket(port),
                ..
            } => Ok(Box::new(TcpSession::connect(host, *port).await.map_err(failed)?)),
            Resource::Serial { .. } => {
                let Some(path) = resource.serial_path() else {
                    return Err(Error::Connection(format!("{resource} has no serial path")));
                };
                Ok(Box::new(
                    SerialSession::open(&path, spec.baud()).map_err(failed)?,
                ))
            }
            #[cfg(feature = "visa")]
            _ => Ok(Box::new(
                VisaSession::open(
                    resource.to_string(),
                    spec.timeout().unwrap_or(DEFAULT_TIMEOUT),
                )
                .await
                .map_err(failed)?,
            )),
            #[cfg(not(feature = "visa"))]
            Resource::Tcpip { host, .. } => {
                warn!(
                    "{resource}: built without VISA support, using raw SCPI socket on port {SCPI_RAW_PORT}"
                );
                Ok(Box::new(
                    TcpSession::connect(host, SCPI_RAW_PORT)
                        .await
                        .map_err(failed)?,
                ))
            }
            #[cfg(not(feature = "visa"))]
            _ => Err(Error::Connection(format!(
                "{resource}: {} resources require VISA support (build with the `visa` feature)",
                resource.kind()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "visa"))]
    #[tokio::test]
    async fn gpib_needs_visa() {
        let spec: ConnectionSpec = "GPIB0::5::INSTR".parse().unwrap();
        let res = SystemConnector.open(&spec).await;
        assert!(matches!(res, Err(Error::Connection(msg)) if msg.contains("visa")));
    }

    #[tokio::test]
    async fn refused_socket_is_a_connection_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let spec: ConnectionSpec = format!("TCPIP0::127.0.0.1::{port}::SOCKET")
            .parse()
            .unwrap();
        let res = SystemConnector.open(&spec).await;
        assert!(matches!(res, Err(Error::Connection(_))));
    }
}
