use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use super::{BusSession, read_exactly};

pub struct SerialSession {
    port: String,
    baud: u32,
    serial: BufReader<SerialStream>,
}
impl SerialSession {
    pub fn open(port: &str, baud: u32) -> io::Result<Self> {
        let serial = tokio_serial::new(port, baud)
            .open_native_async()
            .map_err(io::Error::from)?;

        Ok(Self {
            port: port.to_string(),
            baud,
            serial: BufReader::new(serial),
        })
    }
}
#[async_trait]
impl BusSession for SerialSession {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let serial = self.serial.get_mut();
        serial.write_all(data).await?;
        serial.flush().await
    }

    async fn read_until(&mut self, byte: u8) -> io::Result<Vec<u8>> {
        let mut resp = vec![];
        if self.serial.read_until(byte, &mut resp).await? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{} stopped producing data", self.port),
            ));
        }
        Ok(resp)
    }

    async fn read_exact(&mut self, length: usize) -> io::Result<Vec<u8>> {
        read_exactly(&mut self.serial, length).await
    }

    async fn close(&mut self) -> io::Result<()> {
        /* The port is released when the stream drops */
        Ok(())
    }

    fn describe(&self) -> String {
        format!("serial://{}@{}", self.port, self.baud)
    }
}
