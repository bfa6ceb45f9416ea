use std::{io, pin::Pin};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
};

use super::{BusSession, read_exactly};

/// SCPI over a raw TCP socket
pub struct TcpSession {
    peer: String,
    stream: BufReader<TcpStream>,
}
impl TcpSession {
    pub async fn connect(host: &str, port: u16) -> io::Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;

        Ok(Self {
            peer: format!("{host}:{port}"),
            stream: BufReader::new(stream),
        })
    }

    /// Drop anything the instrument sent that nobody asked for.
    pub fn discard_buffered(&mut self) {
        let pending = self.stream.buffer().len();
        Pin::new(&mut self.stream).consume(pending);
    }
}
#[async_trait]
impl BusSession for TcpSession {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let stream = self.stream.get_mut();
        stream.write_all(data).await?;
        stream.flush().await
    }

    async fn read_until(&mut self, byte: u8) -> io::Result<Vec<u8>> {
        let mut resp = vec![];
        if self.stream.read_until(byte, &mut resp).await? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{} closed the connection", self.peer),
            ));
        }
        Ok(resp)
    }

    async fn read_exact(&mut self, length: usize) -> io::Result<Vec<u8>> {
        read_exactly(&mut self.stream, length).await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.discard_buffered();
        self.stream.get_mut().shutdown().await
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.peer)
    }
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;

    #[tokio::test]
    async fn exchanges_lines_with_a_socket_instrument() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let instrument = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 6];
            sock.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"*IDN?\n");
            /* Two replies in one segment, the second must survive buffering */
            sock.write_all(b"RIGOL,DP832,DP8A0001,00.01.14\n#15hello\n")
                .await
                .unwrap();
        });

        let mut session = TcpSession::connect("127.0.0.1", port).await.unwrap();
        session.write_all(b"*IDN?\n").await.unwrap();
        let line = session.read_until(b'\n').await.unwrap();
        assert_eq!(line, b"RIGOL,DP832,DP8A0001,00.01.14\n");
        assert_eq!(session.read_exact(3).await.unwrap(), b"#15");
        assert_eq!(session.read_exact(5).await.unwrap(), b"hello");

        instrument.await.unwrap();
        /* Peer went away after the final newline */
        assert_eq!(session.read_until(b'\n').await.unwrap(), b"\n");
        assert!(session.read_until(b'\n').await.is_err());
    }

    #[tokio::test]
    async fn huge_fixed_read_fails_at_end_of_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let instrument = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"abc").await.unwrap();
        });

        let mut session = TcpSession::connect("127.0.0.1", port).await.unwrap();
        instrument.await.unwrap();

        /* A bogus 1 TB length must not be reserved before data shows up */
        let err = session.read_exact(1 << 40).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
