//! SCPI message exchange on top of a [`ConnectionManager`]
//!
//! Outgoing commands get the write terminator appended. Every write and every reply is
//! bounded by the connection timeout, and a reply is read in full or not at all. Failures
//! that leave the byte stream in an unknown state (write errors, timeouts, transport errors,
//! block headers over the size limit) move the connection to [`ConnectionStatus::Error`].
//! Other parse failures do not: the rest of the bad reply is read and dropped first.

use std::{io, time::Duration};

use log::debug;
use strum_macros::AsRefStr;
use tokio::time::{Instant, error::Elapsed};

mod block;
mod command;

pub use block::{BlockHeader, parse_block};
pub use command::{
    ArgSpec, ChannelLimits, ChannelRating, CommandDescriptor, CommandTable, ON_OFF, Quantity,
    Value, ValueSpec, arg, ieee488,
};

use crate::{
    connection::{ConnectionManager, ConnectionStatus},
    error::{Error, Result},
    model::ModelInfo,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, AsRefStr)]
pub enum ReplyKind {
    None,
    Numeric,
    Text,
    Block,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    None,
    Numeric(f64),
    Text(String),
    Block(Vec<u8>),
}
impl Reply {
    pub fn kind(&self) -> ReplyKind {
        match self {
            Reply::None => ReplyKind::None,
            Reply::Numeric(_) => ReplyKind::Numeric,
            Reply::Text(_) => ReplyKind::Text,
            Reply::Block(_) => ReplyKind::Block,
        }
    }

    pub fn into_f64(self) -> Result<f64> {
        match self {
            Reply::Numeric(v) => Ok(v),
            Reply::Text(t) => parse_numeric(t.as_bytes()),
            other => Err(Error::Parse(format!("Expected a number, got {:?} reply", other.kind()))),
        }
    }

    pub fn into_text(self) -> Result<String> {
        match self {
            Reply::Text(t) => Ok(t),
            Reply::Numeric(v) => Ok(v.to_string()),
            other => Err(Error::Parse(format!("Expected text, got {:?} reply", other.kind()))),
        }
    }

    pub fn into_block(self) -> Result<Vec<u8>> {
        match self {
            Reply::Block(data) => Ok(data),
            other => Err(Error::Parse(format!(
                "Expected block data, got {:?} reply",
                other.kind()
            ))),
        }
    }
}

/// Parse a numeric reply such as `+5.00E+00`.
pub fn parse_numeric(raw: &[u8]) -> Result<f64> {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    trimmed
        .parse()
        .map_err(|_| Error::Parse(format!("`{}` is not a number", trimmed.escape_default())))
}

/// Text reply without terminator or surrounding quotes.
pub fn parse_text(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(trimmed)
        .to_string()
}

/// Log-friendly rendering of bus traffic
pub(crate) fn printable(data: &[u8]) -> String {
    if data.len() > 128 {
        return format!("<{} bytes>", data.len());
    }
    String::from_utf8_lossy(data)
        .replace('\n', "␤")
        .replace('\r', "␍")
}

pub struct ScpiProtocol {
    conn: ConnectionManager,
}
impl ScpiProtocol {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut ConnectionManager {
        &mut self.conn
    }

    pub fn status(&self) -> ConnectionStatus {
        self.conn.status()
    }

    pub async fn connect(&mut self) -> Result<()> {
        self.conn.connect().await
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        self.conn.disconnect().await
    }

    /// Write one command, terminator appended.
    pub async fn send(&mut self, command: &str) -> Result<()> {
        let mut frame = Vec::with_capacity(command.len() + 2);
        frame.extend_from_slice(command.as_bytes());
        frame.extend_from_slice(self.conn.spec().write_terminator().as_bytes());

        debug!("send(): {}", printable(&frame));

        let timeout = self.conn.timeout();
        let session = self.conn.session()?;
        let err = match tokio::time::timeout(timeout, session.write_all(&frame)).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => Error::Write(format!("`{command}` not accepted: {e}")),
            Err(_) => Error::Timeout(format!(
                "Writing `{command}` did not complete within {} ms",
                timeout.as_millis()
            )),
        };
        self.conn.mark_error(&err);
        Err(err)
    }

    /// Write `command` and read back a reply of the given kind.
    pub async fn query(&mut self, command: &str, kind: ReplyKind) -> Result<Reply> {
        self.send(command).await?;
        let deadline = Instant::now() + self.conn.timeout();
        let term = self.conn.spec().read_terminator();

        match kind {
            ReplyKind::None => Ok(Reply::None),
            ReplyKind::Numeric => {
                let line = self.recv_until(command, term, deadline).await?;
                parse_numeric(&line).map(Reply::Numeric)
            }
            ReplyKind::Text => {
                let line = self.recv_until(command, term, deadline).await?;
                Ok(Reply::Text(parse_text(&line)))
            }
            ReplyKind::Block => self.recv_block(command, term, deadline).await.map(Reply::Block),
        }
    }

    pub async fn query_f64(&mut self, command: &str) -> Result<f64> {
        self.query(command, ReplyKind::Numeric).await?.into_f64()
    }

    pub async fn query_text(&mut self, command: &str) -> Result<String> {
        self.query(command, ReplyKind::Text).await?.into_text()
    }

    pub async fn query_block(&mut self, command: &str) -> Result<Vec<u8>> {
        self.query(command, ReplyKind::Block).await?.into_block()
    }

    pub async fn identify(&mut self) -> Result<ModelInfo> {
        let idn = self.query_text(ieee488::IDN.template).await?;
        ModelInfo::from_idn(&idn)
    }

    /// Run a table command: check the connection, validate and format, exchange, then wait
    /// out the settle time plus the inter-command delay.
    pub async fn execute(
        &mut self,
        desc: &CommandDescriptor,
        channel: Option<u8>,
        args: &[(&str, Value)],
        limits: &ChannelLimits<'_>,
    ) -> Result<Reply> {
        self.conn.ensure_connected()?;
        let command = desc.format(channel, args, limits)?;

        let reply = self.query(&command, desc.reply).await?;

        let pause = desc.settle + self.conn.spec().delay();
        if pause > Duration::ZERO {
            tokio::time::sleep(pause).await;
        }
        Ok(reply)
    }

    async fn recv_until(&mut self, command: &str, byte: u8, deadline: Instant) -> Result<Vec<u8>> {
        let session = self.conn.session()?;
        let res = tokio::time::timeout_at(deadline, session.read_until(byte)).await;
        self.received(command, res)
    }

    async fn recv_exact(&mut self, command: &str, length: usize, deadline: Instant) -> Result<Vec<u8>> {
        let session = self.conn.session()?;
        let res = tokio::time::timeout_at(deadline, session.read_exact(length)).await;
        self.received(command, res)
    }

    fn received(
        &mut self,
        command: &str,
        res: std::result::Result<io::Result<Vec<u8>>, Elapsed>,
    ) -> Result<Vec<u8>> {
        let err = match res {
            Ok(Ok(data)) => {
                debug!("recv(): {}", printable(&data));
                return Ok(data);
            }
            Ok(Err(e)) => Error::Io(e),
            Err(_) => Error::Timeout(format!(
                "No complete reply to `{command}` within {} ms",
                self.conn.timeout().as_millis()
            )),
        };
        self.conn.mark_error(&err);
        Err(err)
    }

    async fn recv_block(&mut self, command: &str, term: u8, deadline: Instant) -> Result<Vec<u8>> {
        let mut header = self.recv_exact(command, 2, deadline).await?;
        let digits = match BlockHeader::digits(&header) {
            Ok(digits) => digits,
            Err(e) => return self.discard_reply(command, &header, term, deadline, e).await,
        };
        if digits > 0 {
            header.extend(self.recv_exact(command, digits, deadline).await?);
        }

        let len = match BlockHeader::parse(&header) {
            Ok(BlockHeader { data_len: Some(len), .. }) => len,
            Ok(BlockHeader { data_len: None, .. }) => {
                let data = self.recv_until(command, term, deadline).await?;
                return Ok(block::strip_terminator(&data).to_vec());
            }
            Err(e) => return self.discard_reply(command, &header, term, deadline, e).await,
        };

        let max = self.conn.spec().max_block_len();
        if len > max {
            /* The payload can hold terminator bytes, there is no safe place to resync */
            let err = Error::Parse(format!(
                "Block for `{command}` declares {len} bytes, limit is {max}"
            ));
            self.conn.mark_error(&err);
            return Err(err);
        }

        let data = self.recv_exact(command, len, deadline).await?;
        if !self.conn.spec().block_terminator() {
            return Ok(data);
        }
        let rest = self.recv_until(command, term, deadline).await?;
        if !block::is_terminator(&rest) {
            return Err(Error::Parse(format!(
                "Block for `{command}` declared {len} bytes but {} more followed",
                rest.len().saturating_sub(1)
            )));
        }
        Ok(data)
    }

    /// Consume what is left of a reply that failed to parse, so the next exchange starts on
    /// a fresh line. `seen` holds the bytes already read.
    async fn discard_reply<T>(
        &mut self,
        command: &str,
        seen: &[u8],
        term: u8,
        deadline: Instant,
        err: Error,
    ) -> Result<T> {
        if !seen.contains(&term) {
            let rest = self.recv_until(command, term, deadline).await?;
            debug!("Discarded {} bytes of `{command}` reply", seen.len() + rest.len());
        }
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_replies() {
        assert_eq!(parse_numeric(b"+5.00E+00\n").unwrap(), 5.0);
        assert_eq!(parse_numeric(b" -1.25e-3\r\n").unwrap(), -1.25e-3);
        assert_eq!(parse_numeric(b"1\n").unwrap(), 1.0);
        assert!(matches!(parse_numeric(b"OFF\n"), Err(Error::Parse(_))));
        assert!(matches!(parse_numeric(b"\n"), Err(Error::Parse(_))));
    }

    #[test]
    fn text_replies() {
        assert_eq!(parse_text(b"ON\n"), "ON");
        assert_eq!(parse_text(b"\"Vout\"\r\n"), "Vout");
    }

    #[test]
    fn reply_conversions() {
        assert_eq!(Reply::Text("+1.5E+00".into()).into_f64().unwrap(), 1.5);
        assert!(Reply::None.into_f64().is_err());
        assert_eq!(Reply::Block(vec![1, 2]).into_block().unwrap(), vec![1, 2]);
        assert!(matches!(Reply::Numeric(1.0).into_block(), Err(Error::Parse(_))));
    }

    #[test]
    fn printable_marks_terminators() {
        assert_eq!(printable(b"*IDN?\r\n"), "*IDN?␍␤");
        assert_eq!(printable(&[0u8; 200]), "<200 bytes>");
    }
}
