//! Connection lifecycle shared by every driver

use std::{fmt::Display, str::FromStr, sync::Arc, time::Duration};

use log::{debug, info, warn};
use strum_macros::{AsRefStr, EnumIter};

use crate::{
    bus::{BusSession, Connector, SystemConnector},
    error::{Error, Result},
    resource::{Resource, TransportKind},
};

/// Used when neither the caller nor the driver picks a timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
/// Pause after every command, gives slower instruments time to digest it
pub const DEFAULT_DELAY: Duration = Duration::from_millis(10);
pub const DEFAULT_BAUD: u32 = 9600;
/// Largest block reply accepted, a full 20 M point 16-bit scope record fits
pub const DEFAULT_MAX_BLOCK_LEN: usize = 64 * 1024 * 1024;

/// Where and how to reach an instrument.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionSpec {
    resource: Resource,
    timeout: Option<Duration>,
    write_terminator: String,
    read_terminator: u8,
    baud: u32,
    delay: Duration,
    max_block_len: usize,
    block_terminator: bool,
}
impl ConnectionSpec {
    pub fn from_resource(resource: Resource) -> Self {
        Self {
            resource,
            timeout: None,
            write_terminator: "\n".into(),
            read_terminator: b'\n',
            baud: DEFAULT_BAUD,
            delay: DEFAULT_DELAY,
            max_block_len: DEFAULT_MAX_BLOCK_LEN,
            block_terminator: true,
        }
    }

    /// Transport kind plus a bare address, see [`Resource::from_kind`].
    pub fn new(kind: TransportKind, address: &str) -> Result<Self> {
        Resource::from_kind(kind, address).map(Self::from_resource)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Applies `timeout` only if none was chosen yet.
    pub fn or_timeout(mut self, timeout: Duration) -> Self {
        self.timeout.get_or_insert(timeout);
        self
    }

    pub fn with_terminator(mut self, terminator: &str) -> Self {
        self.write_terminator = terminator.to_string();
        self
    }

    pub fn with_read_terminator(mut self, byte: u8) -> Self {
        self.read_terminator = byte;
        self
    }

    pub fn with_baud(mut self, baud: u32) -> Self {
        self.baud = baud;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Block replies declaring more than `len` bytes are refused before any payload is read.
    pub fn with_max_block_len(mut self, len: usize) -> Self {
        self.max_block_len = len;
        self
    }

    /// Whether a definite block is followed by the read terminator. Instruments that end
    /// the message with EOI alone need `false`.
    pub fn with_block_terminator(mut self, terminated: bool) -> Self {
        self.block_terminator = terminated;
        self
    }

    /// Talk to a `TCPIP` instrument through a raw SCPI socket instead.
    pub fn raw_socket(mut self, port: u16) -> Self {
        if let Some(res) = self.resource.as_raw_socket(port) {
            self.resource = res;
        }
        self
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn kind(&self) -> TransportKind {
        self.resource.kind()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn write_terminator(&self) -> &str {
        &self.write_terminator
    }

    pub fn read_terminator(&self) -> u8 {
        self.read_terminator
    }

    pub fn baud(&self) -> u32 {
        self.baud
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn max_block_len(&self) -> usize {
        self.max_block_len
    }

    pub fn block_terminator(&self) -> bool {
        self.block_terminator
    }
}
impl FromStr for ConnectionSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse().map(Self::from_resource)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, AsRefStr)]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
    /// Last operation left the session in an unknown state, reconnect to recover
    Error,
}
impl Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Owns the session to one instrument and tracks whether it can be used.
pub struct ConnectionManager {
    spec: ConnectionSpec,
    timeout: Duration,
    connector: Arc<dyn Connector>,
    session: Option<Box<dyn BusSession>>,
    status: ConnectionStatus,
    last_error: Option<String>,
}
impl ConnectionManager {
    pub fn new(spec: ConnectionSpec) -> Self {
        Self::with_connector(spec, Arc::new(SystemConnector))
    }

    pub fn with_connector(spec: ConnectionSpec, connector: Arc<dyn Connector>) -> Self {
        Self {
            timeout: spec.timeout().unwrap_or(DEFAULT_TIMEOUT),
            spec,
            connector,
            session: None,
            status: ConnectionStatus::Disconnected,
            last_error: None,
        }
    }

    /// Open the session. Connecting an already connected manager is a no-op; a manager in
    /// the error state drops its old session first.
    pub async fn connect(&mut self) -> Result<()> {
        if self.status == ConnectionStatus::Connected && self.session.is_some() {
            debug!("{} already connected", self.spec.resource());
            return Ok(());
        }
        if self.session.take().is_some() {
            debug!("Dropping stale session to {}", self.spec.resource());
        }

        let resource = self.spec.resource().clone();
        info!("Connecting to {resource}");

        let res = tokio::time::timeout(self.timeout, self.connector.open(&self.spec)).await;
        let err = match res {
            Ok(Ok(session)) => {
                info!("Connected to {resource} via {}", session.describe());
                self.session = Some(session);
                self.status = ConnectionStatus::Connected;
                self.last_error = None;
                return Ok(());
            }
            Ok(Err(Error::Connection(desc))) => Error::Connection(desc),
            Ok(Err(e)) => Error::Connection(format!("Could not open {resource}: {e}")),
            Err(_) => Error::Connection(format!(
                "Opening {resource} did not complete within {} ms",
                self.timeout.as_millis()
            )),
        };
        self.mark_error(&err);
        Err(err)
    }

    /// Close the session. Safe to call in any state.
    pub async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut session) = self.session.take() {
            match tokio::time::timeout(self.timeout, session.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Error closing {}: {e}", session.describe()),
                Err(_) => debug!("Closing {} timed out", session.describe()),
            }
            info!("Disconnected from {}", self.spec.resource());
        }
        self.status = ConnectionStatus::Disconnected;
        Ok(())
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// Description of the failure that put the connection in the error state.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn spec(&self) -> &ConnectionSpec {
        &self.spec
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Fails with [`Error::NotConnected`] unless the connection is usable.
    pub fn ensure_connected(&self) -> Result<()> {
        match self.status {
            ConnectionStatus::Connected => Ok(()),
            status => Err(Error::NotConnected(format!(
                "{} is {}",
                self.spec.resource(),
                status.as_ref().to_lowercase()
            ))),
        }
    }

    pub(crate) fn session(&mut self) -> Result<&mut (dyn BusSession + 'static)> {
        self.ensure_connected()?;
        match self.session.as_deref_mut() {
            Some(session) => Ok(session),
            None => Err(Error::NotConnected(format!(
                "{} has no open session",
                self.spec.resource()
            ))),
        }
    }

    pub(crate) fn mark_error(&mut self, reason: &Error) {
        warn!("{}: {reason}", self.spec.resource());
        self.status = ConnectionStatus::Error;
        self.last_error = Some(reason.to_string());
    }
}
impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            debug!("Releasing {} on drop", session.describe());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::{MockConnector, MockSession};

    const RES: &str = "TCPIP0::10.0.142.3::INSTR";

    #[test]
    fn spec_builders() {
        let spec = ConnectionSpec::new(TransportKind::Ip, "10.0.142.3")
            .unwrap()
            .with_terminator("\r\n")
            .or_timeout(Duration::from_secs(5));
        assert_eq!(spec.resource().to_string(), RES);
        assert_eq!(spec.write_terminator(), "\r\n");
        assert_eq!(spec.timeout(), Some(Duration::from_secs(5)));
        assert_eq!(spec.max_block_len(), DEFAULT_MAX_BLOCK_LEN);
        assert!(spec.block_terminator());

        let spec = spec
            .with_timeout(Duration::from_millis(300))
            .or_timeout(Duration::from_secs(5))
            .raw_socket(5025);
        assert_eq!(spec.timeout(), Some(Duration::from_millis(300)));
        assert_eq!(spec.resource().to_string(), "TCPIP0::10.0.142.3::5025::SOCKET");
    }

    #[tokio::test]
    async fn connect_then_disconnect_twice() {
        let session = MockSession::new("psu");
        let handle = session.handle();
        let connector = Arc::new(MockConnector::new().with_session(RES, session));

        let mut conn = ConnectionManager::with_connector(RES.parse().unwrap(), connector);
        assert_eq!(conn.status(), ConnectionStatus::Disconnected);
        conn.connect().await.unwrap();
        assert_eq!(conn.status(), ConnectionStatus::Connected);
        /* Second connect keeps the same session */
        conn.connect().await.unwrap();

        conn.disconnect().await.unwrap();
        assert!(handle.is_closed());
        assert!(handle.is_released());
        conn.disconnect().await.unwrap();
        assert_eq!(conn.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn unreachable_resource_sets_error() {
        let mut conn =
            ConnectionManager::with_connector(RES.parse().unwrap(), Arc::new(MockConnector::new()));
        assert!(matches!(conn.connect().await, Err(Error::Connection(_))));
        assert_eq!(conn.status(), ConnectionStatus::Error);
        assert!(conn.last_error().is_some());
        assert!(matches!(conn.session(), Err(Error::NotConnected(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_timeout_is_a_connection_error() {
        let spec: ConnectionSpec = RES.parse().unwrap();
        let spec = spec.with_timeout(Duration::from_millis(500));
        let connector = Arc::new(MockConnector::new().with_hang(RES));

        let mut conn = ConnectionManager::with_connector(spec, connector);
        let start = tokio::time::Instant::now();
        assert!(matches!(conn.connect().await, Err(Error::Connection(_))));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(500) && elapsed < Duration::from_millis(550));
        assert_eq!(conn.status(), ConnectionStatus::Error);
    }
}
