//! Scripted in-memory instruments
//!
//! A [`MockSession`] records every write and answers reads from a queue of scripted
//! replies. When the queue runs dry it behaves like a silent instrument: reads never
//! complete, so the protocol layer's timeout is what ends them.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    io,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;

use super::{BusSession, Connector};
use crate::{
    connection::ConnectionSpec,
    error::{Error, Result},
    resource::Resource,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockReply {
    /// Bytes made available to the reader
    Data(Vec<u8>),
    /// Instrument ignores the request
    Silent,
    /// Transport fails the next read
    Fail(io::ErrorKind),
}

#[derive(Default)]
struct MockState {
    written: Vec<Vec<u8>>,
    replies: VecDeque<MockReply>,
    rx: VecDeque<u8>,
    write_failure: Option<io::ErrorKind>,
    stall_writes: bool,
    closed: bool,
    released: bool,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct MockSession {
    name: String,
    state: Arc<Mutex<MockState>>,
}
impl MockSession {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::default(),
        }
    }

    /// Queue a text reply, newline terminated.
    pub fn reply(self, line: &str) -> Self {
        self.reply_bytes(format!("{line}\n"))
    }

    /// Queue raw bytes exactly as given.
    pub fn reply_bytes(self, data: impl Into<Vec<u8>>) -> Self {
        lock(&self.state)
            .replies
            .push_back(MockReply::Data(data.into()));
        self
    }

    pub fn silent(self) -> Self {
        lock(&self.state).replies.push_back(MockReply::Silent);
        self
    }

    pub fn fail_read(self, kind: io::ErrorKind) -> Self {
        lock(&self.state).replies.push_back(MockReply::Fail(kind));
        self
    }

    /// Every write fails with `kind`.
    pub fn fail_writes(self, kind: io::ErrorKind) -> Self {
        lock(&self.state).write_failure = Some(kind);
        self
    }

    /// Writes are never accepted.
    pub fn stall_writes(self) -> Self {
        lock(&self.state).stall_writes = true;
        self
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: self.state.clone(),
        }
    }

    fn poll_read(&self, ready: impl Fn(&VecDeque<u8>) -> Option<usize>) -> Option<io::Result<Vec<u8>>> {
        let mut state = lock(&self.state);
        loop {
            if let Some(len) = ready(&state.rx) {
                return Some(Ok(state.rx.drain(..len).collect()));
            }
            match state.replies.pop_front() {
                Some(MockReply::Data(data)) => state.rx.extend(data),
                Some(MockReply::Fail(kind)) => return Some(Err(kind.into())),
                Some(MockReply::Silent) | None => return None,
            }
        }
    }
}
#[async_trait]
impl BusSession for MockSession {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let failure = {
            let mut state = lock(&self.state);
            if state.stall_writes {
                None
            } else {
                state.written.push(data.to_vec());
                Some(state.write_failure)
            }
        };
        match failure {
            None => std::future::pending().await,
            Some(Some(kind)) => Err(kind.into()),
            Some(None) => Ok(()),
        }
    }

    async fn read_until(&mut self, byte: u8) -> io::Result<Vec<u8>> {
        match self.poll_read(|rx| rx.iter().position(|b| *b == byte).map(|pos| pos + 1)) {
            Some(res) => res,
            None => std::future::pending().await,
        }
    }

    async fn read_exact(&mut self, length: usize) -> io::Result<Vec<u8>> {
        match self.poll_read(|rx| (rx.len() >= length).then_some(length)) {
            Some(res) => res,
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        lock(&self.state).closed = true;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("mock://{}", self.name)
    }
}
impl Drop for MockSession {
    fn drop(&mut self) {
        lock(&self.state).released = true;
    }
}

/// Observes a [`MockSession`] after it has been handed to a driver.
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}
impl MockHandle {
    /// Every write so far, as text.
    pub fn written(&self) -> Vec<String> {
        lock(&self.state)
            .written
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }

    pub fn write_count(&self) -> usize {
        lock(&self.state).written.len()
    }

    pub fn push_reply(&self, line: &str) {
        lock(&self.state)
            .replies
            .push_back(MockReply::Data(format!("{line}\n").into_bytes()));
    }

    pub fn pending_replies(&self) -> usize {
        lock(&self.state).replies.len()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Whether the session object has been dropped.
    pub fn is_released(&self) -> bool {
        lock(&self.state).released
    }
}

/// Hands out scripted sessions keyed by resource string. Resources with no session left
/// are unreachable.
#[derive(Default)]
pub struct MockConnector {
    sessions: Mutex<HashMap<String, VecDeque<MockSession>>>,
    hanging: HashSet<String>,
}
impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(self, resource: &str, session: MockSession) -> Self {
        self.add_session(resource, session);
        self
    }

    /// Opening `resource` never completes.
    pub fn with_hang(mut self, resource: &str) -> Self {
        self.hanging.insert(canonical(resource));
        self
    }

    pub fn add_session(&self, resource: &str, session: MockSession) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .entry(canonical(resource))
            .or_default()
            .push_back(session);
    }

    fn take(&self, key: &str) -> Option<MockSession> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.get_mut(key).and_then(VecDeque::pop_front)
    }
}
#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, spec: &ConnectionSpec) -> Result<Box<dyn BusSession>> {
        let key = spec.resource().to_string();
        if self.hanging.contains(&key) {
            std::future::pending::<()>().await;
        }
        match self.take(&key) {
            Some(session) => Ok(Box::new(session)),
            None => Err(Error::Connection(format!("No instrument answering at {key}"))),
        }
    }
}

fn canonical(resource: &str) -> String {
    resource
        .parse::<Resource>()
        .map(|r| r.to_string())
        .unwrap_or_else(|_| resource.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replies_are_split_on_terminators() {
        let mut session = MockSession::new("dev")
            .reply_bytes("1\n2\n")
            .reply_bytes("#13abc\n");
        assert_eq!(session.read_until(b'\n').await.unwrap(), b"1\n");
        assert_eq!(session.read_until(b'\n').await.unwrap(), b"2\n");
        assert_eq!(session.read_exact(3).await.unwrap(), b"#13");
        assert_eq!(session.read_exact(3).await.unwrap(), b"abc");
        assert_eq!(session.read_until(b'\n').await.unwrap(), b"\n");
    }

    #[tokio::test(start_paused = true)]
    async fn empty_script_never_answers() {
        let mut session = MockSession::new("dev");
        let res = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            session.read_until(b'\n'),
        )
        .await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn connector_hands_out_each_session_once() {
        let connector =
            MockConnector::new().with_session("tcpip0::10.0.0.2::inst0::instr", MockSession::new("a"));
        let spec: ConnectionSpec = "TCPIP0::10.0.0.2::inst0::INSTR".parse().unwrap();

        let first = connector.open(&spec).await.unwrap();
        assert_eq!(first.describe(), "mock://a");
        assert!(matches!(
            connector.open(&spec).await,
            Err(Error::Connection(_))
        ));
    }

    #[tokio::test]
    async fn drop_marks_the_session_released() {
        let session = MockSession::new("dev");
        let handle = session.handle();
        assert!(!handle.is_released());
        drop(session);
        assert!(handle.is_released());
    }
}
