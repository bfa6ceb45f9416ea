use std::{
    ffi::CString,
    io::{self, BufRead, BufReader, Read, Write},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use log::debug;
use tokio::sync::Mutex;
use visa_rs::prelude::*;

use super::{BusSession, READ_CHUNK};

/// The resource manager has to outlive every session opened through it.
struct VisaLink {
    _rm: DefaultRM,
    /// `None` once closed
    io: Option<BufReader<Instrument>>,
}
impl VisaLink {
    fn io(&mut self) -> io::Result<&mut BufReader<Instrument>> {
        self.io
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "VISA session closed"))
    }
}

/// A session driven through the system VISA library. VISA calls block, so every
/// operation runs on the blocking pool. The VISA I/O timeout is set to the connection
/// timeout, a call abandoned by the caller still returns within that time.
pub struct VisaSession {
    resource: String,
    link: Arc<Mutex<VisaLink>>,
}
impl VisaSession {
    pub async fn open(resource: String, timeout: Duration) -> io::Result<Self> {
        let name = resource.clone();
        let tmo_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        let link = tokio::task::spawn_blocking(move || -> io::Result<VisaLink> {
            let rm = DefaultRM::new().map_err(visa_error)?;
            let c_string =
                CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            let visa_string = visa_rs::VisaString::from(c_string);
            let instr = rm
                .open(&visa_string, AccessMode::NO_LOCK, timeout)
                .map_err(visa_error)?;
            let tmo = visa_rs::attribute::AttrTmoValue::new_checked(tmo_ms).ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, format!("bad VISA timeout {tmo_ms} ms"))
            })?;
            instr.set_attr(tmo).map_err(visa_error)?;
            Ok(VisaLink {
                _rm: rm,
                io: Some(BufReader::new(instr)),
            })
        })
        .await
        .map_err(io::Error::other)??;

        debug!("VISA resource '{resource}' opened with {tmo_ms} ms timeout");
        Ok(Self {
            resource,
            link: Arc::new(Mutex::new(link)),
        })
    }

    async fn blocking<T, F>(&self, op: F) -> io::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut VisaLink) -> io::Result<T> + Send + 'static,
    {
        let link = self.link.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = link.blocking_lock();
            op(&mut guard)
        })
        .await
        .map_err(io::Error::other)?
    }
}
#[async_trait]
impl BusSession for VisaSession {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let data = data.to_vec();
        self.blocking(move |link| {
            let instr = link.io()?.get_mut();
            instr.write_all(&data)?;
            instr.flush()
        })
        .await
    }

    async fn read_until(&mut self, byte: u8) -> io::Result<Vec<u8>> {
        self.blocking(move |link| {
            let mut resp = vec![];
            if link.io()?.read_until(byte, &mut resp)? == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            Ok(resp)
        })
        .await
    }

    async fn read_exact(&mut self, length: usize) -> io::Result<Vec<u8>> {
        self.blocking(move |link| {
            let mut resp = Vec::with_capacity(length.min(READ_CHUNK));
            link.io()?.take(length as u64).read_to_end(&mut resp)?;
            if resp.len() < length {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            Ok(resp)
        })
        .await
    }

    /// Waits for a call still running on the blocking pool, then drops the instrument
    /// handle, which closes the VISA session.
    async fn close(&mut self) -> io::Result<()> {
        self.blocking(|link| {
            link.io.take();
            Ok(())
        })
        .await
    }

    fn describe(&self) -> String {
        format!("visa://{}", self.resource)
    }
}

fn visa_error(e: visa_rs::Error) -> io::Error {
    io::Error::other(e.to_string())
}

/// List every `INSTR` resource the VISA library can see.
pub(crate) async fn find_resources() -> io::Result<Vec<String>> {
    tokio::task::spawn_blocking(|| -> io::Result<Vec<String>> {
        let rm = DefaultRM::new().map_err(visa_error)?;
        let query = CString::new("?*INSTR")
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let mut list = rm
            .find_res_list(&visa_rs::VisaString::from(query))
            .map_err(visa_error)?;

        let mut found = vec![];
        while let Some(res) = list.find_next().map_err(visa_error)? {
            found.push(res.to_string());
        }
        Ok(found)
    })
    .await
    .map_err(io::Error::other)?
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    /// Run with `LABEQ_VISA_RESOURCE=<resource> cargo test --features visa -- --ignored`
    #[tokio::test]
    #[ignore = "needs a VISA library and an attached instrument"]
    async fn unanswered_read_respects_timeout_and_close_releases() {
        let Ok(resource) = std::env::var("LABEQ_VISA_RESOURCE") else {
            return;
        };
        let mut session = VisaSession::open(resource, Duration::from_millis(300)).await.unwrap();

        /* Nothing was asked, so nothing comes back */
        let start = Instant::now();
        assert!(session.read_until(b'\n').await.is_err());
        assert!(start.elapsed() < Duration::from_secs(2));

        session.close().await.unwrap();
        let err = session.write_all(b"*IDN?\n").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }
}
