use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;

use crate::background::SessionsHandle;
use crate::error::{Result, SessionError};
use crate::protocol::{Request, RequestBody, Response};
use crate::types::{Descriptor, DeviceInfo, SessionId};

/// Per-caller façade over a spawned [`SessionsBackground`].
///
/// Stamps every request with this instance's caller id and a strictly
/// increasing request counter, and republishes descriptor broadcasts
/// through [`SessionsClient::next_descriptors`]. Holds no authoritative
/// state of its own.
///
/// [`SessionsBackground`]: crate::background::SessionsBackground
pub struct SessionsClient {
    handle: SessionsHandle,
    // Discriminates clients in the arbiter log; not a security identity.
    caller: String,
    next_id: AtomicU64,
    events: Option<broadcast::Receiver<Vec<Descriptor>>>,
}

impl SessionsClient {
    /// Create a façade and subscribe to descriptor changes.
    pub fn new(handle: SessionsHandle) -> Self {
        let events = Some(handle.subscribe());
        Self {
            handle,
            caller: weak_random_id(3),
            next_id: AtomicU64::new(0),
            events,
        }
    }

    /// Caller id stamped on every request from this instance.
    pub fn caller(&self) -> &str {
        &self.caller
    }

    /// Validate the arbiter is reachable and return its protocol version.
    /// Must precede every other request from this instance.
    pub async fn handshake(&self) -> Result<String> {
        match self.request(RequestBody::Handshake).await? {
            Response::Version(version) => Ok(version),
            _ => Err(SessionError::UnexpectedResponse),
        }
    }

    /// Report the result of an enumeration pass; returns the updated
    /// descriptor list.
    pub async fn enumerate_done(&self, devices: Vec<DeviceInfo>) -> Result<Vec<Descriptor>> {
        match self.request(RequestBody::EnumerateDone { devices }).await? {
            Response::Descriptors(descriptors) => Ok(descriptors),
            _ => Err(SessionError::UnexpectedResponse),
        }
    }

    /// Reserve a path for acquisition; returns the fresh session id to pass
    /// to the driver and then to [`SessionsClient::acquire_done`].
    pub async fn acquire_intent(
        &self,
        path: impl Into<String>,
        previous: Option<SessionId>,
    ) -> Result<SessionId> {
        let body = RequestBody::AcquireIntent {
            path: path.into(),
            previous,
        };
        match self.request(body).await? {
            Response::Session(session) => Ok(session),
            _ => Err(SessionError::UnexpectedResponse),
        }
    }

    /// Confirm the driver finished acquiring the device.
    pub async fn acquire_done(&self, path: impl Into<String>, session: SessionId) -> Result<()> {
        let body = RequestBody::AcquireDone {
            path: path.into(),
            session,
        };
        self.expect_ack(body).await
    }

    /// Announce an upcoming release (or abandon an unconfirmed acquire).
    pub async fn release_intent(&self, path: impl Into<String>, session: SessionId) -> Result<()> {
        let body = RequestBody::ReleaseIntent {
            path: path.into(),
            session,
        };
        self.expect_ack(body).await
    }

    /// Confirm the driver finished releasing the device.
    pub async fn release_done(&self, path: impl Into<String>, session: SessionId) -> Result<()> {
        let body = RequestBody::ReleaseDone {
            path: path.into(),
            session,
        };
        self.expect_ack(body).await
    }

    /// Current descriptor list.
    pub async fn get_sessions(&self) -> Result<Vec<Descriptor>> {
        match self.request(RequestBody::GetSessions).await? {
            Response::Descriptors(descriptors) => Ok(descriptors),
            _ => Err(SessionError::UnexpectedResponse),
        }
    }

    /// Path currently bound to a session.
    pub async fn get_path_by_session(&self, session: SessionId) -> Result<String> {
        match self.request(RequestBody::GetPathBySession { session }).await? {
            Response::Path(path) => Ok(path),
            _ => Err(SessionError::UnexpectedResponse),
        }
    }

    /// Drop the descriptor subscription and free this caller's sessions at
    /// the arbiter. Other clients are unaffected.
    pub async fn dispose(&mut self) -> Result<()> {
        self.events = None;
        self.expect_ack(RequestBody::Dispose).await
    }

    /// Await the next descriptor snapshot.
    ///
    /// Snapshots are delivered at least once per state-changing
    /// confirmation; consumers diff against their last known list. A lagged
    /// receiver skips to the freshest snapshot rather than failing.
    pub async fn next_descriptors(&mut self) -> Result<Vec<Descriptor>> {
        let events = self
            .events
            .as_mut()
            .ok_or(SessionError::BackgroundClosed)?;
        loop {
            match events.recv().await {
                Ok(descriptors) => return Ok(descriptors),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "descriptor receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(SessionError::BackgroundClosed);
                }
            }
        }
    }

    async fn request(&self, body: RequestBody) -> Result<Response> {
        let request = Request {
            caller: self.caller.clone(),
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            body,
        };
        self.handle.request(request).await
    }

    async fn expect_ack(&self, body: RequestBody) -> Result<()> {
        match self.request(body).await? {
            Response::Ack => Ok(()),
            _ => Err(SessionError::UnexpectedResponse),
        }
    }
}

/// Short, human-scannable id for telling clients apart in logs.
///
/// Weak by design: derived from the clock and thread identity, not a CSPRNG.
fn weak_random_id(len: usize) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    static SEQUENCE: AtomicU64 = AtomicU64::new(0);

    let mut hasher = DefaultHasher::new();
    std::time::SystemTime::now().hash(&mut hasher);
    std::thread::current().id().hash(&mut hasher);
    SEQUENCE.fetch_add(1, Ordering::Relaxed).hash(&mut hasher);
    let mut state = hasher.finish();

    (0..len)
        .map(|_| {
            let index = (state % ALPHABET.len() as u64) as usize;
            state /= ALPHABET.len() as u64;
            ALPHABET[index] as char
        })
        .collect()
}
