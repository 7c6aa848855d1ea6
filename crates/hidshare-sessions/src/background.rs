use std::collections::{BTreeMap, HashSet};

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::error::{Result, SessionError};
use crate::protocol::{Request, RequestBody, Response, PROTOCOL_VERSION};
use crate::types::{Descriptor, DeviceInfo, SessionId};

const REQUEST_QUEUE_DEPTH: usize = 64;
const DESCRIPTOR_EVENT_CAPACITY: usize = 16;

/// Per-path ownership state.
///
/// `Free -> PendingAcquire -> Owned -> PendingRelease -> Free`; a path
/// absent from the latest enumeration leaves the map entirely. The pending
/// states record an intent whose hardware side effect is performed by the
/// external driver between the intent and done calls.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PathState {
    Free,
    PendingAcquire { session: SessionId, caller: String },
    Owned { session: SessionId, caller: String },
    PendingRelease { session: SessionId, caller: String },
}

impl PathState {
    fn session(&self) -> Option<SessionId> {
        match self {
            PathState::Free => None,
            PathState::PendingAcquire { session, .. }
            | PathState::Owned { session, .. }
            | PathState::PendingRelease { session, .. } => Some(*session),
        }
    }

    fn caller(&self) -> Option<&str> {
        match self {
            PathState::Free => None,
            PathState::PendingAcquire { caller, .. }
            | PathState::Owned { caller, .. }
            | PathState::PendingRelease { caller, .. } => Some(caller),
        }
    }
}

#[derive(Debug)]
struct PathEntry {
    product: Option<u16>,
    state: PathState,
}

/// The session arbiter: sole owner of the path → session → intent graph.
///
/// All handler methods are plain synchronous state transitions; mutual
/// exclusion comes from [`SessionsBackground::spawn`] draining one request
/// to completion at a time. No timeout is ever applied to a pending intent —
/// the arbiter cannot observe the external hardware claim, so a stuck
/// reservation is cleared only by the owner's matching done/release call or
/// by the next enumeration dropping the path.
pub struct SessionsBackground {
    paths: BTreeMap<String, PathEntry>,
    last_session: Option<SessionId>,
    callers: HashSet<String>,
    descriptors_tx: broadcast::Sender<Vec<Descriptor>>,
}

impl SessionsBackground {
    pub fn new() -> Self {
        let (descriptors_tx, _) = broadcast::channel(DESCRIPTOR_EVENT_CAPACITY);
        Self {
            paths: BTreeMap::new(),
            last_session: None,
            callers: HashSet::new(),
            descriptors_tx,
        }
    }

    /// Subscribe to descriptor snapshots published after every
    /// state-changing confirmation. Delivery is at-least-once; consumers
    /// diff against their last known list.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<Descriptor>> {
        self.descriptors_tx.subscribe()
    }

    /// Snapshot of the current descriptor list, ordered by path.
    pub fn descriptors(&self) -> Vec<Descriptor> {
        self.paths
            .iter()
            .map(|(path, entry)| Descriptor {
                path: path.clone(),
                session: entry.state.session(),
                product: entry.product,
            })
            .collect()
    }

    /// Process one request to completion.
    ///
    /// Failures are returned as typed values; the arbiter never loses state
    /// on a bad request.
    pub fn handle_request(&mut self, request: Request) -> Result<Response> {
        let Request { caller, id, body } = request;
        tracing::debug!(%caller, id, kind = body.kind(), "handling request");

        if !matches!(body, RequestBody::Handshake) && !self.callers.contains(&caller) {
            tracing::warn!(%caller, kind = body.kind(), "request before handshake");
            return Err(SessionError::Uninitialized);
        }

        match body {
            RequestBody::Handshake => {
                self.callers.insert(caller);
                Ok(Response::Version(PROTOCOL_VERSION.to_string()))
            }
            RequestBody::EnumerateDone { devices } => {
                Ok(Response::Descriptors(self.enumerate_done(devices)))
            }
            RequestBody::AcquireIntent { path, previous } => self
                .acquire_intent(&path, previous, &caller)
                .map(Response::Session),
            RequestBody::AcquireDone { path, session } => {
                self.acquire_done(&path, session)?;
                Ok(Response::Ack)
            }
            RequestBody::ReleaseIntent { path, session } => {
                self.release_intent(&path, session)?;
                Ok(Response::Ack)
            }
            RequestBody::ReleaseDone { path, session } => {
                self.release_done(&path, session)?;
                Ok(Response::Ack)
            }
            RequestBody::GetSessions => Ok(Response::Descriptors(self.descriptors())),
            RequestBody::GetPathBySession { session } => {
                self.path_by_session(session).map(Response::Path)
            }
            RequestBody::Dispose => {
                self.dispose(&caller);
                Ok(Response::Ack)
            }
        }
    }

    /// Replace the known path set from an enumeration pass.
    ///
    /// Persisting paths keep their session bindings; disappearing paths are
    /// dropped and their sessions invalidated. A later re-detection of the
    /// same physical path starts fresh and never reuses the old session id.
    fn enumerate_done(&mut self, devices: Vec<DeviceInfo>) -> Vec<Descriptor> {
        let mut next = BTreeMap::new();
        for device in devices {
            let state = self
                .paths
                .remove(&device.path)
                .map(|entry| entry.state)
                .unwrap_or(PathState::Free);
            next.insert(
                device.path,
                PathEntry {
                    product: device.product,
                    state,
                },
            );
        }

        for (path, entry) in &self.paths {
            if let Some(session) = entry.state.session() {
                tracing::info!(%path, %session, "session invalidated by disconnect");
            }
        }

        self.paths = next;
        self.publish()
    }

    fn acquire_intent(
        &mut self,
        path: &str,
        previous: Option<SessionId>,
        caller: &str,
    ) -> Result<SessionId> {
        let entry = self
            .paths
            .get_mut(path)
            .ok_or_else(|| SessionError::UnknownPath(path.to_string()))?;

        match (&entry.state, previous) {
            (PathState::Free, None) => {}
            (PathState::Owned { session, .. }, Some(previous)) if *session == previous => {
                // Steal with proof of prior ownership: force-release first.
                tracing::info!(%path, %session, "force releasing owned session");
            }
            _ => {
                tracing::warn!(%path, ?previous, "acquire intent rejected");
                return Err(SessionError::PathBusy(path.to_string()));
            }
        }

        let session = self
            .last_session
            .map_or_else(SessionId::first, SessionId::next);
        self.last_session = Some(session);
        entry.state = PathState::PendingAcquire {
            session,
            caller: caller.to_string(),
        };
        tracing::debug!(%path, %session, "acquire intent recorded");
        Ok(session)
    }

    fn acquire_done(&mut self, path: &str, session: SessionId) -> Result<()> {
        let entry = self
            .paths
            .get_mut(path)
            .ok_or_else(|| SessionError::UnknownPath(path.to_string()))?;

        match &entry.state {
            PathState::PendingAcquire {
                session: pending,
                caller,
            } if *pending == session => {
                entry.state = PathState::Owned {
                    session,
                    caller: caller.clone(),
                };
            }
            _ => {
                return Err(SessionError::SessionMismatch {
                    path: path.to_string(),
                    session,
                });
            }
        }

        tracing::info!(%path, %session, "session acquired");
        self.publish();
        Ok(())
    }

    fn release_intent(&mut self, path: &str, session: SessionId) -> Result<()> {
        let entry = self
            .paths
            .get_mut(path)
            .ok_or_else(|| SessionError::UnknownPath(path.to_string()))?;

        match &entry.state {
            // Also the explicit abandon path for an unconfirmed acquire.
            PathState::Owned {
                session: bound,
                caller,
            }
            | PathState::PendingAcquire {
                session: bound,
                caller,
            } if *bound == session => {
                entry.state = PathState::PendingRelease {
                    session,
                    caller: caller.clone(),
                };
                Ok(())
            }
            _ => Err(SessionError::SessionMismatch {
                path: path.to_string(),
                session,
            }),
        }
    }

    fn release_done(&mut self, path: &str, session: SessionId) -> Result<()> {
        let entry = self
            .paths
            .get_mut(path)
            .ok_or_else(|| SessionError::UnknownPath(path.to_string()))?;

        match &entry.state {
            PathState::PendingRelease { session: bound, .. } if *bound == session => {
                entry.state = PathState::Free;
            }
            _ => {
                return Err(SessionError::SessionMismatch {
                    path: path.to_string(),
                    session,
                });
            }
        }

        tracing::info!(%path, %session, "session released");
        self.publish();
        Ok(())
    }

    fn path_by_session(&self, session: SessionId) -> Result<String> {
        self.paths
            .iter()
            .find(|(_, entry)| entry.state.session() == Some(session))
            .map(|(path, _)| path.clone())
            .ok_or(SessionError::SessionNotFound(session))
    }

    /// Free every path whose pending/owned session was created by the
    /// disposing caller and unregister the caller. Other callers' sessions
    /// are untouched.
    fn dispose(&mut self, caller: &str) {
        let mut changed = false;
        for (path, entry) in self.paths.iter_mut() {
            if entry.state.caller() == Some(caller) {
                if let Some(session) = entry.state.session() {
                    tracing::info!(%path, %session, %caller, "session freed on dispose");
                }
                entry.state = PathState::Free;
                changed = true;
            }
        }
        self.callers.remove(caller);
        if changed {
            self.publish();
        }
    }

    fn publish(&self) -> Vec<Descriptor> {
        let descriptors = self.descriptors();
        // Send fails only when no subscriber exists, which is fine.
        let _ = self.descriptors_tx.send(descriptors.clone());
        descriptors
    }

    /// Move the arbiter into a tokio task draining a serialized request
    /// queue. This is the mutual-exclusion mechanism: no two requests are
    /// ever interleaved mid-transition.
    pub fn spawn(self) -> SessionsHandle {
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let events = self.descriptors_tx.clone();
        tokio::spawn(self.run(rx));
        SessionsHandle { tx, events }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<(Request, ReplyTx)>) {
        while let Some((request, reply)) = rx.recv().await {
            let result = self.handle_request(request);
            // A dropped reply means the caller went away mid-request.
            let _ = reply.send(result);
        }
        tracing::debug!("sessions background stopped");
    }
}

impl Default for SessionsBackground {
    fn default() -> Self {
        Self::new()
    }
}

type ReplyTx = oneshot::Sender<Result<Response>>;

/// Cloneable request function for a spawned arbiter.
///
/// Each client façade wraps one of these; the arbiter end processes
/// requests strictly in arrival order.
#[derive(Debug, Clone)]
pub struct SessionsHandle {
    tx: mpsc::Sender<(Request, ReplyTx)>,
    events: broadcast::Sender<Vec<Descriptor>>,
}

impl SessionsHandle {
    /// Send one request and await its typed result.
    pub async fn request(&self, request: Request) -> Result<Response> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((request, reply_tx))
            .await
            .map_err(|_| SessionError::BackgroundClosed)?;
        reply_rx.await.map_err(|_| SessionError::BackgroundClosed)?
    }

    /// Subscribe to descriptor snapshots.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<Descriptor>> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(caller: &str, id: u64, body: RequestBody) -> Request {
        Request {
            caller: caller.to_string(),
            id,
            body,
        }
    }

    fn ready_background(paths: &[&str]) -> SessionsBackground {
        let mut background = SessionsBackground::new();
        background
            .handle_request(request("abc", 0, RequestBody::Handshake))
            .unwrap();
        let devices = paths.iter().map(|path| DeviceInfo::new(*path)).collect();
        background
            .handle_request(request("abc", 1, RequestBody::EnumerateDone { devices }))
            .unwrap();
        background
    }

    fn acquire(background: &mut SessionsBackground, path: &str) -> SessionId {
        let session = match background
            .handle_request(request(
                "abc",
                10,
                RequestBody::AcquireIntent {
                    path: path.to_string(),
                    previous: None,
                },
            ))
            .unwrap()
        {
            Response::Session(session) => session,
            other => panic!("expected session, got {other:?}"),
        };
        background
            .handle_request(request(
                "abc",
                11,
                RequestBody::AcquireDone {
                    path: path.to_string(),
                    session,
                },
            ))
            .unwrap();
        session
    }

    #[test]
    fn handshake_returns_protocol_version() {
        let mut background = SessionsBackground::new();
        let response = background
            .handle_request(request("abc", 0, RequestBody::Handshake))
            .unwrap();
        assert_eq!(response, Response::Version(PROTOCOL_VERSION.to_string()));
    }

    #[test]
    fn requests_before_handshake_fail_uninitialized() {
        let mut background = SessionsBackground::new();
        let err = background
            .handle_request(request("abc", 0, RequestBody::GetSessions))
            .unwrap_err();
        assert_eq!(err, SessionError::Uninitialized);
    }

    #[test]
    fn enumerate_done_reports_descriptors() {
        let mut background = ready_background(&[]);
        let response = background
            .handle_request(request(
                "abc",
                2,
                RequestBody::EnumerateDone {
                    devices: vec![DeviceInfo {
                        path: "usb-1".to_string(),
                        product: Some(0x53c1),
                    }],
                },
            ))
            .unwrap();

        assert_eq!(
            response,
            Response::Descriptors(vec![Descriptor {
                path: "usb-1".to_string(),
                session: None,
                product: Some(0x53c1),
            }])
        );
    }

    #[test]
    fn full_acquire_release_cycle_allocates_fresh_ids() {
        let mut background = ready_background(&["A"]);

        let first = match background
            .handle_request(request(
                "abc",
                2,
                RequestBody::AcquireIntent {
                    path: "A".to_string(),
                    previous: None,
                },
            ))
            .unwrap()
        {
            Response::Session(session) => session,
            other => panic!("expected session, got {other:?}"),
        };
        assert_eq!(first.value(), 1);

        background
            .handle_request(request(
                "abc",
                3,
                RequestBody::AcquireDone {
                    path: "A".to_string(),
                    session: first,
                },
            ))
            .unwrap();

        // A second acquire without proof of ownership is rejected.
        let err = background
            .handle_request(request(
                "abc",
                4,
                RequestBody::AcquireIntent {
                    path: "A".to_string(),
                    previous: None,
                },
            ))
            .unwrap_err();
        assert_eq!(err, SessionError::PathBusy("A".to_string()));

        background
            .handle_request(request(
                "abc",
                5,
                RequestBody::ReleaseIntent {
                    path: "A".to_string(),
                    session: first,
                },
            ))
            .unwrap();
        background
            .handle_request(request(
                "abc",
                6,
                RequestBody::ReleaseDone {
                    path: "A".to_string(),
                    session: first,
                },
            ))
            .unwrap();

        let second = match background
            .handle_request(request(
                "abc",
                7,
                RequestBody::AcquireIntent {
                    path: "A".to_string(),
                    previous: None,
                },
            ))
            .unwrap()
        {
            Response::Session(session) => session,
            other => panic!("expected session, got {other:?}"),
        };
        assert_eq!(second.value(), 2, "session ids are never reused");
    }

    #[test]
    fn acquire_intent_on_pending_path_fails_busy() {
        let mut background = ready_background(&["A"]);
        background
            .handle_request(request(
                "abc",
                2,
                RequestBody::AcquireIntent {
                    path: "A".to_string(),
                    previous: None,
                },
            ))
            .unwrap();

        let err = background
            .handle_request(request(
                "abc",
                3,
                RequestBody::AcquireIntent {
                    path: "A".to_string(),
                    previous: None,
                },
            ))
            .unwrap_err();
        assert_eq!(err, SessionError::PathBusy("A".to_string()));
    }

    #[test]
    fn acquire_intent_on_unknown_path_fails() {
        let mut background = ready_background(&[]);
        let err = background
            .handle_request(request(
                "abc",
                2,
                RequestBody::AcquireIntent {
                    path: "ghost".to_string(),
                    previous: None,
                },
            ))
            .unwrap_err();
        assert_eq!(err, SessionError::UnknownPath("ghost".to_string()));
    }

    #[test]
    fn acquire_done_with_wrong_session_leaves_state_unchanged() {
        let mut background = ready_background(&["A"]);
        let session = match background
            .handle_request(request(
                "abc",
                2,
                RequestBody::AcquireIntent {
                    path: "A".to_string(),
                    previous: None,
                },
            ))
            .unwrap()
        {
            Response::Session(session) => session,
            other => panic!("expected session, got {other:?}"),
        };

        let err = background
            .handle_request(request(
                "abc",
                3,
                RequestBody::AcquireDone {
                    path: "A".to_string(),
                    session: session.next(),
                },
            ))
            .unwrap_err();
        assert!(matches!(err, SessionError::SessionMismatch { .. }));

        // The matching done still succeeds afterwards.
        background
            .handle_request(request(
                "abc",
                4,
                RequestBody::AcquireDone {
                    path: "A".to_string(),
                    session,
                },
            ))
            .unwrap();
    }

    #[test]
    fn steal_with_proof_of_prior_ownership() {
        let mut background = ready_background(&["A"]);
        let first = acquire(&mut background, "A");

        let second = match background
            .handle_request(request(
                "abc",
                20,
                RequestBody::AcquireIntent {
                    path: "A".to_string(),
                    previous: Some(first),
                },
            ))
            .unwrap()
        {
            Response::Session(session) => session,
            other => panic!("expected session, got {other:?}"),
        };
        assert_ne!(second, first);

        // The stolen-from session is gone.
        let err = background
            .handle_request(request(
                "abc",
                21,
                RequestBody::GetPathBySession { session: first },
            ))
            .unwrap_err();
        assert_eq!(err, SessionError::SessionNotFound(first));
    }

    #[test]
    fn steal_with_stale_proof_is_rejected() {
        let mut background = ready_background(&["A"]);
        let owned = acquire(&mut background, "A");

        let err = background
            .handle_request(request(
                "abc",
                20,
                RequestBody::AcquireIntent {
                    path: "A".to_string(),
                    previous: Some(owned.next()),
                },
            ))
            .unwrap_err();
        assert_eq!(err, SessionError::PathBusy("A".to_string()));
    }

    #[test]
    fn release_intent_abandons_pending_acquire() {
        let mut background = ready_background(&["A"]);
        let session = match background
            .handle_request(request(
                "abc",
                2,
                RequestBody::AcquireIntent {
                    path: "A".to_string(),
                    previous: None,
                },
            ))
            .unwrap()
        {
            Response::Session(session) => session,
            other => panic!("expected session, got {other:?}"),
        };

        background
            .handle_request(request(
                "abc",
                3,
                RequestBody::ReleaseIntent {
                    path: "A".to_string(),
                    session,
                },
            ))
            .unwrap();
        background
            .handle_request(request(
                "abc",
                4,
                RequestBody::ReleaseDone {
                    path: "A".to_string(),
                    session,
                },
            ))
            .unwrap();

        // Path is free again.
        background
            .handle_request(request(
                "abc",
                5,
                RequestBody::AcquireIntent {
                    path: "A".to_string(),
                    previous: None,
                },
            ))
            .unwrap();
    }

    #[test]
    fn release_done_without_intent_fails_mismatch() {
        let mut background = ready_background(&["A"]);
        let session = acquire(&mut background, "A");

        let err = background
            .handle_request(request(
                "abc",
                20,
                RequestBody::ReleaseDone {
                    path: "A".to_string(),
                    session,
                },
            ))
            .unwrap_err();
        assert!(matches!(err, SessionError::SessionMismatch { .. }));
    }

    #[test]
    fn disconnect_invalidates_bound_session() {
        let mut background = ready_background(&["A", "B"]);
        let session = acquire(&mut background, "A");

        background
            .handle_request(request(
                "abc",
                20,
                RequestBody::EnumerateDone {
                    devices: vec![DeviceInfo::new("B")],
                },
            ))
            .unwrap();

        let err = background
            .handle_request(request(
                "abc",
                21,
                RequestBody::GetPathBySession { session },
            ))
            .unwrap_err();
        assert_eq!(err, SessionError::SessionNotFound(session));

        let err = background
            .handle_request(request(
                "abc",
                22,
                RequestBody::AcquireIntent {
                    path: "A".to_string(),
                    previous: None,
                },
            ))
            .unwrap_err();
        assert_eq!(err, SessionError::UnknownPath("A".to_string()));
    }

    #[test]
    fn reappearing_path_starts_fresh() {
        let mut background = ready_background(&["A"]);
        let old = acquire(&mut background, "A");

        background
            .handle_request(request(
                "abc",
                20,
                RequestBody::EnumerateDone { devices: vec![] },
            ))
            .unwrap();
        background
            .handle_request(request(
                "abc",
                21,
                RequestBody::EnumerateDone {
                    devices: vec![DeviceInfo::new("A")],
                },
            ))
            .unwrap();

        let fresh = match background
            .handle_request(request(
                "abc",
                22,
                RequestBody::AcquireIntent {
                    path: "A".to_string(),
                    previous: None,
                },
            ))
            .unwrap()
        {
            Response::Session(session) => session,
            other => panic!("expected session, got {other:?}"),
        };
        assert!(fresh > old, "history does not reuse old ids");
    }

    #[test]
    fn get_path_by_session_resolves_owned_path() {
        let mut background = ready_background(&["A"]);
        let session = acquire(&mut background, "A");

        let response = background
            .handle_request(request(
                "abc",
                20,
                RequestBody::GetPathBySession { session },
            ))
            .unwrap();
        assert_eq!(response, Response::Path("A".to_string()));
    }

    #[test]
    fn dispose_frees_only_own_sessions() {
        let mut background = ready_background(&["A", "B"]);
        background
            .handle_request(request("xyz", 0, RequestBody::Handshake))
            .unwrap();

        let mine = acquire(&mut background, "A");
        let theirs = match background
            .handle_request(request(
                "xyz",
                1,
                RequestBody::AcquireIntent {
                    path: "B".to_string(),
                    previous: None,
                },
            ))
            .unwrap()
        {
            Response::Session(session) => session,
            other => panic!("expected session, got {other:?}"),
        };
        background
            .handle_request(request(
                "xyz",
                2,
                RequestBody::AcquireDone {
                    path: "B".to_string(),
                    session: theirs,
                },
            ))
            .unwrap();

        background
            .handle_request(request("abc", 30, RequestBody::Dispose))
            .unwrap();

        // Our session is gone, theirs survives.
        let err = background
            .handle_request(request(
                "xyz",
                3,
                RequestBody::GetPathBySession { session: mine },
            ))
            .unwrap_err();
        assert_eq!(err, SessionError::SessionNotFound(mine));

        let response = background
            .handle_request(request(
                "xyz",
                4,
                RequestBody::GetPathBySession { session: theirs },
            ))
            .unwrap();
        assert_eq!(response, Response::Path("B".to_string()));

        // The disposed caller must handshake again.
        let err = background
            .handle_request(request("abc", 31, RequestBody::GetSessions))
            .unwrap_err();
        assert_eq!(err, SessionError::Uninitialized);
    }

    #[test]
    fn descriptors_are_published_after_confirmations() {
        let mut background = SessionsBackground::new();
        let mut events = background.subscribe();
        background
            .handle_request(request("abc", 0, RequestBody::Handshake))
            .unwrap();
        background
            .handle_request(request(
                "abc",
                1,
                RequestBody::EnumerateDone {
                    devices: vec![DeviceInfo::new("A")],
                },
            ))
            .unwrap();

        let snapshot = events.try_recv().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].session, None);

        let session = acquire(&mut background, "A");
        // acquire_done published an updated snapshot.
        let mut latest = None;
        while let Ok(snapshot) = events.try_recv() {
            latest = Some(snapshot);
        }
        assert_eq!(latest.unwrap()[0].session, Some(session));
    }

    #[test]
    fn failed_requests_do_not_publish() {
        let mut background = ready_background(&["A"]);
        let mut events = background.subscribe();

        let _ = background.handle_request(request(
            "abc",
            2,
            RequestBody::AcquireDone {
                path: "A".to_string(),
                session: SessionId::first(),
            },
        ));

        assert!(events.try_recv().is_err());
    }
}
