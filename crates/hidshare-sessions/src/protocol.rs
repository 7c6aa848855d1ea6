use serde::{Deserialize, Serialize};

use crate::types::{Descriptor, DeviceInfo, SessionId};

/// Version returned by `handshake`. Bumped on any envelope change.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Request envelope sent from a client façade to the arbiter.
///
/// `id` is strictly increasing per caller and exists for diagnostics and
/// ordering in logs, never for deduplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub caller: String,
    pub id: u64,
    #[serde(flatten)]
    pub body: RequestBody,
}

/// The nine request kinds, matched exhaustively by the arbiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum RequestBody {
    Handshake,
    EnumerateDone {
        devices: Vec<DeviceInfo>,
    },
    AcquireIntent {
        path: String,
        previous: Option<SessionId>,
    },
    AcquireDone {
        path: String,
        session: SessionId,
    },
    ReleaseIntent {
        path: String,
        session: SessionId,
    },
    ReleaseDone {
        path: String,
        session: SessionId,
    },
    GetSessions,
    GetPathBySession {
        session: SessionId,
    },
    Dispose,
}

impl RequestBody {
    /// Wire name of the request kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            RequestBody::Handshake => "handshake",
            RequestBody::EnumerateDone { .. } => "enumerateDone",
            RequestBody::AcquireIntent { .. } => "acquireIntent",
            RequestBody::AcquireDone { .. } => "acquireDone",
            RequestBody::ReleaseIntent { .. } => "releaseIntent",
            RequestBody::ReleaseDone { .. } => "releaseDone",
            RequestBody::GetSessions => "getSessions",
            RequestBody::GetPathBySession { .. } => "getPathBySession",
            RequestBody::Dispose => "dispose",
        }
    }
}

/// Typed results for the request kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    /// `handshake` — arbiter protocol version.
    Version(String),
    /// `enumerateDone` / `getSessions` — current descriptor list.
    Descriptors(Vec<Descriptor>),
    /// `acquireIntent` — freshly allocated session id.
    Session(SessionId),
    /// `getPathBySession` — bound device path.
    Path(String),
    /// Confirmations with no payload.
    Ack,
}
