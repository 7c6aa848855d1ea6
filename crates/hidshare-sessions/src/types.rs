use std::fmt;

use serde::{Deserialize, Serialize};

/// A logical lease over one device path.
///
/// Ids are allocated monotonically by the arbiter starting at 1 and are
/// never reused within an arbiter's lifetime, even after the underlying
/// path disconnects and reappears.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SessionId(u32);

impl SessionId {
    pub(crate) fn first() -> Self {
        Self(1)
    }

    pub(crate) fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Raw numeric value, for diagnostics.
    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One physically connected device as reported by enumeration.
///
/// Input to `enumerate_done`; carries no session field because session
/// assignment belongs to the arbiter alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Stable identifier of the physical connection.
    pub path: String,
    /// USB product id, when the enumerator knows it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<u16>,
}

impl DeviceInfo {
    /// Device with a path and no product metadata.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            product: None,
        }
    }
}

/// Published view of one connected device and its ownership status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Stable identifier of the physical connection.
    pub path: String,
    /// Session currently bound to the path, if any (pending or owned).
    pub session: Option<SessionId>,
    /// USB product id, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<u16>,
}
