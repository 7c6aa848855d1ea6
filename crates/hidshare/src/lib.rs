//! Share one HID device transport across concurrent callers.
//!
//! hidshare bundles the pieces of a device transport layer: a framing
//! codec for fixed-size report channels, a session arbiter that grants
//! exclusive device leases, and helpers for pushing built messages
//! through a raw channel.
//!
//! # Crate Structure
//!
//! - [`wire`] — Message framing codec and chunk reassembly
//! - [`sessions`] — Session arbiter and per-caller client (behind `sessions` feature)
//! - [`message`] — Build-and-send helpers over a raw device channel
//! - [`logging`] — tracing subscriber setup for binaries and tests

/// Re-export framing types.
pub mod wire {
    pub use hidshare_wire::*;
}

/// Re-export session arbitration types (requires `sessions` feature).
#[cfg(feature = "sessions")]
pub mod sessions {
    pub use hidshare_sessions::*;
}

pub mod logging;
pub mod message;
