//! Serialized session arbitration for shared USB/HID devices.
//!
//! Many independent callers (tabs, windows, requests) cannot lock a raw
//! device handle atomically, so exclusivity is brokered instead: a single
//! [`SessionsBackground`] actor owns the path → session → intent graph and
//! processes requests strictly one at a time, while any number of
//! [`SessionsClient`] façades talk to it over a request queue.
//!
//! The acquire and release flows are deliberately two-phase (`*_intent`
//! then `*_done`) because the actual hardware claim is slow and happens in
//! an external driver between the two calls. The arbiter never times out a
//! pending intent; completion or abandonment is the owner's job, and a
//! disconnect clears the path on the next enumeration pass.

pub mod background;
pub mod client;
pub mod error;
pub mod protocol;
pub mod types;

pub use background::{SessionsBackground, SessionsHandle};
pub use client::SessionsClient;
pub use error::{Result, SessionError};
pub use protocol::{Request, RequestBody, Response, PROTOCOL_VERSION};
pub use types::{Descriptor, DeviceInfo, SessionId};
