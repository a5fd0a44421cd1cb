//! Server-side application and client session state.
//!
//! ```text
//! SessionRegistry ── app_id ──▶ ApplicationSession
//!                                 ├─ AppConfig (from the first mount)
//!                                 └─ slots[0..MAX_APP_CLIENTS)
//!                                      └─ ClientSlot::{Unbound, Bound(ClientSession), Draining}
//! ```

pub mod app;
pub mod attach;
pub mod client;
pub mod registry;

pub use app::{AppConfig, ApplicationSession};
pub use attach::attach;
pub use client::{ClientSession, ClientSlot};
pub use registry::{EvictionPolicy, SessionRegistry};

/// Application identifier assigned by the client population
pub type AppId = u32;

/// Client identifier, unique within an application
pub type ClientId = u32;
