//! Sheet Relay - edge router for a spreadsheet-backed application
//!
//! The relay sits between a browser frontend and a single fixed upstream
//! endpoint (a spreadsheet web app that routes on query parameters). It adds
//! what the upstream cannot provide itself: credentialed CORS, a cookie
//! session with a user/admin role, and responses that are always JSON.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐        ┌───────────────────────────────────┐        ┌──────────────┐
//! │   Browser    │  HTTP  │            sheet-relay            │  HTTP  │   Upstream   │
//! │   frontend   │ ─────► │                                   │ ─────► │  spreadsheet │
//! │              │        │  OriginPolicy   (cors)            │        │   web app    │
//! │              │        │  SessionStore   (session)         │        │              │
//! │              │ ◄───── │  Dispatcher     (dispatch)        │ ◄───── │  JSON / HTML │
//! │              │  JSON  │  Forwarder      (upstream)        │        │              │
//! └──────────────┘        │  normalize      (normalize)       │        └──────────────┘
//!                         └───────────────────────────────────┘
//! ```
//!
//! Each request is handled independently: the origin decision is made first,
//! preflights are answered locally, local operations (`ping`, `sessionInfo`,
//! `login`, `logout`) never reach the upstream, and forwarded operations make
//! exactly one upstream call.
//!
//! # Example Usage
//!
//! ```bash
//! $ SHEET_RELAY_UPSTREAM_URL=https://script.google.com/macros/s/XYZ/exec \
//!   SHEET_RELAY_ALLOWED_ORIGINS=https://app.example.com \
//!   SHEET_RELAY_SESSION_SECRET=change-me \
//!   sheet-relay
//! ```

#![doc(html_root_url = "https://docs.rs/sheet-relay/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod cors;
pub mod dispatch;
pub mod error;
pub mod normalize;
pub mod request;
pub mod server;
pub mod session;
pub mod upstream;

pub use config::{RelayConfig, RelayConfigBuilder};
pub use cors::{CorsDecision, OriginPolicy};
pub use dispatch::Dispatcher;
pub use error::{RelayError, RelayResult};
pub use normalize::RelayResponse;
pub use request::{Mode, RequestDescriptor};
pub use server::{BoundRelay, RelayServer};
pub use session::{Role, SessionStore};
pub use upstream::{Forwarder, HttpUpstream, Upstream, UpstreamRequest, UpstreamResponse};

/// Relay version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
