//! Real-time session and signaling core for two-party tele-consultation calls
//!
//! The hub side (`hub`, `api`, `store`, `ice`, `auth`) runs in the signaling
//! server process; the client side (`link`, `engine`, `monitor`) runs in each
//! participant's process. Both sides share the wire protocol in
//! `hub::protocol` and the error and config types at the crate root.

pub mod api;
pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod hub;
pub mod ice;
pub mod link;
pub mod monitor;
pub mod store;

pub use config::{CoreConfig, HubConfig, IceProviderConfig, LinkConfig};
pub use error::{Error, Result};
