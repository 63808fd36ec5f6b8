//! Peer Session Library
//!
//! Host/client session management for small groups sharing pose and event
//! state over direct peer connections. One participant hosts and relays;
//! everyone else joins it.
//!
//! # Modules
//!
//! - `session` - role negotiation, join protocol, batching, voice calls
//! - `avatar` - avatar allocation (fixed pool or spawner) and the peer roster
//! - `net` - wire protocol, transport contract and an in-process transport

pub mod avatar;
pub mod config;
pub mod metrics;
pub mod net;
pub mod session;
pub mod util;

pub use config::SessionConfig;
pub use net::protocol::{DataPackage, PeerId, PlayerTransforms};
pub use session::{Role, RoleKind, Session, SessionError};
