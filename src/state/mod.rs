//! Realtime server state.
//!
//! - [`presence`]: who is online, on which handle
//! - [`rooms`]: connection to room memberships
//! - [`connections`]: live handles and their outbound queues
//! - [`lifecycle`]: connection phases, disconnect requests and shutdown
//! - [`switchboard`]: the container tying these together with storage

pub mod connections;
pub mod lifecycle;
pub mod presence;
pub mod rooms;
pub mod switchboard;
mod uid;

pub use connections::{ConnectionHandle, ConnectionRegistry, Outbound};
pub use lifecycle::{ConnectionPhase, LifecycleManager};
pub use presence::{PresenceEntry, PresenceTable};
pub use rooms::{RoomId, RoomManager};
pub use switchboard::{ReconcileReport, Switchboard};
pub use uid::{ConnId, ConnIdGenerator};
