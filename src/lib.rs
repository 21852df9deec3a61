//! Real-time geospatial event distribution core.
//!
//! The client-side core of the campus map application: a persistent
//! message-bus session that follows the user across spatial cells,
//! subscribing to the location-scoped topic of the current cell, routing
//! inbound events and push notifications, and keeping a self-expiring
//! registry of peers' shared locations.
//!
//! - [`geo`]: spatial cell encoding and movement detection.
//! - [`session`]: the bus session state machine, frames and dispatch.
//! - [`registry`]: time-bounded shared-location store.
//! - [`notify`]: notification routing chain.
//! - [`core`]: composition root with explicit init and teardown.

pub mod config;
pub mod core;
pub mod error;
pub mod geo;
pub mod logging;
pub mod notify;
pub mod registry;
pub mod session;

pub use crate::core::RealtimeCore;
pub use config::CoreConfig;
pub use error::{CoreError, CoreResult};
pub use geo::cell::{encode, is_significant_move, is_valid_cell, SpatialCell};
pub use geo::movement::{MovementWatcher, PositionError, PositionFix};
pub use notify::{
    Notification, NotificationAction, NotificationEvent, NotificationHandler, NotificationPayload,
    NotificationRouter,
};
pub use registry::{RegistryEvent, SharedLocationEntry, SharedLocationRegistry};
pub use session::{ConnectionState, InboundEvent, RealtimeEventSession, SessionEvent};
