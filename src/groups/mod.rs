//! Named groups of live connections with fan-out broadcast.

mod registry;
mod types;

pub use registry::GroupRegistry;
pub use types::{BroadcastReport, GroupId, GroupStats};
