//! Blockchain event synchronisation
//!
//! A shared [`HeightWatcher`] polls the chain head; one [`EventSyncer`] per
//! tracked event type mirrors its stream into the local event store in
//! bounded windows and publishes what it inserted.

pub mod height;
pub mod syncer;
pub mod window;

pub use height::HeightWatcher;
pub use syncer::{CycleReport, EventSyncer};
pub use window::block_windows;
