// roomwatch-core - shared building blocks for RoomWatch
//
// - config/   - YAML + environment configuration
// - logging/  - tracing subscriber bootstrap
// - live/     - room source capability, ids, info cache, source registry
// - events/   - event catalogue and the in-process event bus
//
// Everything here is local to one process; nothing is persisted.

pub mod config;
pub mod events;
pub mod live;
pub mod logging;

pub use config::Config;
pub use events::{Event, EventBus, EventType, Handler};
pub use live::{same_live, Info, InfoCache, Live, LiveId, RoomTable, SourceError};
