//! Session lifecycle management
//!
//! - `SessionHandle`: one conversation plus its lock, last-used time and in-flight count
//! - `EvictionPolicy`: pure LRU + TTL selection over a snapshot
//! - `SessionRegistry`: the concurrent id → handle map
//! - `Dispatcher`: runs one turn under the session lock with a caller-side deadline

pub mod dispatcher;
pub mod handle;
pub mod policy;
pub mod registry;

pub use dispatcher::{Dispatcher, Reply};
pub use handle::{FlightGuard, SessionHandle};
pub use policy::{EvictionPolicy, HandleSnapshot};
pub use registry::{SessionRegistry, parse_session_id};
