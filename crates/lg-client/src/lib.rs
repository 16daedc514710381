//! LinkGuard Client
//!
//! Everything a device needs around the pure engine in `lg-core`:
//!
//! - `redirect`: HEAD-only, loop-safe redirect resolution
//! - `store`: persisted hotset lists and the host-status cache
//! - `sync`: sync protocol client, coalescing coordinator and scheduler
//! - `remote`: background remote analysis collaborator
//! - `engine`: the decision pipeline tying them together

pub mod engine;
pub mod redirect;
pub mod remote;
pub mod store;
pub mod sync;

pub use engine::{Decision, DecisionEngine, DecisionSource, EngineConfig};
pub use redirect::{HeadResponse, HttpTransport, RedirectCause, RedirectOutcome, RedirectResolver, Transport};
pub use remote::{HttpRemoteAnalyzer, RemoteAnalyzer, RemoteLog, RemoteStatus, RemoteVerdict};
pub use store::{ApplyKind, HotsetState, HotsetStore, JsonFileStore, MemoryStateStore, StateStore, StoreError};
pub use sync::{
    sync_once, Backoff, HotsetClient, HttpHotsetClient, SyncCoordinator, SyncError, SyncOutcome, SyncScheduler,
};
