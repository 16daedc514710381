//! LinkGuard Hotset Ledger
//!
//! Server side of hotset distribution: ranks domains, cuts bounded versioned
//! snapshots, keeps each retained version's fast-forward delta to the head,
//! and serves the sync protocol over HTTP.

pub mod ledger;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod storage;

pub use ledger::{HotsetLedger, HotsetVersion, LedgerConfig, LedgerError};
pub use registry::{DomainEntry, DomainRegistry, DomainSource, RegistryError, RegistryFile};
pub use scheduler::HotsetScheduler;
pub use server::{router, serve, LATEST_VERSION_HEADER};
pub use storage::{JsonFileStorage, LedgerStorage, MemoryStorage, StorageError};
