//! Data-store connection lifecycle.

mod sqlite;
mod state;
mod store;
mod supervisor;

pub use sqlite::SqliteStore;
pub use state::ConnectionState;
pub use store::{CollectionStats, DataStore, StoreError, StoreEvent, StoreInfo, StoreResult};
pub use supervisor::{
    ConnectionError, ConnectionEvent, ConnectionResult, ConnectionSupervisor, SupervisorConfig,
};
