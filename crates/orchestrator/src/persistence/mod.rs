//! Persistence layer for jobs and units of work
//!
//! - [`EntityStore`]: conditional-update store contract
//! - [`InMemoryEntityStore`]: for tests and local runs
//! - [`PostgresEntityStore`]: durable storage, also serving resources and styles

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryEntityStore;
pub use postgres::PostgresEntityStore;
pub use store::{EntityStore, StoreError};
