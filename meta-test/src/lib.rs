//! Shared test doubles for end-to-end scenarios: a fake quota source, an
//! in-memory checkpoint store, and a connected pair of in-memory
//! transports.

mod fake_quota;
mod memory_store;
mod transport_pair;

pub use fake_quota::ScriptedQuotaSource;
pub use memory_store::InMemoryCheckpointStore;
pub use transport_pair::{paired_transports, TransportPair};
