//! Serialized persistence of per-origin records

pub mod mutation;

pub use mutation::{MutationHandle, MutationQueue, Mutator, PersistenceError};
