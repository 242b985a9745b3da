pub mod backend;
pub mod config;
pub mod diff;
pub mod epp;
pub mod error;
pub mod keyset;
pub mod rest;
pub mod sync;

pub use backend::RegistryBackend;
pub use error::{RegistryError, Result};
pub use sync::{SyncOutcome, Synchronizer};
