//! The registry backend capability set
//!
//! Registries differ in wire protocol and in what they store (the EPP
//! registry keeps DNSKEY material, the REST registry keeps derived DS
//! records), but the synchronization logic is identical. The trait pins the
//! record type as an associated type so one diff and one synchronizer serve
//! every backend; adding a registry means adding an implementation, not a
//! runtime lookup.

use std::fmt::Debug;

use async_trait::async_trait;

use crate::diff::UpdatePlan;
use crate::error::Result;
use crate::keyset::{KeySet, ZoneName};

#[async_trait]
pub trait RegistryBackend {
    /// The record type this registry publishes for a zone
    type Record: PartialEq + Clone + Debug + Send + Sync;

    /// Establish whatever handle the registry needs (EPP session plus
    /// login; nothing for a stateless API).
    async fn open(&mut self) -> Result<()>;

    /// Whether the registry is in a state where pushing changes for `zone`
    /// is safe. Backends without such a notion return true; a backend that
    /// cannot determine the answer must return false rather than proceed.
    async fn precondition_ok(&mut self, _zone: &ZoneName) -> Result<bool> {
        Ok(true)
    }

    /// Project the signer's desired key set into this registry's record
    /// type. This is where SEP filtering and DS derivation happen, never in
    /// the diff.
    fn desired_records(&self, zone: &ZoneName, desired: &KeySet) -> Vec<Self::Record>;

    /// The records the registry currently publishes for `zone`
    async fn fetch_current_keys(&mut self, zone: &ZoneName) -> Result<Vec<Self::Record>>;

    /// Apply a non-empty plan, removals strictly before additions. Callers
    /// guarantee the plan is non-empty; a partially applied plan must be
    /// reported as `RegistryError::PartiallyApplied`.
    async fn apply_plan(&mut self, zone: &ZoneName, plan: &UpdatePlan<Self::Record>) -> Result<()>;

    /// Tear the handle down, best-effort. Never fails; backends log what
    /// they could not clean up.
    async fn close(&mut self);
}
