//! Zone synchronization orchestration
//!
//! `synchronize` is the one entry point collaborators call: given a zone and
//! the signer's desired key set, converge whatever the registry currently
//! publishes to it. The sequence is fixed: gate on the backend precondition,
//! fetch, diff, apply, and always tear the backend down afterwards. A run
//! against an already-converged registry computes an empty plan and issues
//! no mutating call, which is what makes duplicate invocations and
//! crash-recovery reruns safe.

use tracing::debug;

use crate::backend::RegistryBackend;
use crate::diff::diff;
use crate::error::{RegistryError, Result};
use crate::keyset::{KeySet, ZoneName};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The registry already publishes the desired set; nothing was sent
    AlreadyInSync,
    /// The plan was applied in full
    Updated { removed: usize, added: usize },
}

pub struct Synchronizer<B> {
    backend: B,
}

impl<B: RegistryBackend + Send> Synchronizer<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Converge the registry's published key material for `zone` to
    /// `desired`. Backend errors propagate unchanged in kind; the backend
    /// is closed (logout attempted, best-effort) on every path.
    pub async fn synchronize(&mut self, zone: &ZoneName, desired: &KeySet) -> Result<SyncOutcome> {
        let outcome = match self.backend.open().await {
            Ok(()) => self.run(zone, desired).await,
            Err(e) => Err(e),
        };
        self.backend.close().await;
        outcome
    }

    async fn run(&mut self, zone: &ZoneName, desired: &KeySet) -> Result<SyncOutcome> {
        if !self.backend.precondition_ok(zone).await? {
            return Err(RegistryError::PreconditionFailed {
                zone: zone.as_registry_str(),
                reason: "registry is not ready to accept key changes".to_string(),
            });
        }

        let current = self.backend.fetch_current_keys(zone).await?;
        let wanted = self.backend.desired_records(zone, desired);
        let plan = diff(&current, &wanted);

        if plan.is_empty() {
            debug!("{zone} already in sync ({} record(s))", current.len());
            return Ok(SyncOutcome::AlreadyInSync);
        }

        let removed = plan.to_remove.len();
        let added = plan.to_add.len();
        self.backend.apply_plan(zone, &plan).await?;
        Ok(SyncOutcome::Updated { removed, added })
    }

    pub fn into_inner(self) -> B {
        self.backend
    }
}
