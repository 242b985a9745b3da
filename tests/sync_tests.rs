//! Synchronizer behavior against a scripted in-memory backend

use async_trait::async_trait;
use ratatoskr::diff::UpdatePlan;
use ratatoskr::error::RegistryError;
use ratatoskr::keyset::{KeyRecord, KeySet, ZoneName};
use ratatoskr::{RegistryBackend, SyncOutcome, Synchronizer};

fn ksk(seed: u8) -> KeyRecord {
    KeyRecord::new(257, 3, 8, vec![seed; 16])
}

fn zsk(seed: u8) -> KeyRecord {
    KeyRecord::new(256, 3, 8, vec![seed; 16])
}

fn zone() -> ZoneName {
    ZoneName::parse("example.com.").unwrap()
}

/// Backend that records every call and mutates its registry state the way a
/// real registry would, so consecutive runs see each other's effects.
struct MockBackend {
    registry: Vec<KeyRecord>,
    precondition: bool,
    fail_open: bool,
    /// When set, additions fail after removals have been applied
    fail_additions: bool,
    calls: Vec<String>,
}

impl MockBackend {
    fn with_registry(registry: Vec<KeyRecord>) -> Self {
        Self {
            registry,
            precondition: true,
            fail_open: false,
            fail_additions: false,
            calls: Vec::new(),
        }
    }

    fn mutation_calls(&self) -> Vec<&String> {
        self.calls
            .iter()
            .filter(|c| c.starts_with("remove") || c.starts_with("add"))
            .collect()
    }
}

#[async_trait]
impl RegistryBackend for MockBackend {
    type Record = KeyRecord;

    async fn open(&mut self) -> Result<(), RegistryError> {
        self.calls.push("open".to_string());
        if self.fail_open {
            return Err(RegistryError::Authentication(
                "Login rejected".to_string(),
            ));
        }
        Ok(())
    }

    async fn precondition_ok(&mut self, _zone: &ZoneName) -> Result<bool, RegistryError> {
        self.calls.push("precondition".to_string());
        Ok(self.precondition)
    }

    fn desired_records(&self, _zone: &ZoneName, desired: &KeySet) -> Vec<KeyRecord> {
        desired.sep_only().into_iter().collect()
    }

    async fn fetch_current_keys(&mut self, _zone: &ZoneName) -> Result<Vec<KeyRecord>, RegistryError> {
        self.calls.push("fetch".to_string());
        Ok(self.registry.clone())
    }

    async fn apply_plan(
        &mut self,
        zone: &ZoneName,
        plan: &UpdatePlan<KeyRecord>,
    ) -> Result<(), RegistryError> {
        let mut removed = 0usize;
        for key in &plan.to_remove {
            self.calls.push(format!("remove:{}", key.public_key[0]));
            self.registry.retain(|k| k != key);
            removed += 1;
        }
        let mut added = 0usize;
        for key in &plan.to_add {
            if self.fail_additions {
                let cause = RegistryError::Rejected {
                    zone: zone.as_registry_str(),
                    operation: "add".to_string(),
                    code: "2400".to_string(),
                    message: "Command failed".to_string(),
                    detail: String::new(),
                };
                return Err(if removed == 0 && added == 0 {
                    cause
                } else {
                    RegistryError::PartiallyApplied {
                        zone: zone.as_registry_str(),
                        removed,
                        added,
                        cause: Box::new(cause),
                    }
                });
            }
            self.calls.push(format!("add:{}", key.public_key[0]));
            self.registry.push(key.clone());
            added += 1;
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.calls.push("close".to_string());
    }
}

async fn synchronize(backend: MockBackend, desired: &KeySet) -> (Result<SyncOutcome, RegistryError>, MockBackend) {
    let mut sync = Synchronizer::new(backend);
    let outcome = sync.synchronize(&zone(), desired).await;
    (outcome, sync.into_inner())
}

#[tokio::test]
async fn test_converged_registry_gets_no_mutating_calls() {
    let desired: KeySet = [ksk(1), ksk(2)].into_iter().collect();
    let backend = MockBackend::with_registry(vec![ksk(1), ksk(2)]);

    let (outcome, backend) = synchronize(backend, &desired).await;
    assert_eq!(outcome.unwrap(), SyncOutcome::AlreadyInSync);
    assert!(backend.mutation_calls().is_empty());
}

#[tokio::test]
async fn test_scenario_single_addition() {
    // current {K1}, desired {K1, K2}: one add, no removes
    let desired: KeySet = [ksk(1), ksk(2)].into_iter().collect();
    let backend = MockBackend::with_registry(vec![ksk(1)]);

    let (outcome, backend) = synchronize(backend, &desired).await;
    assert_eq!(outcome.unwrap(), SyncOutcome::Updated { removed: 0, added: 1 });
    assert_eq!(backend.mutation_calls(), vec!["add:2"]);
}

#[tokio::test]
async fn test_removals_strictly_before_additions() {
    // current {K1, K2}, desired {K2, K3}
    let desired: KeySet = [ksk(2), ksk(3)].into_iter().collect();
    let backend = MockBackend::with_registry(vec![ksk(1), ksk(2)]);

    let (outcome, backend) = synchronize(backend, &desired).await;
    assert_eq!(outcome.unwrap(), SyncOutcome::Updated { removed: 1, added: 1 });
    assert_eq!(backend.mutation_calls(), vec!["remove:1", "add:3"]);
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let desired: KeySet = [ksk(1), ksk(2)].into_iter().collect();
    let backend = MockBackend::with_registry(vec![ksk(1)]);

    let (outcome, mut backend) = synchronize(backend, &desired).await;
    assert_eq!(outcome.unwrap(), SyncOutcome::Updated { removed: 0, added: 1 });

    backend.calls.clear();
    let (outcome, backend) = synchronize(backend, &desired).await;
    assert_eq!(outcome.unwrap(), SyncOutcome::AlreadyInSync);
    assert!(backend.mutation_calls().is_empty());
}

#[tokio::test]
async fn test_precondition_gates_everything() {
    let desired: KeySet = [ksk(1)].into_iter().collect();
    let mut backend = MockBackend::with_registry(vec![]);
    backend.precondition = false;

    let (outcome, backend) = synchronize(backend, &desired).await;
    match outcome {
        Err(RegistryError::PreconditionFailed { zone, .. }) => {
            assert_eq!(zone, "example.com");
        }
        other => panic!("Expected PreconditionFailed, got {other:?}"),
    }
    assert!(!backend.calls.contains(&"fetch".to_string()));
    assert!(backend.mutation_calls().is_empty());
    // the backend is still torn down
    assert!(backend.calls.contains(&"close".to_string()));
}

#[tokio::test]
async fn test_non_sep_keys_never_reach_the_registry() {
    let desired: KeySet = [ksk(1), zsk(9)].into_iter().collect();
    let backend = MockBackend::with_registry(vec![ksk(1)]);

    let (outcome, backend) = synchronize(backend, &desired).await;
    assert_eq!(outcome.unwrap(), SyncOutcome::AlreadyInSync);
    assert!(backend.mutation_calls().is_empty());
}

#[tokio::test]
async fn test_partial_application_reported_and_recoverable() {
    // current {K1}, desired {K2}: the removal lands, the addition fails
    let desired: KeySet = [ksk(2)].into_iter().collect();
    let mut backend = MockBackend::with_registry(vec![ksk(1)]);
    backend.fail_additions = true;

    let (outcome, mut backend) = synchronize(backend, &desired).await;
    match outcome {
        Err(RegistryError::PartiallyApplied { removed, added, .. }) => {
            assert_eq!(removed, 1);
            assert_eq!(added, 0);
        }
        other => panic!("Expected PartiallyApplied, got {other:?}"),
    }
    assert!(backend.calls.contains(&"close".to_string()));

    // the registry is in a known intermediate state; a later run converges
    backend.fail_additions = false;
    backend.calls.clear();
    let (outcome, backend) = synchronize(backend, &desired).await;
    assert_eq!(outcome.unwrap(), SyncOutcome::Updated { removed: 0, added: 1 });
    assert_eq!(backend.registry, vec![ksk(2)]);
}

#[tokio::test]
async fn test_failed_open_still_tears_down_the_backend() {
    let desired: KeySet = [ksk(1)].into_iter().collect();
    let mut backend = MockBackend::with_registry(vec![]);
    backend.fail_open = true;

    let (outcome, backend) = synchronize(backend, &desired).await;
    match outcome {
        Err(RegistryError::Authentication(_)) => {}
        other => panic!("Expected Authentication, got {other:?}"),
    }
    assert!(!backend.calls.contains(&"fetch".to_string()));
    assert!(backend.mutation_calls().is_empty());
    assert_eq!(backend.calls.last().map(String::as_str), Some("close"));
}

#[tokio::test]
async fn test_backend_rejection_propagates_unchanged() {
    // failure on the very first mutating call is not "partial"
    let desired: KeySet = [ksk(2)].into_iter().collect();
    let mut backend = MockBackend::with_registry(vec![]);
    backend.fail_additions = true;

    let (outcome, _backend) = synchronize(backend, &desired).await;
    match outcome {
        Err(RegistryError::Rejected { code, .. }) => assert_eq!(code, "2400"),
        other => panic!("Expected Rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn test_emptying_the_registry() {
    // desired set empty: everything is removed, nothing added
    let desired = KeySet::new();
    let backend = MockBackend::with_registry(vec![ksk(1), ksk(2)]);

    let (outcome, backend) = synchronize(backend, &desired).await;
    assert_eq!(outcome.unwrap(), SyncOutcome::Updated { removed: 2, added: 0 });
    assert!(backend.registry.is_empty());
}
