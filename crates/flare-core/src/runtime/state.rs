//! Specialization lifecycle.
//!
//! A serving process starts generic and becomes specialized exactly once.
//! The slot serializes that transition: concurrent specialize calls see
//! distinct in-progress and already-done errors, and invocation is cheap
//! under contention because the lock is held only long enough to clone the
//! artifact handle.

use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::runtime::invoke::{Artifact, InvokeRequest, InvokeResponse};

enum Phase {
    Generic,
    Specializing,
    Specialized(Arc<dyn Artifact>),
}

/// Holds the process's one specialization.
pub struct SpecializationSlot {
    phase: Mutex<Phase>,
}

impl Default for SpecializationSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl SpecializationSlot {
    pub fn new() -> Self {
        Self {
            phase: Mutex::new(Phase::Generic),
        }
    }

    /// Run `load` to produce the artifact and commit it.
    ///
    /// Exactly one caller wins: a second call during the load gets
    /// [`Error::SpecializeInProgress`], a call after a successful commit
    /// gets [`Error::AlreadySpecialized`]. A failed load reverts the slot
    /// to generic so specialization can be retried; a load that panics
    /// reverts the same way instead of wedging the slot in the in-progress
    /// state.
    pub fn specialize(&self, load: impl FnOnce() -> Result<Arc<dyn Artifact>>) -> Result<()> {
        {
            let mut phase = self.phase.lock().expect("specialization slot poisoned");
            match *phase {
                Phase::Generic => *phase = Phase::Specializing,
                Phase::Specializing => return Err(Error::SpecializeInProgress),
                Phase::Specialized(_) => return Err(Error::AlreadySpecialized),
            }
        }

        // The lock is released while loading; compilation and library
        // resolution can take a while and invokes must keep failing fast.
        // The guard covers an unwinding load: unless the transition below
        // commits, the slot goes back to generic.
        let mut revert = RevertOnDrop {
            phase: &self.phase,
            armed: true,
        };
        let outcome = load();

        let mut phase = self.phase.lock().expect("specialization slot poisoned");
        revert.armed = false;
        match outcome {
            Ok(artifact) => {
                *phase = Phase::Specialized(artifact);
                tracing::info!("specialization committed");
                Ok(())
            }
            Err(e) => {
                *phase = Phase::Generic;
                tracing::warn!("specialization failed, reverting to generic: {}", e);
                Err(e)
            }
        }
    }

    /// Dispatch one request to the specialized artifact.
    pub fn invoke(&self, request: &InvokeRequest) -> Result<InvokeResponse> {
        let artifact = {
            let phase = self.phase.lock().expect("specialization slot poisoned");
            match &*phase {
                Phase::Specialized(artifact) => artifact.clone(),
                Phase::Generic | Phase::Specializing => return Err(Error::NotSpecialized),
            }
        };
        artifact.invoke(request)
    }

    pub fn is_specialized(&self) -> bool {
        matches!(
            &*self.phase.lock().expect("specialization slot poisoned"),
            Phase::Specialized(_)
        )
    }
}

/// Restores the generic phase unless the transition committed.
struct RevertOnDrop<'a> {
    phase: &'a Mutex<Phase>,
    armed: bool,
}

impl Drop for RevertOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Ok(mut phase) = self.phase.lock() {
                tracing::warn!("specialization did not complete, reverting to generic");
                *phase = Phase::Generic;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    use super::*;

    struct EchoArtifact;

    impl Artifact for EchoArtifact {
        fn invoke(&self, request: &InvokeRequest) -> Result<InvokeResponse> {
            Ok(InvokeResponse {
                status: 200,
                headers: Default::default(),
                body: request.body.clone(),
            })
        }
    }

    #[test]
    fn test_invoke_before_specialize_fails() {
        let slot = SpecializationSlot::new();
        let err = slot.invoke(&InvokeRequest::default()).unwrap_err();
        assert!(matches!(err, Error::NotSpecialized));
    }

    #[test]
    fn test_specialize_then_invoke() {
        let slot = SpecializationSlot::new();
        slot.specialize(|| Ok(Arc::new(EchoArtifact) as Arc<dyn Artifact>))
            .unwrap();
        assert!(slot.is_specialized());

        let request = InvokeRequest {
            body: "ping".to_string(),
            ..Default::default()
        };
        let response = slot.invoke(&request).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "ping");
    }

    #[test]
    fn test_second_specialize_rejected() {
        let slot = SpecializationSlot::new();
        slot.specialize(|| Ok(Arc::new(EchoArtifact) as Arc<dyn Artifact>))
            .unwrap();

        let err = slot
            .specialize(|| Ok(Arc::new(EchoArtifact) as Arc<dyn Artifact>))
            .unwrap_err();
        assert!(matches!(err, Error::AlreadySpecialized));
    }

    #[test]
    fn test_failed_specialize_reverts_to_generic() {
        let slot = SpecializationSlot::new();
        let err = slot
            .specialize(|| Err(Error::Load("boom".to_string())))
            .unwrap_err();
        assert!(matches!(err, Error::Load(_)));
        assert!(!slot.is_specialized());

        // A retry after failure succeeds.
        slot.specialize(|| Ok(Arc::new(EchoArtifact) as Arc<dyn Artifact>))
            .unwrap();
        assert!(slot.is_specialized());
    }

    #[test]
    fn test_panicking_load_reverts_to_generic() {
        let slot = Arc::new(SpecializationSlot::new());

        let panicking = slot.clone();
        let result = std::thread::spawn(move || {
            panicking.specialize(|| -> Result<Arc<dyn Artifact>> { panic!("load blew up") })
        })
        .join();
        assert!(result.is_err());

        // The slot is not wedged in the in-progress state.
        assert!(!slot.is_specialized());
        slot.specialize(|| Ok(Arc::new(EchoArtifact) as Arc<dyn Artifact>))
            .unwrap();
        assert!(slot.is_specialized());
    }

    #[test]
    fn test_specialize_during_load_sees_in_progress() {
        let slot = Arc::new(SpecializationSlot::new());
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let loader_slot = slot.clone();
        let loader = std::thread::spawn(move || {
            loader_slot.specialize(move || {
                entered_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                Ok(Arc::new(EchoArtifact) as Arc<dyn Artifact>)
            })
        });

        // Wait until the first specialize is mid-load, then race it.
        entered_rx.recv().unwrap();
        let err = slot
            .specialize(|| Ok(Arc::new(EchoArtifact) as Arc<dyn Artifact>))
            .unwrap_err();
        assert!(matches!(err, Error::SpecializeInProgress));

        // Invokes during the load fail fast rather than block.
        let err = slot.invoke(&InvokeRequest::default()).unwrap_err();
        assert!(matches!(err, Error::NotSpecialized));

        release_tx.send(()).unwrap();
        loader.join().unwrap().unwrap();
        assert!(slot.is_specialized());
    }

    #[test]
    fn test_concurrent_specialize_exactly_one_wins() {
        let slot = Arc::new(SpecializationSlot::new());
        let wins = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let slot = slot.clone();
                let wins = wins.clone();
                std::thread::spawn(move || {
                    if slot
                        .specialize(|| Ok(Arc::new(EchoArtifact) as Arc<dyn Artifact>))
                        .is_ok()
                    {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert!(slot.is_specialized());
    }
}
