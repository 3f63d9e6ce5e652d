use crate::SessionError;

/// Where a peer is in bringing its world up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadPhase {
    Unloaded,
    LoadingFromDisk,
    AwaitingNetwork,
    VersionCheck,
    Reconciling,
    RuntimeIndexBuilt,
    PoolInitialized,
    Ready,
}

impl LoadPhase {
    pub fn can_transition_to(self, next: LoadPhase) -> bool {
        use LoadPhase::*;
        matches!(
            (self, next),
            (Unloaded, LoadingFromDisk)
                | (Unloaded, AwaitingNetwork)
                | (LoadingFromDisk, VersionCheck)
                | (AwaitingNetwork, VersionCheck)
                | (VersionCheck, Reconciling)
                | (VersionCheck, RuntimeIndexBuilt)
                | (Reconciling, RuntimeIndexBuilt)
                | (RuntimeIndexBuilt, PoolInitialized)
                | (PoolInitialized, Ready)
        )
    }
}

/// Checked walk through [`LoadPhase`]s, keeping the path taken.
#[derive(Debug, Clone)]
pub struct LoadTracker {
    phase: LoadPhase,
    history: Vec<LoadPhase>,
}

impl Default for LoadTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadTracker {
    pub fn new() -> Self {
        Self {
            phase: LoadPhase::Unloaded,
            history: vec![LoadPhase::Unloaded],
        }
    }

    pub fn phase(&self) -> LoadPhase {
        self.phase
    }

    pub fn history(&self) -> &[LoadPhase] {
        &self.history
    }

    pub fn is_ready(&self) -> bool {
        self.phase == LoadPhase::Ready
    }

    pub fn advance(&mut self, next: LoadPhase) -> Result<(), SessionError> {
        if !self.phase.can_transition_to(next) {
            return Err(SessionError::IllegalTransition {
                from: self.phase,
                to: next,
            });
        }
        tracing::info!(from = ?self.phase, to = ?next, "load phase");
        self.phase = next;
        self.history.push(next);
        Ok(())
    }
}
