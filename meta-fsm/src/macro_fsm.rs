use meta_core::{CoreError, CoreResult};

/// The Macro FSM's lifecycle phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroState {
    Bootstrapping,
    Orchestrating,
    Stabilizing,
    Draining,
    Terminated,
}

impl MacroState {
    pub fn tag(&self) -> &'static str {
        match self {
            MacroState::Bootstrapping => "BOOTSTRAPPING",
            MacroState::Orchestrating => "ORCHESTRATING",
            MacroState::Stabilizing => "STABILIZING",
            MacroState::Draining => "DRAINING",
            MacroState::Terminated => "TERMINATED",
        }
    }
}

/// Owns the lifecycle phase shared by every registered provider. The
/// provider registry itself lives in the `meta` binary crate's `Core`, not
/// here — this type only tracks the phase and the threshold that moves it.
#[derive(Debug, Clone)]
pub struct MacroFsm {
    state: MacroState,
    /// Fraction of providers in PAUSED/WAITING_QUOTA that triggers STABILIZING.
    pub stabilize_threshold: f64,
}

impl MacroFsm {
    pub fn new() -> Self {
        MacroFsm {
            state: MacroState::Bootstrapping,
            stabilize_threshold: 0.5,
        }
    }

    pub fn state(&self) -> MacroState {
        self.state
    }

    /// Leave BOOTSTRAPPING once registration and the Recovery Manager's pass
    /// have completed.
    pub fn finish_bootstrapping(&mut self) -> CoreResult<()> {
        if self.state != MacroState::Bootstrapping {
            return Err(CoreError::invalid_transition("bootstrapping has already finished"));
        }
        self.state = MacroState::Orchestrating;
        Ok(())
    }

    /// Recompute whether the orchestrator should be STABILIZING, given the
    /// current count of unsettled (PAUSED/WAITING_QUOTA) providers out of
    /// the total registered. No-ops outside ORCHESTRATING/STABILIZING.
    pub fn observe_provider_mix(&mut self, unsettled: usize, total: usize) {
        if !matches!(self.state, MacroState::Orchestrating | MacroState::Stabilizing) || total == 0 {
            return;
        }
        let ratio = unsettled as f64 / total as f64;
        self.state = if ratio > self.stabilize_threshold {
            MacroState::Stabilizing
        } else {
            MacroState::Orchestrating
        };
    }

    /// `StartProvider` and friends are rejected in STABILIZING and DRAINING.
    pub fn accepts_new_starts(&self) -> bool {
        matches!(self.state, MacroState::Orchestrating)
    }

    pub fn begin_draining(&mut self) -> CoreResult<()> {
        if matches!(self.state, MacroState::Terminated) {
            return Err(CoreError::invalid_transition("already terminated"));
        }
        self.state = MacroState::Draining;
        Ok(())
    }

    pub fn finish_draining(&mut self) -> CoreResult<()> {
        if self.state != MacroState::Draining {
            return Err(CoreError::invalid_transition("not draining"));
        }
        self.state = MacroState::Terminated;
        Ok(())
    }
}

impl Default for MacroFsm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrapping_moves_to_orchestrating_exactly_once() {
        let mut fsm = MacroFsm::new();
        fsm.finish_bootstrapping().unwrap();
        assert_eq!(fsm.state(), MacroState::Orchestrating);
        assert!(fsm.finish_bootstrapping().is_err());
    }

    #[test]
    fn high_unsettled_ratio_enters_stabilizing_and_blocks_new_starts() {
        let mut fsm = MacroFsm::new();
        fsm.finish_bootstrapping().unwrap();
        fsm.observe_provider_mix(6, 10);
        assert_eq!(fsm.state(), MacroState::Stabilizing);
        assert!(!fsm.accepts_new_starts());
    }

    #[test]
    fn recovering_providers_return_to_orchestrating() {
        let mut fsm = MacroFsm::new();
        fsm.finish_bootstrapping().unwrap();
        fsm.observe_provider_mix(6, 10);
        fsm.observe_provider_mix(1, 10);
        assert_eq!(fsm.state(), MacroState::Orchestrating);
        assert!(fsm.accepts_new_starts());
    }

    #[test]
    fn draining_then_terminated() {
        let mut fsm = MacroFsm::new();
        fsm.finish_bootstrapping().unwrap();
        fsm.begin_draining().unwrap();
        assert!(!fsm.accepts_new_starts());
        fsm.finish_draining().unwrap();
        assert_eq!(fsm.state(), MacroState::Terminated);
    }
}
