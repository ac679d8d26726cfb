use meta_core::{CoreError, CoreResult};
use std::collections::HashMap;
use std::time::Duration;

/// The Provider FSM's states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderState {
    Idle,
    Acquiring,
    Running,
    Paused,
    WaitingQuota,
    WaitingBackoff,
    Terminated,
}

impl ProviderState {
    pub fn tag(&self) -> &'static str {
        match self {
            ProviderState::Idle => "IDLE",
            ProviderState::Acquiring => "ACQUIRING",
            ProviderState::Running => "RUNNING",
            ProviderState::Paused => "PAUSED",
            ProviderState::WaitingQuota => "WAITING_QUOTA",
            ProviderState::WaitingBackoff => "WAITING_BACKOFF",
            ProviderState::Terminated => "TERMINATED",
        }
    }

    pub fn parse(tag: &str) -> CoreResult<Self> {
        match tag {
            "IDLE" => Ok(ProviderState::Idle),
            "ACQUIRING" => Ok(ProviderState::Acquiring),
            "RUNNING" => Ok(ProviderState::Running),
            "PAUSED" => Ok(ProviderState::Paused),
            "WAITING_QUOTA" => Ok(ProviderState::WaitingQuota),
            "WAITING_BACKOFF" => Ok(ProviderState::WaitingBackoff),
            "TERMINATED" => Ok(ProviderState::Terminated),
            other => Err(CoreError::internal(format!("unrecognized persisted provider state: {other}"))),
        }
    }
}

/// Events that drive Provider FSM transitions. `BackoffElapsed` is the
/// "Admitted (timer)" case for `WAITING_BACKOFF`, split out since it
/// carries no permit count.
#[derive(Debug, Clone, Copy)]
pub enum Trigger {
    Start,
    Admitted { granted: u32 },
    ExecOk,
    ExecErr { transient: bool },
    Pause,
    Resume,
    QuotaRevoked { remaining_after: u32 },
    QuotaGranted { granted: u32 },
    Stop,
    Complete,
    BackoffElapsed,
}

/// Pure transition function. An unrepresented `(state, trigger)` pair is
/// rejected with `InvalidTransition`; the state must not change.
pub fn transition(state: ProviderState, trigger: Trigger) -> CoreResult<ProviderState> {
    use ProviderState::*;
    use Trigger::*;

    let next = match (state, trigger) {
        (Idle, Start) => Acquiring,
        (Idle, Stop) => Terminated,

        (Acquiring, Admitted { granted }) => if granted > 0 { Running } else { WaitingQuota },
        (Acquiring, ExecErr { transient: true }) => WaitingBackoff,
        (Acquiring, ExecErr { transient: false }) => Terminated,
        (Acquiring, Pause) => Paused,
        (Acquiring, QuotaRevoked { .. }) => WaitingQuota,
        (Acquiring, Stop) => Terminated,

        (Running, ExecOk) => Running,
        (Running, ExecErr { transient: true }) => WaitingBackoff,
        (Running, ExecErr { transient: false }) => Terminated,
        (Running, Pause) => Paused,
        (Running, QuotaRevoked { remaining_after }) => if remaining_after == 0 { WaitingQuota } else { Running },
        (Running, QuotaGranted { .. }) => Running,
        (Running, Stop) => Terminated,
        (Running, Complete) => Terminated,

        (Paused, Resume) => Acquiring,
        (Paused, Stop) => Terminated,

        (WaitingQuota, Admitted { granted }) => if granted > 0 { Running } else { WaitingQuota },
        (WaitingQuota, Pause) => Paused,
        (WaitingQuota, QuotaGranted { .. }) => Running,
        (WaitingQuota, Stop) => Terminated,

        (WaitingBackoff, BackoffElapsed) => Acquiring,
        (WaitingBackoff, Pause) => Paused,
        (WaitingBackoff, Stop) => Terminated,

        (from, _) => {
            return Err(CoreError::invalid_transition(format!(
                "provider cannot handle this trigger while {}",
                from.tag()
            )))
        }
    };
    Ok(next)
}

/// Outcome of recording one batch's processed/error counts against the
/// auto-pause threshold.
#[derive(Debug, Clone, PartialEq)]
pub enum AutoPauseOutcome {
    Continue,
    Paused { reason: String },
}

/// Per-provider tunables (`UpdatePerformancePolicy`).
#[derive(Debug, Clone)]
pub struct PerformancePolicy {
    pub batch_size: u32,
    pub checkpoint_interval: u32,
    pub failure_threshold: f64,
}

impl Default for PerformancePolicy {
    fn default() -> Self {
        PerformancePolicy {
            batch_size: 100,
            checkpoint_interval: 100,
            failure_threshold: 0.10,
        }
    }
}

/// Backoff schedule: `base_delay * 2^attempt`, capped.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            base_delay: Duration::from_secs(1),
            cap: Duration::from_secs(300),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        self.base_delay
            .checked_mul(factor as u32)
            .unwrap_or(self.cap)
            .min(self.cap)
    }
}

/// A provider's live state plus the counters and policy knobs the FSM and
/// Permit Executor act on.
#[derive(Debug, Clone)]
pub struct ProviderFsm {
    pub provider_id: String,
    pub kind: String,
    pub dependencies: Vec<String>,
    pub state: ProviderState,
    pub permits_held: u32,
    pub total_processed: u64,
    pub error_count: u64,
    pub last_checkpoint_urn: Option<String>,
    pub policy: PerformancePolicy,
    pub backoff: BackoffPolicy,
    pub backoff_attempt: u32,
    /// The permit count a fresh `StartProvider`/a backoff-driven retry asks
    /// for when no caller-supplied count applies.
    pub default_permits: u32,
}

impl ProviderFsm {
    pub fn new(provider_id: impl Into<String>, kind: impl Into<String>, dependencies: Vec<String>) -> Self {
        ProviderFsm {
            provider_id: provider_id.into(),
            kind: kind.into(),
            dependencies,
            state: ProviderState::Idle,
            permits_held: 0,
            total_processed: 0,
            error_count: 0,
            last_checkpoint_urn: None,
            policy: PerformancePolicy::default(),
            backoff: BackoffPolicy::default(),
            backoff_attempt: 0,
            default_permits: 1,
        }
    }

    pub fn with_default_permits(mut self, default_permits: u32) -> Self {
        self.default_permits = default_permits;
        self
    }

    /// A provider with a non-empty dependency list cannot leave IDLE until
    /// every listed dependency terminated successfully.
    pub fn dependencies_satisfied(&self, terminal_success: &HashMap<String, bool>) -> bool {
        self.dependencies.iter().all(|dep| terminal_success.get(dep).copied().unwrap_or(false))
    }

    pub fn apply(&mut self, trigger: Trigger) -> CoreResult<ProviderState> {
        let next = transition(self.state, trigger)?;
        match trigger {
            Trigger::Start | Trigger::Resume => self.backoff_attempt = 0,
            Trigger::ExecErr { transient: true } if next == ProviderState::WaitingBackoff => {
                self.backoff_attempt += 1;
            }
            _ => {}
        }
        self.state = next;
        Ok(next)
    }

    /// Record one batch's outcome against the running totals and evaluate
    /// the auto-pause threshold. Call after every batch, while still
    /// `RUNNING`/`ACQUIRING`, before returning to the caller.
    pub fn record_batch(&mut self, processed: u64, errors: u64) -> AutoPauseOutcome {
        self.total_processed += processed;
        self.error_count += errors;
        if self.total_processed > 0 && (self.error_count as f64 / self.total_processed as f64) > self.policy.failure_threshold {
            AutoPauseOutcome::Paused {
                reason: "error-rate-exceeded".to_string(),
            }
        } else {
            AutoPauseOutcome::Continue
        }
    }

    pub fn record_checkpoint(&mut self, urn: impl Into<String>) {
        self.last_checkpoint_urn = Some(urn.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_start_moves_to_acquiring() {
        assert_eq!(transition(ProviderState::Idle, Trigger::Start).unwrap(), ProviderState::Acquiring);
    }

    #[test]
    fn acquiring_with_zero_permits_waits_on_quota() {
        assert_eq!(
            transition(ProviderState::Acquiring, Trigger::Admitted { granted: 0 }).unwrap(),
            ProviderState::WaitingQuota
        );
    }

    #[test]
    fn acquiring_with_permits_runs() {
        assert_eq!(
            transition(ProviderState::Acquiring, Trigger::Admitted { granted: 5 }).unwrap(),
            ProviderState::Running
        );
    }

    #[test]
    fn transient_exec_err_goes_to_backoff_non_transient_terminates() {
        assert_eq!(
            transition(ProviderState::Running, Trigger::ExecErr { transient: true }).unwrap(),
            ProviderState::WaitingBackoff
        );
        assert_eq!(
            transition(ProviderState::Running, Trigger::ExecErr { transient: false }).unwrap(),
            ProviderState::Terminated
        );
    }

    #[test]
    fn running_quota_revoked_to_zero_waits_on_quota() {
        assert_eq!(
            transition(ProviderState::Running, Trigger::QuotaRevoked { remaining_after: 0 }).unwrap(),
            ProviderState::WaitingQuota
        );
    }

    #[test]
    fn running_quota_revoked_partial_stays_running() {
        assert_eq!(
            transition(ProviderState::Running, Trigger::QuotaRevoked { remaining_after: 2 }).unwrap(),
            ProviderState::Running
        );
    }

    #[test]
    fn terminated_rejects_every_trigger() {
        let err = transition(ProviderState::Terminated, Trigger::Start).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition(_)));
    }

    #[test]
    fn unrepresented_cell_is_rejected_and_does_not_panic() {
        let err = transition(ProviderState::Idle, Trigger::ExecOk).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition(_)));
    }

    #[test]
    fn auto_pause_fires_once_error_ratio_exceeds_threshold() {
        let mut fsm = ProviderFsm::new("cve", "cve", vec![]);
        let outcome = fsm.record_batch(20, 0);
        assert_eq!(outcome, AutoPauseOutcome::Continue);
        let outcome = fsm.record_batch(40, 40);
        assert_eq!(
            outcome,
            AutoPauseOutcome::Paused {
                reason: "error-rate-exceeded".to_string()
            }
        );
        assert_eq!(fsm.total_processed, 60);
        assert_eq!(fsm.error_count, 40);
    }

    #[test]
    fn dependencies_must_all_succeed_before_leaving_idle() {
        let fsm = ProviderFsm::new("capec", "capec", vec!["cwe".to_string(), "attack".to_string()]);
        let mut success = HashMap::new();
        success.insert("cwe".to_string(), true);
        assert!(!fsm.dependencies_satisfied(&success));
        success.insert("attack".to_string(), true);
        assert!(fsm.dependencies_satisfied(&success));
    }

    #[test]
    fn backoff_delay_doubles_and_caps() {
        let policy = BackoffPolicy {
            base_delay: Duration::from_secs(1),
            cap: Duration::from_secs(10),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(10));
    }

    #[test]
    fn state_tag_round_trips() {
        for state in [
            ProviderState::Idle,
            ProviderState::Acquiring,
            ProviderState::Running,
            ProviderState::Paused,
            ProviderState::WaitingQuota,
            ProviderState::WaitingBackoff,
            ProviderState::Terminated,
        ] {
            assert_eq!(ProviderState::parse(state.tag()).unwrap(), state);
        }
    }
}
