//! Remediation guard and the automatic hard-reset safety policy.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

/// Deadline before which automatic hard resets are suppressed.
///
/// Stored as unix seconds; staleness only delays or advances a best-effort
/// policy by one refresh cycle, so a relaxed atomic is enough.
#[derive(Debug, Default)]
pub struct RemediationGuard {
    paused_until: AtomicI64,
}

impl RemediationGuard {
    /// Creates a guard that is not paused.
    pub fn new() -> Self {
        Self::default()
    }

    /// Suppresses automatic resets until `deadline`.
    pub fn pause_until(&self, deadline: DateTime<Utc>) {
        self.paused_until
            .store(deadline.timestamp(), Ordering::Relaxed);
    }

    /// Suppresses automatic resets for `window` from now. Returns the deadline.
    pub fn pause_for(&self, window: Duration) -> DateTime<Utc> {
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        let deadline = Utc::now()
            .checked_add_signed(window)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.pause_until(deadline);
        deadline
    }

    /// Lifts any pause.
    pub fn resume(&self) {
        self.paused_until.store(0, Ordering::Relaxed);
    }

    /// Current deadline, or `None` if never paused.
    pub fn paused_until(&self) -> Option<DateTime<Utc>> {
        match self.paused_until.load(Ordering::Relaxed) {
            0 => None,
            secs => Utc.timestamp_opt(secs, 0).single(),
        }
    }

    /// True while `now` has not yet passed the deadline.
    pub fn is_paused_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() <= self.paused_until.load(Ordering::Relaxed)
    }
}

/// Facts about an unknown-interface module gathered by the refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetCandidate {
    /// The bus detect capability reported the module present
    pub presence_confirmed: bool,
    /// Whether every port is down; `None` when no source can tell
    pub ports_down: Option<bool>,
}

/// Why an automatic reset was not issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotPresent,
    PortsActive,
    PortStateUnknown,
    RemediationPaused { until: Option<DateTime<Utc>> },
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotPresent => "presence not confirmed",
            SkipReason::PortsActive => "ports still up",
            SkipReason::PortStateUnknown => "port state unknown",
            SkipReason::RemediationPaused { .. } => "remediation paused",
        }
    }
}

/// Outcome of the reset-safety policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetDecision {
    Reset,
    Skip(SkipReason),
}

/// Decides whether an automatic hard reset is safe right now.
///
/// All three conditions must hold: presence confirmed, every port down, and
/// `now` past the remediation guard deadline.
pub fn evaluate(
    candidate: &ResetCandidate,
    guard: &RemediationGuard,
    now: DateTime<Utc>,
) -> ResetDecision {
    if !candidate.presence_confirmed {
        return ResetDecision::Skip(SkipReason::NotPresent);
    }
    match candidate.ports_down {
        None => return ResetDecision::Skip(SkipReason::PortStateUnknown),
        Some(false) => return ResetDecision::Skip(SkipReason::PortsActive),
        Some(true) => {}
    }
    if guard.is_paused_at(now) {
        return ResetDecision::Skip(SkipReason::RemediationPaused {
            until: guard.paused_until(),
        });
    }
    ResetDecision::Reset
}
