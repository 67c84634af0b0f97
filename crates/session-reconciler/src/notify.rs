//! User-facing notifications emitted by the engine.
//!
//! The engine emits notifications; the sink decides how to show them.
//! Each kind fires at most once while its condition persists and re-arms
//! once the condition clears.

use parking_lot::Mutex;
use tracing::warn;

/// Why a stored credential failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationFailure {
    /// The backend reported the credential as invalid.
    Rejected,
    /// The verification call itself failed.
    Unavailable,
}

/// A notification for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The stored credential could not be verified and was cleared.
    VerificationFailed { reason: VerificationFailure },
    /// Consent items must be accepted before the session can be used.
    ConsentRequired { pending_count: usize },
    /// The consent lookup failed; access is allowed anyway.
    SetupIncomplete,
}

/// Discriminant used for once-per-condition latching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    VerificationFailed,
    ConsentRequired,
    SetupIncomplete,
}

impl Notification {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Notification::VerificationFailed { .. } => NotificationKind::VerificationFailed,
            Notification::ConsentRequired { .. } => NotificationKind::ConsentRequired,
            Notification::SetupIncomplete => NotificationKind::SetupIncomplete,
        }
    }

    /// Human-readable message for display.
    pub fn message(&self) -> &'static str {
        match self {
            Notification::VerificationFailed {
                reason: VerificationFailure::Rejected,
            } => "Your previous session is no longer valid. Starting a new one.",
            Notification::VerificationFailed {
                reason: VerificationFailure::Unavailable,
            } => "Your session could not be verified. Starting a new one.",
            Notification::ConsentRequired { .. } => {
                "Please accept the Terms of Service to continue."
            }
            Notification::SetupIncomplete => {
                "Unexpected error setting up your account. Some features may be unavailable."
            }
        }
    }
}

/// A sink that receives notifications from the engine.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// A no-op sink that discards all notifications.
#[derive(Debug, Default)]
pub struct NullNotifier;

impl NotificationSink for NullNotifier {
    fn notify(&self, _notification: Notification) {}
}

/// A sink that logs every notification at warn level.
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn notify(&self, notification: Notification) {
        warn!(kind = ?notification.kind(), "{}", notification.message());
    }
}

/// A sink that records all notifications for testing.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all recorded notifications.
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().clone()
    }

    /// Number of recorded notifications of `kind`.
    pub fn count(&self, kind: NotificationKind) -> usize {
        self.notifications
            .lock()
            .iter()
            .filter(|n| n.kind() == kind)
            .count()
    }

    pub fn clear(&self) {
        self.notifications.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.notifications.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.notifications.lock().push(notification);
    }
}

/// Tracks which notification kinds have fired for the current condition.
#[derive(Debug, Default, Clone)]
pub(crate) struct NotificationLatches {
    verification_failed: bool,
    consent_required: bool,
    setup_incomplete: bool,
}

impl NotificationLatches {
    fn slot(&mut self, kind: NotificationKind) -> &mut bool {
        match kind {
            NotificationKind::VerificationFailed => &mut self.verification_failed,
            NotificationKind::ConsentRequired => &mut self.consent_required,
            NotificationKind::SetupIncomplete => &mut self.setup_incomplete,
        }
    }

    /// Latch `kind`. Returns true if it was not latched yet.
    pub(crate) fn fire(&mut self, kind: NotificationKind) -> bool {
        let latched = self.slot(kind);
        if *latched {
            return false;
        }
        *latched = true;
        true
    }

    /// The condition behind `kind` has cleared.
    pub(crate) fn rearm(&mut self, kind: NotificationKind) {
        *self.slot(kind) = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_notifier_records() {
        let sink = RecordingNotifier::new();
        assert!(sink.is_empty());

        sink.notify(Notification::ConsentRequired { pending_count: 2 });
        sink.notify(Notification::SetupIncomplete);

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.count(NotificationKind::ConsentRequired), 1);
        assert_eq!(
            sink.notifications()[0],
            Notification::ConsentRequired { pending_count: 2 }
        );

        sink.clear();
        assert!(sink.is_empty());
    }

    #[test]
    fn latch_fires_once_until_rearmed() {
        let mut latches = NotificationLatches::default();
        assert!(latches.fire(NotificationKind::SetupIncomplete));
        assert!(!latches.fire(NotificationKind::SetupIncomplete));
        assert!(latches.fire(NotificationKind::ConsentRequired));

        latches.rearm(NotificationKind::SetupIncomplete);
        assert!(latches.fire(NotificationKind::SetupIncomplete));
    }

    #[test]
    fn messages_are_distinct() {
        let rejected = Notification::VerificationFailed {
            reason: VerificationFailure::Rejected,
        };
        let unavailable = Notification::VerificationFailed {
            reason: VerificationFailure::Unavailable,
        };
        assert_ne!(rejected.message(), unavailable.message());
        assert_eq!(rejected.kind(), unavailable.kind());
    }
}
