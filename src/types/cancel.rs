//! Cancellation kinds and reasons.
//!
//! Cancellation is a first-class signal, not a silent drop. A
//! [`CancelReason`] records why a job is being cancelled; repeated cancel
//! requests strengthen the stored reason monotonically instead of
//! overwriting it.

use core::fmt;

/// The kind of cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CancelKind {
    /// Explicit cancellation requested by user code.
    User,
    /// Cancellation because a child job failed.
    ChildFailed,
    /// Cancellation because the parent's body completed first.
    ParentCompleted,
    /// Cancellation cascading from a cancelled parent.
    ParentCancelled,
}

impl CancelKind {
    /// Returns the severity of this cancellation kind.
    ///
    /// More severe kinds win when a reason is strengthened.
    #[must_use]
    pub const fn severity(self) -> u8 {
        match self {
            Self::User => 0,
            Self::ChildFailed => 1,
            Self::ParentCompleted => 2,
            Self::ParentCancelled => 3,
        }
    }
}

impl fmt::Display for CancelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::ChildFailed => write!(f, "child failed"),
            Self::ParentCompleted => write!(f, "parent completed"),
            Self::ParentCancelled => write!(f, "parent cancelled"),
        }
    }
}

/// The reason for a cancellation: a kind plus an optional static message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelReason {
    /// The kind of cancellation.
    pub kind: CancelKind,
    /// Optional human-readable message (static for determinism).
    pub message: Option<&'static str>,
}

impl CancelReason {
    /// Creates a new cancellation reason with the given kind.
    #[must_use]
    pub const fn new(kind: CancelKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// Creates a user cancellation reason with a message.
    #[must_use]
    pub const fn user(message: &'static str) -> Self {
        Self {
            kind: CancelKind::User,
            message: Some(message),
        }
    }

    /// Creates a child-failure cancellation reason.
    #[must_use]
    pub const fn child_failed() -> Self {
        Self::new(CancelKind::ChildFailed)
    }

    /// Creates a parent-completed cancellation reason.
    #[must_use]
    pub const fn parent_completed() -> Self {
        Self::new(CancelKind::ParentCompleted)
    }

    /// Creates a parent-cancelled cancellation reason.
    #[must_use]
    pub const fn parent_cancelled() -> Self {
        Self::new(CancelKind::ParentCancelled)
    }

    /// Strengthens this reason with another, keeping the more severe one.
    ///
    /// Returns `true` if the reason was changed. Equal kinds keep the
    /// lexicographically smaller message so the result is deterministic
    /// under reordering.
    pub fn strengthen(&mut self, other: &Self) -> bool {
        if other.kind > self.kind {
            self.kind = other.kind;
            self.message = other.message;
            return true;
        }

        if other.kind < self.kind {
            return false;
        }

        match (self.message, other.message) {
            (None, Some(msg)) => {
                self.message = Some(msg);
                true
            }
            (Some(current), Some(candidate)) if candidate < current => {
                self.message = Some(candidate);
                true
            }
            _ => false,
        }
    }

    /// Returns the kind of this cancellation reason.
    #[must_use]
    pub const fn kind(&self) -> CancelKind {
        self.kind
    }
}

impl Default for CancelReason {
    fn default() -> Self {
        Self::new(CancelKind::User)
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(msg) = self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(CancelKind::User.severity() < CancelKind::ChildFailed.severity());
        assert!(CancelKind::ChildFailed.severity() < CancelKind::ParentCompleted.severity());
        assert!(CancelKind::ParentCompleted.severity() < CancelKind::ParentCancelled.severity());
    }

    #[test]
    fn strengthen_takes_more_severe() {
        let mut reason = CancelReason::new(CancelKind::User);
        assert!(reason.strengthen(&CancelReason::child_failed()));
        assert_eq!(reason.kind, CancelKind::ChildFailed);

        assert!(reason.strengthen(&CancelReason::parent_cancelled()));
        assert_eq!(reason.kind, CancelKind::ParentCancelled);

        // Less severe must not change the stored reason.
        assert!(!reason.strengthen(&CancelReason::child_failed()));
        assert_eq!(reason.kind, CancelKind::ParentCancelled);
    }

    #[test]
    fn strengthen_is_idempotent() {
        let mut reason = CancelReason::parent_completed();
        assert!(!reason.strengthen(&CancelReason::parent_completed()));
        assert_eq!(reason.kind, CancelKind::ParentCompleted);
    }

    #[test]
    fn strengthen_same_kind_picks_deterministic_message() {
        let mut reason = CancelReason::user("b");
        assert!(reason.strengthen(&CancelReason::user("a")));
        assert_eq!(reason.message, Some("a"));
    }

    #[test]
    fn strengthen_resets_message_when_kind_increases() {
        let mut reason = CancelReason::user("please stop");
        assert!(reason.strengthen(&CancelReason::parent_cancelled()));
        assert_eq!(reason.kind, CancelKind::ParentCancelled);
        assert_eq!(reason.message, None);
    }

    #[test]
    fn display_includes_message() {
        assert_eq!(CancelReason::user("shutdown").to_string(), "user: shutdown");
        assert_eq!(CancelReason::child_failed().to_string(), "child failed");
    }
}
