use thiserror::Error;
use ulid::Ulid;

use crate::model::{Action, Ms, ReservationStatus};
use crate::store::StoreError;

/// Which time-window or input policy a request broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    OutsideCheckInWindow,
    AlreadyCheckedIn,
    NotCheckedIn,
    OutsideReservationSpan,
    CancellationCutoffPassed,
    MarkedNoShow,
    NotYetStarted,
    NotYetEnded,
    InvalidSpan,
    StartInPast,
    DurationTooLong,
    TimestampOutOfRange,
    TitleTooLong,
}

impl Violation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Violation::OutsideCheckInWindow => "outside check-in window",
            Violation::AlreadyCheckedIn => "already checked in",
            Violation::NotCheckedIn => "not checked in",
            Violation::OutsideReservationSpan => "outside reservation time",
            Violation::CancellationCutoffPassed => "cancellation cut-off passed",
            Violation::MarkedNoShow => "reservation marked no-show",
            Violation::NotYetStarted => "reservation has not started",
            Violation::NotYetEnded => "reservation has not ended",
            Violation::InvalidSpan => "start must be before end",
            Violation::StartInPast => "start is in the past",
            Violation::DurationTooLong => "reservation too long",
            Violation::TimestampOutOfRange => "timestamp out of range",
            Violation::TitleTooLong => "title too long",
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome classification. Everything except `Infrastructure` is an
/// expected rejection the caller translates for the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    PolicyViolation,
    InvalidTransition,
    AlreadyBanned,
    Conflict,
    Infrastructure,
}

impl ErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::PolicyViolation => "policy_violation",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::AlreadyBanned => "already_banned",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Infrastructure => "infrastructure",
        }
    }
}

fn ban_suffix(until: &Option<Ms>) -> String {
    match until {
        Some(t) => format!(" until {t}"),
        None => " permanently".to_string(),
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("not found: {0}")]
    NotFound(Ulid),

    #[error("permission denied: {permission}")]
    PermissionDenied { permission: String },

    #[error("policy violation: {0}")]
    PolicyViolation(Violation),

    #[error("invalid transition: cannot {action} a {from} reservation")]
    InvalidTransition {
        from: ReservationStatus,
        action: Action,
    },

    /// `until` is `None` for a permanent ban.
    #[error("user is banned{}", ban_suffix(.until))]
    AlreadyBanned { until: Option<Ms> },

    #[error("conflict with reservation: {0}")]
    Conflict(Ulid),

    #[error("storage error: {0}")]
    Storage(String),
}

impl LifecycleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LifecycleError::NotFound(_) => ErrorKind::NotFound,
            LifecycleError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            LifecycleError::PolicyViolation(_) => ErrorKind::PolicyViolation,
            LifecycleError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            LifecycleError::AlreadyBanned { .. } => ErrorKind::AlreadyBanned,
            LifecycleError::Conflict(_) => ErrorKind::Conflict,
            LifecycleError::Storage(_) => ErrorKind::Infrastructure,
        }
    }

    pub fn is_rejection(&self) -> bool {
        self.kind() != ErrorKind::Infrastructure
    }
}

impl From<StoreError> for LifecycleError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => LifecycleError::NotFound(id),
            StoreError::VersionMismatch(id) | StoreError::Overlap(id) => LifecycleError::Conflict(id),
            StoreError::AlreadyExists(id) => LifecycleError::Conflict(id),
            StoreError::Wal(msg) => LifecycleError::Storage(msg),
        }
    }
}
