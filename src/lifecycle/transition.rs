use crate::model::*;

use super::error::{LifecycleError, Violation};
use super::window::TimeWindowPolicy;

use ReservationStatus::*;

/// What happens to a reservation once a no-show is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoShowOutcome {
    /// Flag only; status stays `confirmed` until auto-finish.
    #[default]
    Flag,
    /// Flag and move to `cancelled` in the same write.
    Cancel,
}

/// Owns the legal status transitions and their preconditions.
///
/// `pending → confirmed → finished`, with `cancelled` reachable from
/// `pending` or `confirmed`. `finished` and `cancelled` are terminal.
/// Check-in and no-show are field updates on a `confirmed` reservation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReservationStateMachine {
    pub windows: TimeWindowPolicy,
    pub no_show: NoShowOutcome,
}

impl ReservationStateMachine {
    pub fn new(windows: TimeWindowPolicy, no_show: NoShowOutcome) -> Self {
        Self { windows, no_show }
    }

    /// Statuses an action may start from.
    pub fn allowed_from(action: Action) -> &'static [ReservationStatus] {
        match action {
            Action::Approve => &[Pending],
            Action::CheckIn
            | Action::EarlyReturn
            | Action::AutoFinish
            | Action::DetectNoShow
            | Action::ReportNoShow => &[Confirmed],
            Action::Cancel => &[Pending, Confirmed],
            Action::ForceStatus(Confirmed) => &[Pending],
            Action::ForceStatus(Finished) => &[Confirmed],
            Action::ForceStatus(Cancelled) => &[Pending, Confirmed],
            Action::ForceStatus(Pending) => &[],
            Action::Delete => &[Pending, Confirmed, Finished, Cancelled],
        }
    }

    /// Validate `action` against the current snapshot without changing it.
    pub fn check(&self, action: Action, now: Ms, r: &Reservation) -> Result<(), LifecycleError> {
        if !Self::allowed_from(action).contains(&r.status) {
            return Err(LifecycleError::InvalidTransition {
                from: r.status,
                action,
            });
        }
        let w = &self.windows;
        let violation = match action {
            Action::CheckIn if !w.can_check_in(now, r) => Some(if r.check_in_at.is_some() {
                Violation::AlreadyCheckedIn
            } else if r.is_no_show {
                Violation::MarkedNoShow
            } else {
                Violation::OutsideCheckInWindow
            }),
            Action::EarlyReturn if !w.can_early_return(now, r) => Some(if r.is_no_show {
                Violation::MarkedNoShow
            } else if r.check_in_at.is_none() {
                Violation::NotCheckedIn
            } else {
                Violation::OutsideReservationSpan
            }),
            Action::Cancel if !w.can_cancel(now, r) => Some(if r.is_no_show {
                Violation::MarkedNoShow
            } else {
                Violation::CancellationCutoffPassed
            }),
            Action::DetectNoShow | Action::ReportNoShow if !w.is_no_show_eligible(now, r) => {
                Some(if r.check_in_at.is_some() {
                    Violation::AlreadyCheckedIn
                } else if r.is_no_show {
                    Violation::MarkedNoShow
                } else {
                    Violation::NotYetStarted
                })
            }
            Action::AutoFinish if !w.is_auto_finish_due(now, r) => Some(Violation::NotYetEnded),
            _ => None,
        };
        match violation {
            Some(v) => Err(LifecycleError::PolicyViolation(v)),
            None => Ok(()),
        }
    }

    /// Compute the successor snapshot. The input is never modified.
    pub fn apply(&self, action: Action, now: Ms, r: &Reservation) -> Result<Reservation, LifecycleError> {
        self.check(action, now, r)?;
        let mut next = r.clone();
        match action {
            Action::Approve => next.status = Confirmed,
            Action::CheckIn => next.check_in_at = Some(now),
            Action::EarlyReturn => {
                next.status = Finished;
                next.returned_at = Some(now);
            }
            Action::AutoFinish => next.status = Finished,
            Action::Cancel => next.status = Cancelled,
            Action::DetectNoShow | Action::ReportNoShow => {
                next.is_no_show = true;
                next.no_show_report_count = next.no_show_report_count.saturating_add(1);
                if self.no_show == NoShowOutcome::Cancel {
                    next.status = Cancelled;
                }
            }
            Action::ForceStatus(target) => next.status = target,
            Action::Delete => {}
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::error::ErrorKind;
    use ulid::Ulid;

    const T0: Ms = 1_767_261_600_000;

    fn reservation(status: ReservationStatus) -> Reservation {
        Reservation {
            id: Ulid::new(),
            room_id: Ulid::new(),
            user_id: Ulid::new(),
            title: "lab".into(),
            span: Span::new(T0, T0 + HOUR),
            status,
            check_in_at: None,
            returned_at: None,
            is_no_show: false,
            no_show_report_count: 0,
            created_at: T0 - DAY,
        }
    }

    const ALL_ACTIONS: [Action; 12] = [
        Action::Approve,
        Action::CheckIn,
        Action::EarlyReturn,
        Action::AutoFinish,
        Action::Cancel,
        Action::DetectNoShow,
        Action::ReportNoShow,
        Action::ForceStatus(Pending),
        Action::ForceStatus(Confirmed),
        Action::ForceStatus(Finished),
        Action::ForceStatus(Cancelled),
        Action::Delete,
    ];

    #[test]
    fn terminal_states_never_resurrect() {
        let sm = ReservationStateMachine::default();
        for status in [Finished, Cancelled] {
            let r = reservation(status);
            for action in ALL_ACTIONS {
                if action == Action::Delete {
                    continue;
                }
                let err = sm.apply(action, T0, &r).unwrap_err();
                assert_eq!(err.kind(), ErrorKind::InvalidTransition, "{action} from {status}");
            }
        }
    }

    #[test]
    fn status_only_moves_forward() {
        fn rank(s: ReservationStatus) -> u8 {
            match s {
                Pending => 0,
                Confirmed => 1,
                Finished | Cancelled => 2,
            }
        }
        let sm = ReservationStateMachine::default();
        for start in [Pending, Confirmed] {
            for action in ALL_ACTIONS {
                for now in [T0 - DAY, T0 - 5 * MINUTE, T0, T0 + 30 * MINUTE, T0 + 2 * HOUR] {
                    let mut r = reservation(start);
                    if action == Action::EarlyReturn {
                        r.check_in_at = Some(T0 - MINUTE);
                    }
                    if let Ok(next) = sm.apply(action, now, &r) {
                        assert!(rank(next.status) >= rank(start), "{action}: {start} -> {}", next.status);
                    }
                }
            }
        }
    }

    #[test]
    fn approve_confirms_pending() {
        let sm = ReservationStateMachine::default();
        let next = sm.apply(Action::Approve, T0 - DAY, &reservation(Pending)).unwrap();
        assert_eq!(next.status, Confirmed);
        assert!(matches!(
            sm.apply(Action::Approve, T0 - DAY, &next),
            Err(LifecycleError::InvalidTransition { from: Confirmed, .. })
        ));
    }

    #[test]
    fn check_in_sets_timestamp_once() {
        let sm = ReservationStateMachine::default();
        let r = reservation(Confirmed);
        let now = T0 - 9 * MINUTE;
        let next = sm.apply(Action::CheckIn, now, &r).unwrap();
        assert_eq!(next.check_in_at, Some(now));
        assert_eq!(next.status, Confirmed);
        assert_eq!(
            sm.apply(Action::CheckIn, now + MINUTE, &next),
            Err(LifecycleError::PolicyViolation(Violation::AlreadyCheckedIn))
        );
    }

    #[test]
    fn check_in_outside_window() {
        let sm = ReservationStateMachine::default();
        assert_eq!(
            sm.apply(Action::CheckIn, T0 - HOUR, &reservation(Confirmed)),
            Err(LifecycleError::PolicyViolation(Violation::OutsideCheckInWindow))
        );
        assert!(matches!(
            sm.apply(Action::CheckIn, T0, &reservation(Pending)),
            Err(LifecycleError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn early_return_finishes_and_records_return() {
        let sm = ReservationStateMachine::default();
        let mut r = reservation(Confirmed);
        assert_eq!(
            sm.apply(Action::EarlyReturn, T0 + MINUTE, &r),
            Err(LifecycleError::PolicyViolation(Violation::NotCheckedIn))
        );
        r.check_in_at = Some(T0);
        let next = sm.apply(Action::EarlyReturn, T0 + 30 * MINUTE, &r).unwrap();
        assert_eq!(next.status, Finished);
        assert_eq!(next.returned_at, Some(T0 + 30 * MINUTE));
        assert_eq!(next.effective_end(), T0 + 30 * MINUTE);
        assert_eq!(next.span, r.span);
    }

    #[test]
    fn cancel_respects_cutoff() {
        let sm = ReservationStateMachine::default();
        let r = reservation(Confirmed);
        assert_eq!(sm.apply(Action::Cancel, T0 - 30 * MINUTE, &r).unwrap().status, Cancelled);
        assert_eq!(
            sm.apply(Action::Cancel, T0 - 29 * MINUTE, &r),
            Err(LifecycleError::PolicyViolation(Violation::CancellationCutoffPassed))
        );
        assert_eq!(sm.apply(Action::Cancel, T0 - HOUR, &reservation(Pending)).unwrap().status, Cancelled);
    }

    #[test]
    fn no_show_flags_by_default() {
        let sm = ReservationStateMachine::default();
        let r = reservation(Confirmed);
        assert_eq!(
            sm.apply(Action::DetectNoShow, T0 - MINUTE, &r),
            Err(LifecycleError::PolicyViolation(Violation::NotYetStarted))
        );
        let next = sm.apply(Action::ReportNoShow, T0, &r).unwrap();
        assert!(next.is_no_show);
        assert_eq!(next.no_show_report_count, 1);
        assert_eq!(next.status, Confirmed);
        assert_eq!(next.check_in_at, None);

        // Recorded once per reservation.
        assert_eq!(
            sm.apply(Action::DetectNoShow, T0 + MINUTE, &next),
            Err(LifecycleError::PolicyViolation(Violation::MarkedNoShow))
        );
        // Flagged reservations still auto-finish.
        assert_eq!(sm.apply(Action::AutoFinish, T0 + HOUR, &next).unwrap().status, Finished);
    }

    #[test]
    fn no_show_cancels_when_configured() {
        let sm = ReservationStateMachine::new(TimeWindowPolicy::default(), NoShowOutcome::Cancel);
        let next = sm.apply(Action::DetectNoShow, T0 + 15 * MINUTE, &reservation(Confirmed)).unwrap();
        assert!(next.is_no_show);
        assert_eq!(next.status, Cancelled);
    }

    #[test]
    fn no_show_after_check_in_rejected() {
        let sm = ReservationStateMachine::default();
        let mut r = reservation(Confirmed);
        r.check_in_at = Some(T0 - MINUTE);
        assert_eq!(
            sm.apply(Action::ReportNoShow, T0 + MINUTE, &r),
            Err(LifecycleError::PolicyViolation(Violation::AlreadyCheckedIn))
        );
    }

    #[test]
    fn auto_finish_waits_for_end() {
        let sm = ReservationStateMachine::default();
        let r = reservation(Confirmed);
        assert_eq!(
            sm.apply(Action::AutoFinish, T0 + 59 * MINUTE, &r),
            Err(LifecycleError::PolicyViolation(Violation::NotYetEnded))
        );
        assert_eq!(sm.apply(Action::AutoFinish, T0 + HOUR, &r).unwrap().status, Finished);
        assert!(sm.apply(Action::AutoFinish, T0 + HOUR, &reservation(Pending)).is_err());
    }

    #[test]
    fn force_status_forward_only() {
        let sm = ReservationStateMachine::default();
        let pending = reservation(Pending);
        assert_eq!(sm.apply(Action::ForceStatus(Confirmed), T0, &pending).unwrap().status, Confirmed);
        assert!(sm.apply(Action::ForceStatus(Finished), T0, &pending).is_err());
        assert!(sm.apply(Action::ForceStatus(Pending), T0, &reservation(Confirmed)).is_err());
        assert_eq!(
            sm.apply(Action::ForceStatus(Cancelled), T0 + HOUR, &reservation(Confirmed)).unwrap().status,
            Cancelled
        );
    }
}
