use crate::model::*;

/// Time-window predicates over `(now, reservation)`.
///
/// Every predicate is total and side-effect free. They gate the mutating
/// transitions and are also exposed to callers for affordance display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindowPolicy {
    /// Check-in is open from `start - w` to `start + w`, inclusive.
    pub check_in_window: Ms,
    /// Cancelling is allowed up to and including `start - cutoff`.
    pub cancel_cutoff: Ms,
    /// How long past start the scheduler waits before sweeping a no-show.
    pub no_show_grace: Ms,
}

impl Default for TimeWindowPolicy {
    fn default() -> Self {
        Self {
            check_in_window: 10 * MINUTE,
            cancel_cutoff: 30 * MINUTE,
            no_show_grace: 10 * MINUTE,
        }
    }
}

impl TimeWindowPolicy {
    pub fn can_check_in(&self, now: Ms, r: &Reservation) -> bool {
        r.status == ReservationStatus::Confirmed
            && r.check_in_at.is_none()
            && !r.is_no_show
            && r.start().saturating_sub(self.check_in_window) <= now
            && now <= r.start().saturating_add(self.check_in_window)
    }

    pub fn can_early_return(&self, now: Ms, r: &Reservation) -> bool {
        r.status == ReservationStatus::Confirmed
            && r.check_in_at.is_some()
            && r.returned_at.is_none()
            && !r.is_no_show
            && r.span.contains_instant(now)
    }

    pub fn can_cancel(&self, now: Ms, r: &Reservation) -> bool {
        !r.status.is_terminal()
            && !r.is_no_show
            && now <= r.start().saturating_sub(self.cancel_cutoff)
    }

    pub fn is_no_show_eligible(&self, now: Ms, r: &Reservation) -> bool {
        r.status == ReservationStatus::Confirmed
            && r.check_in_at.is_none()
            && !r.is_no_show
            && now >= r.start()
    }

    pub fn is_auto_finish_due(&self, now: Ms, r: &Reservation) -> bool {
        r.status == ReservationStatus::Confirmed && now >= r.effective_end()
    }

    /// Stricter form used by the scheduler so a late (but valid) check-in
    /// is never pre-empted by the sweep.
    pub fn is_no_show_sweep_due(&self, now: Ms, r: &Reservation) -> bool {
        self.is_no_show_eligible(now, r) && now >= r.start().saturating_add(self.no_show_grace)
    }
}
