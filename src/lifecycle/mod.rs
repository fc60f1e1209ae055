mod ban;
mod error;
mod transition;
mod window;

pub use ban::{BanOutcome, BanPolicy, NoShowBanAccumulator};
pub use error::{ErrorKind, LifecycleError, Violation};
pub use transition::{NoShowOutcome, ReservationStateMachine};
pub use window::TimeWindowPolicy;

use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::permission::{Permission, PermissionResolver};
use crate::store::{ReservationStore, StoreError};

/// Tunable policy knobs, fixed for the life of the service.
#[derive(Debug, Clone, Copy, Default)]
pub struct LifecyclePolicy {
    pub windows: TimeWindowPolicy,
    pub bans: BanPolicy,
    pub no_show: NoShowOutcome,
}

/// Who may attempt an action, before time windows are considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    /// The owner, or an admin.
    Owner,
    /// Staff or admin.
    Staff,
    /// Any member holding the permission.
    Public,
}

fn scope(action: Action) -> Scope {
    match action {
        Action::CheckIn | Action::EarlyReturn | Action::Cancel => Scope::Owner,
        Action::ReportNoShow => Scope::Public,
        Action::Approve
        | Action::AutoFinish
        | Action::DetectNoShow
        | Action::ForceStatus(_)
        | Action::Delete => Scope::Staff,
    }
}

fn reservation_permission(action: &'static str) -> Permission {
    Permission::from_static("reservation", action)
}

/// Decides whether an actor may act on a reservation right now and, if so,
/// applies the transition through the store.
pub struct LifecycleService<S> {
    store: S,
    resolver: PermissionResolver,
    machine: ReservationStateMachine,
    bans: NoShowBanAccumulator,
}

impl<S: ReservationStore> LifecycleService<S> {
    pub fn new(store: S, resolver: PermissionResolver, policy: LifecyclePolicy) -> Self {
        Self {
            store,
            resolver,
            machine: ReservationStateMachine::new(policy.windows, policy.no_show),
            bans: NoShowBanAccumulator::new(policy.bans),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn windows(&self) -> &TimeWindowPolicy {
        &self.machine.windows
    }

    pub fn get(&self, id: ReservationId) -> Result<Reservation, LifecycleError> {
        self.store
            .get_reservation(&id)
            .map(|row| row.value)
            .ok_or(LifecycleError::NotFound(id))
    }

    /// Ownership and role check for `action` on `reservation`.
    pub fn authorize(&self, actor: &Actor, reservation: &Reservation, action: Action) -> Result<(), LifecycleError> {
        let permission = reservation_permission(action.permission_action());
        let granted = self.resolver.has_permission(actor.role, &permission);
        let allowed = match scope(action) {
            Scope::Owner => {
                PermissionResolver::is_admin(actor)
                    || (PermissionResolver::is_owner(actor, reservation) && granted)
            }
            Scope::Staff => PermissionResolver::is_staff(actor) && granted,
            Scope::Public => granted,
        };
        if allowed {
            Ok(())
        } else {
            Err(LifecycleError::PermissionDenied {
                permission: permission.to_string(),
            })
        }
    }

    /// Single entry point for every transition on an existing reservation,
    /// including the scheduler's auto-finish and no-show sweeps.
    pub fn attempt(
        &self,
        actor: &Actor,
        id: ReservationId,
        action: Action,
        now: Ms,
    ) -> Result<Reservation, LifecycleError> {
        let result = self.attempt_inner(actor, id, action, now);
        match &result {
            Ok(r) => {
                metrics::counter!(observability::TRANSITIONS_TOTAL, "action" => action.label()).increment(1);
                info!("reservation {id}: {action} by {} -> {}", actor.id, r.status);
            }
            Err(e) => self.note_rejection(id, action, e),
        }
        result
    }

    fn attempt_inner(
        &self,
        actor: &Actor,
        id: ReservationId,
        action: Action,
        now: Ms,
    ) -> Result<Reservation, LifecycleError> {
        let mut lost = 0;
        loop {
            if lost > MAX_CAS_RETRIES {
                return Err(LifecycleError::Conflict(id));
            }
            let row = self
                .store
                .get_reservation(&id)
                .ok_or(LifecycleError::NotFound(id))?;
            self.authorize(actor, &row.value, action)?;

            let written = if action == Action::Delete {
                self.store.delete_reservation(&id, row.version).map(|()| row.value)
            } else {
                let next = self.machine.apply(action, now, &row.value)?;
                if matches!(action, Action::DetectNoShow | Action::ReportNoShow) {
                    self.commit_no_show(row.version, action, next, now)
                } else {
                    self.store
                        .compare_and_swap(row.version, action, next.clone())
                        .map(|_| next)
                }
            };
            match written {
                Ok(r) => return Ok(r),
                Err(StoreError::VersionMismatch(stale)) if stale == id => {
                    debug!("reservation {id}: lost write race on {action}, re-evaluating");
                    lost += 1;
                }
                // Only the owner's ban record moved; does not count against the budget.
                Err(StoreError::VersionMismatch(_)) => {
                    debug!("reservation {id}: ban record moved during {action}, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn note_rejection(&self, id: Ulid, action: Action, e: &LifecycleError) {
        let kind = e.kind();
        metrics::counter!(observability::REJECTIONS_TOTAL, "kind" => kind.label()).increment(1);
        if e.is_rejection() {
            debug!("{id}: {action} rejected: {e}");
        } else {
            error!("{id}: {action} failed: {e}");
        }
    }

    /// Write the flagged reservation and the owner's folded ban record as
    /// one store operation, so the two counts never drift apart.
    fn commit_no_show(
        &self,
        expected_version: u64,
        action: Action,
        next: Reservation,
        now: Ms,
    ) -> Result<Reservation, StoreError> {
        let user_id = next.user_id;
        let (ban_version, base) = match self.store.get_ban(&user_id) {
            Some(row) => (Some(row.version), row.value),
            None => (None, BanRecord::new(user_id)),
        };
        let (record, outcome) = self.bans.record_no_show(&base, now);
        self.store
            .record_no_show(expected_version, action, next.clone(), ban_version, record.clone())?;
        if outcome != BanOutcome::Counted {
            metrics::counter!(observability::BANS_TOTAL, "kind" => outcome.label()).increment(1);
            warn!(
                "user {user_id} banned ({}) after {} no-shows",
                outcome.label(),
                record.no_show_count
            );
        }
        Ok(next)
    }

    /// Create a reservation owned by `actor`.
    pub fn create(&self, actor: &Actor, request: NewReservation, now: Ms) -> Result<Reservation, LifecycleError> {
        let result = self.create_inner(actor, request, now);
        match &result {
            Ok(r) => {
                metrics::counter!(observability::TRANSITIONS_TOTAL, "action" => "create").increment(1);
                info!("reservation {} created by {} in room {} -> {}", r.id, actor.id, r.room_id, r.status);
            }
            Err(e) => {
                metrics::counter!(observability::REJECTIONS_TOTAL, "kind" => e.kind().label()).increment(1);
                debug!("create by {} rejected: {e}", actor.id);
            }
        }
        result
    }

    fn create_inner(&self, actor: &Actor, request: NewReservation, now: Ms) -> Result<Reservation, LifecycleError> {
        let permission = reservation_permission("create");
        if !self.resolver.has_permission(actor.role, &permission) {
            return Err(LifecycleError::PermissionDenied {
                permission: permission.to_string(),
            });
        }
        let ban = self.store.get_ban(&actor.id);
        self.bans.check_creation(ban.as_ref().map(|row| &row.value), now)?;
        validate_request(&request, now)?;

        let status = if request.requires_approval {
            ReservationStatus::Pending
        } else {
            ReservationStatus::Confirmed
        };
        let reservation = Reservation {
            id: Ulid::new(),
            room_id: request.room_id,
            user_id: actor.id,
            title: request.title,
            span: request.span,
            status,
            check_in_at: None,
            returned_at: None,
            is_no_show: false,
            no_show_report_count: 0,
            created_at: now,
        };
        self.store.insert_reservation(reservation.clone())?;
        Ok(reservation)
    }

    pub fn ban_status(&self, user_id: UserId, now: Ms) -> BanState {
        self.store
            .get_ban(&user_id)
            .map_or(BanState::Clear, |row| row.value.state(now))
    }

    /// Manual review: clear a user's ban, keeping the infraction history.
    pub fn lift_ban(&self, actor: &Actor, user_id: UserId) -> Result<BanRecord, LifecycleError> {
        let permission = Permission::from_static("user", "unban");
        if !self.resolver.has_permission(actor.role, &permission) {
            return Err(LifecycleError::PermissionDenied {
                permission: permission.to_string(),
            });
        }
        for _ in 0..=MAX_CAS_RETRIES {
            let row = self.store.get_ban(&user_id).ok_or(LifecycleError::NotFound(user_id))?;
            let lifted = self.bans.lift(&row.value);
            match self.store.put_ban(Some(row.version), lifted.clone()) {
                Ok(_) => {
                    info!("ban on user {user_id} lifted by {}", actor.id);
                    return Ok(lifted);
                }
                Err(StoreError::VersionMismatch(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(LifecycleError::Conflict(user_id))
    }

    /// Actions `actor` could perform on `reservation` at `now`. Read-only.
    pub fn affordances(&self, actor: &Actor, reservation: &Reservation, now: Ms) -> Vec<Action> {
        const CANDIDATES: [Action; 6] = [
            Action::Approve,
            Action::CheckIn,
            Action::EarlyReturn,
            Action::Cancel,
            Action::ReportNoShow,
            Action::AutoFinish,
        ];
        CANDIDATES
            .into_iter()
            .filter(|a| self.authorize(actor, reservation, *a).is_ok())
            .filter(|a| self.machine.check(*a, now, reservation).is_ok())
            .collect()
    }
}

fn validate_request(request: &NewReservation, now: Ms) -> Result<(), LifecycleError> {
    let span = request.span;
    if span.start >= span.end {
        return Err(LifecycleError::PolicyViolation(Violation::InvalidSpan));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(LifecycleError::PolicyViolation(Violation::TimestampOutOfRange));
    }
    if span.duration_ms() > MAX_RESERVATION_DURATION_MS {
        return Err(LifecycleError::PolicyViolation(Violation::DurationTooLong));
    }
    if span.start < now {
        return Err(LifecycleError::PolicyViolation(Violation::StartInPast));
    }
    if request.title.len() > MAX_TITLE_LEN {
        return Err(LifecycleError::PolicyViolation(Violation::TitleTooLong));
    }
    Ok(())
}
