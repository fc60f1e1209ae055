use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub const MINUTE: Ms = 60_000;
pub const HOUR: Ms = 60 * MINUTE;
pub const DAY: Ms = 24 * HOUR;

pub type UserId = Ulid;
pub type RoomId = Ulid;
pub type ReservationId = Ulid;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Closed set of roles. Each actor carries exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Staff,
    ClubLeader,
    Admin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Student, Role::Staff, Role::ClubLeader, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Staff => "staff",
            Role::ClubLeader => "club_leader",
            Role::Admin => "admin",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Role::Student),
            "staff" => Ok(Role::Staff),
            "club_leader" => Ok(Role::ClubLeader),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// An authenticated principal. Immutable for the duration of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn new(id: UserId, role: Role) -> Self {
        Self { id, role }
    }

    /// The scheduler principal used for time-driven transitions.
    pub fn system() -> Self {
        Self {
            id: Ulid::nil(),
            role: Role::Admin,
        }
    }

    pub fn is_system(&self) -> bool {
        self.id.is_nil() && self.role == Role::Admin
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Finished,
    Cancelled,
}

impl ReservationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReservationStatus::Finished | ReservationStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Finished => "finished",
            ReservationStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub title: String,
    pub span: Span,
    pub status: ReservationStatus,
    pub check_in_at: Option<Ms>,
    /// Set by early return; the booked `span.end` is left untouched.
    pub returned_at: Option<Ms>,
    pub is_no_show: bool,
    pub no_show_report_count: u32,
    pub created_at: Ms,
}

impl Reservation {
    pub fn start(&self) -> Ms {
        self.span.start
    }

    pub fn end(&self) -> Ms {
        self.span.end
    }

    pub fn effective_end(&self) -> Ms {
        self.returned_at.unwrap_or(self.span.end)
    }

    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }

    /// Pending and confirmed reservations still occupy their room.
    pub fn is_live(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Creation request as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub room_id: RoomId,
    pub title: String,
    pub span: Span,
    /// Room policy: when false the reservation is auto-confirmed.
    pub requires_approval: bool,
}

/// Per-user infraction record, created lazily on the first no-show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanRecord {
    pub user_id: UserId,
    pub no_show_count: u32,
    /// Temporary bans issued so far; drives escalation to a permanent ban.
    pub temp_ban_count: u32,
    pub ban_until: Option<Ms>,
    pub permanent_ban: bool,
}

impl BanRecord {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            no_show_count: 0,
            temp_ban_count: 0,
            ban_until: None,
            permanent_ban: false,
        }
    }

    pub fn state(&self, now: Ms) -> BanState {
        if self.permanent_ban {
            return BanState::Permanent;
        }
        match self.ban_until {
            Some(until) if now < until => BanState::Temporary { until },
            _ => BanState::Clear,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanState {
    Clear,
    Temporary { until: Ms },
    Permanent,
}

impl BanState {
    pub fn is_banned(&self) -> bool {
        !matches!(self, BanState::Clear)
    }
}

/// Everything an actor may attempt on an existing reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Approve,
    CheckIn,
    EarlyReturn,
    AutoFinish,
    Cancel,
    /// Scheduler-driven no-show detection.
    DetectNoShow,
    /// Public no-show report by any member.
    ReportNoShow,
    ForceStatus(ReservationStatus),
    Delete,
}

impl Action {
    /// The `reservation:<action>` permission name.
    pub fn permission_action(&self) -> &'static str {
        match self {
            Action::Approve => "approve",
            Action::CheckIn => "checkin",
            Action::EarlyReturn => "return",
            Action::AutoFinish => "finish",
            Action::Cancel => "cancel",
            Action::DetectNoShow => "detect_noshow",
            Action::ReportNoShow => "report_noshow",
            Action::ForceStatus(_) => "update",
            Action::Delete => "delete",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Action::Approve => "approve",
            Action::CheckIn => "check_in",
            Action::EarlyReturn => "early_return",
            Action::AutoFinish => "auto_finish",
            Action::Cancel => "cancel",
            Action::DetectNoShow => "detect_no_show",
            Action::ReportNoShow => "report_no_show",
            Action::ForceStatus(_) => "force_status",
            Action::Delete => "delete",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Event types, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationCreated { reservation: Reservation },
    ReservationUpdated { action: Action, reservation: Reservation },
    ReservationDeleted { id: ReservationId },
    BanRecorded { record: BanRecord },
    /// A no-show flag and the owner's ban record, committed together.
    NoShowRecorded {
        action: Action,
        reservation: Reservation,
        record: BanRecord,
    },
}
