//! Role → permission resolution.
//!
//! Permissions are `resource:action` pairs. A role's table entry is a list of
//! grants: an exact permission, a `resource:*` wildcard, or the global `*`.
//! Admin is implicitly granted everything. Nothing here looks at reservation
//! or ban state.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use tracing::error;

use crate::limits::MAX_PERMISSIONS_PER_ROLE;
use crate::model::{Actor, Reservation, Role};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PermissionError {
    #[error("malformed permission: {0:?}")]
    Malformed(String),
    #[error("unknown role in permission table: {0}")]
    UnknownRole(String),
    #[error("too many permissions for role {0}")]
    TooMany(&'static str),
    #[error("invalid permission table: {0}")]
    Json(String),
}

fn valid_segment(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// A concrete permission being checked, e.g. `reservation:create`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Permission {
    resource: String,
    action: String,
}

impl Permission {
    pub fn new(resource: &str, action: &str) -> Result<Self, PermissionError> {
        if !valid_segment(resource) || !valid_segment(action) {
            return Err(PermissionError::Malformed(format!("{resource}:{action}")));
        }
        Ok(Self {
            resource: resource.to_string(),
            action: action.to_string(),
        })
    }

    /// For names fixed at compile time. `builtin_names_are_well_formed`
    /// covers every one the service uses.
    pub(crate) fn from_static(resource: &'static str, action: &'static str) -> Self {
        Self {
            resource: resource.to_string(),
            action: action.to_string(),
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn action(&self) -> &str {
        &self.action
    }
}

impl FromStr for Permission {
    type Err = PermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (resource, action) = s
            .split_once(':')
            .ok_or_else(|| PermissionError::Malformed(s.to_string()))?;
        Self::new(resource, action)
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

/// One entry of a role's permission list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    /// `*`
    All,
    /// `resource:*`
    Resource(String),
    /// `resource:action`
    Exact(Permission),
}

impl Grant {
    pub fn covers(&self, permission: &Permission) -> bool {
        match self {
            Grant::All => true,
            Grant::Resource(resource) => resource == permission.resource(),
            Grant::Exact(p) => p == permission,
        }
    }
}

impl FromStr for Grant {
    type Err = PermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "*" {
            return Ok(Grant::All);
        }
        match s.split_once(':') {
            Some((resource, "*")) if valid_segment(resource) => Ok(Grant::Resource(resource.to_string())),
            Some(_) => Ok(Grant::Exact(s.parse()?)),
            None => Err(PermissionError::Malformed(s.to_string())),
        }
    }
}

const STUDENT_PERMISSIONS: &[&str] = &[
    "reservation:create",
    "reservation:read",
    "reservation:cancel",
    "reservation:checkin",
    "reservation:return",
    "reservation:report_noshow",
    "room:read",
];

const CLUB_LEADER_PERMISSIONS: &[&str] = &[
    "reservation:create",
    "reservation:read",
    "reservation:cancel",
    "reservation:checkin",
    "reservation:return",
    "reservation:report_noshow",
    "room:read",
    "user:read",
];

const STAFF_PERMISSIONS: &[&str] = &[
    "reservation:*",
    "room:*",
    "user:read",
    "statistics:read",
];

const ADMIN_PERMISSIONS: &[&str] = &["*"];

const BUILTIN: [(Role, &[&str]); 4] = [
    (Role::Student, STUDENT_PERMISSIONS),
    (Role::ClubLeader, CLUB_LEADER_PERMISSIONS),
    (Role::Staff, STAFF_PERMISSIONS),
    (Role::Admin, ADMIN_PERMISSIONS),
];

/// Immutable role → grants mapping, loaded once at start-up.
#[derive(Debug, Clone, Default)]
pub struct PermissionTable {
    grants: HashMap<Role, Vec<Grant>>,
}

impl PermissionTable {
    /// The default table shipped with the service.
    /// A malformed entry leaves every role but admin with no grants.
    pub fn builtin() -> Self {
        Self::from_entries(BUILTIN.map(|(role, list)| (role, list.to_vec()))).unwrap_or_else(|e| {
            error!("built-in permission table rejected: {e}");
            Self::default()
        })
    }

    pub fn from_entries<I, S>(entries: I) -> Result<Self, PermissionError>
    where
        I: IntoIterator<Item = (Role, Vec<S>)>,
        S: AsRef<str>,
    {
        let mut grants: HashMap<Role, Vec<Grant>> = HashMap::new();
        for (role, list) in entries {
            if list.len() > MAX_PERMISSIONS_PER_ROLE {
                return Err(PermissionError::TooMany(role.as_str()));
            }
            let parsed = list
                .iter()
                .map(|s| s.as_ref().parse())
                .collect::<Result<Vec<Grant>, _>>()?;
            grants.entry(role).or_default().extend(parsed);
        }
        Ok(Self { grants })
    }

    /// Parse a JSON object of the form `{"student": ["reservation:create", ...], ...}`.
    pub fn from_json(json: &str) -> Result<Self, PermissionError> {
        let raw: BTreeMap<String, Vec<String>> =
            serde_json::from_str(json).map_err(|e| PermissionError::Json(e.to_string()))?;
        let mut entries = Vec::with_capacity(raw.len());
        for (role, list) in raw {
            let role: Role = role.parse().map_err(|_| PermissionError::UnknownRole(role.clone()))?;
            entries.push((role, list));
        }
        Self::from_entries(entries)
    }

    /// Roles missing from the table resolve to an empty grant list.
    pub fn grants(&self, role: Role) -> &[Grant] {
        self.grants.get(&role).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Answers "may this role do that". Cheap to clone; the table is shared.
#[derive(Debug, Clone)]
pub struct PermissionResolver {
    table: Arc<PermissionTable>,
}

impl Default for PermissionResolver {
    fn default() -> Self {
        Self::new(PermissionTable::builtin())
    }
}

impl PermissionResolver {
    pub fn new(table: PermissionTable) -> Self {
        Self {
            table: Arc::new(table),
        }
    }

    pub fn has_permission(&self, role: Role, permission: &Permission) -> bool {
        if role == Role::Admin {
            return true;
        }
        self.table
            .grants(role)
            .iter()
            .any(|grant| grant.covers(permission))
    }

    /// String form of [`has_permission`](Self::has_permission). Malformed input is denied.
    pub fn has_permission_str(&self, role: Role, permission: &str) -> bool {
        if role == Role::Admin {
            return true;
        }
        match permission.parse::<Permission>() {
            Ok(p) => self.has_permission(role, &p),
            Err(_) => false,
        }
    }

    pub fn has_role(actor: &Actor, role: Role) -> bool {
        actor.role == role
    }

    pub fn has_any_role(actor: &Actor, roles: &[Role]) -> bool {
        roles.contains(&actor.role)
    }

    pub fn is_admin(actor: &Actor) -> bool {
        actor.role == Role::Admin
    }

    pub fn is_staff(actor: &Actor) -> bool {
        Self::has_any_role(actor, &[Role::Staff, Role::Admin])
    }

    pub fn is_club_leader(actor: &Actor) -> bool {
        Self::has_any_role(actor, &[Role::ClubLeader, Role::Admin])
    }

    pub fn is_owner(actor: &Actor, reservation: &Reservation) -> bool {
        reservation.is_owned_by(actor.id)
    }
}
