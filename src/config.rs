use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::lifecycle::{BanPolicy, LifecyclePolicy, NoShowOutcome};
use crate::model::DAY;
use crate::permission::{PermissionError, PermissionTable};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },
    #[error("cannot read permission table {path}: {source}")]
    PermissionFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("bad permission table: {0}")]
    Permissions(#[from] PermissionError),
}

/// Process configuration, read once at start-up.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub sweep_interval: Duration,
    pub compact_threshold: u64,
    /// Path to a JSON permission table; the built-in table when unset.
    pub permissions_path: Option<PathBuf>,
    pub policy: LifecyclePolicy,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source. Unset variables take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = BanPolicy::default();
        let no_show = match lookup("ROOMBOOK_NO_SHOW_OUTCOME").as_deref() {
            None | Some("flag") => NoShowOutcome::Flag,
            Some("cancel") => NoShowOutcome::Cancel,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    var: "ROOMBOOK_NO_SHOW_OUTCOME",
                    value: other.to_string(),
                });
            }
        };
        let ban_days: i64 = parse(&lookup, "ROOMBOOK_TEMP_BAN_DAYS")?.unwrap_or(defaults.temp_ban_duration / DAY);
        if ban_days < 0 {
            return Err(ConfigError::InvalidValue {
                var: "ROOMBOOK_TEMP_BAN_DAYS",
                value: ban_days.to_string(),
            });
        }

        Ok(Self {
            data_dir: lookup("ROOMBOOK_DATA_DIR").map_or_else(|| PathBuf::from("./data"), PathBuf::from),
            metrics_port: parse(&lookup, "ROOMBOOK_METRICS_PORT")?,
            sweep_interval: Duration::from_secs(parse::<u64>(&lookup, "ROOMBOOK_SWEEP_INTERVAL_SECS")?.unwrap_or(5).max(1)),
            compact_threshold: parse(&lookup, "ROOMBOOK_COMPACT_THRESHOLD")?.unwrap_or(1000),
            permissions_path: lookup("ROOMBOOK_PERMISSIONS").map(PathBuf::from),
            policy: LifecyclePolicy {
                bans: BanPolicy {
                    temp_ban_threshold: parse(&lookup, "ROOMBOOK_TEMP_BAN_THRESHOLD")?
                        .unwrap_or(defaults.temp_ban_threshold),
                    temp_ban_duration: ban_days.saturating_mul(DAY),
                    permanent_after_temp_bans: parse(&lookup, "ROOMBOOK_PERMANENT_AFTER_BANS")?
                        .unwrap_or(defaults.permanent_after_temp_bans),
                },
                no_show,
                ..LifecyclePolicy::default()
            },
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("roombook.wal")
    }

    /// Load the configured permission table, or the built-in one.
    pub fn permission_table(&self) -> Result<PermissionTable, ConfigError> {
        let Some(path) = &self.permissions_path else {
            return Ok(PermissionTable::builtin());
        };
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::PermissionFile {
            path: path.clone(),
            source,
        })?;
        Ok(PermissionTable::from_json(&json)?)
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { var, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|var| map.get(var).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[]).unwrap();
        assert_eq!(c.data_dir, PathBuf::from("./data"));
        assert_eq!(c.metrics_port, None);
        assert_eq!(c.sweep_interval, Duration::from_secs(5));
        assert_eq!(c.compact_threshold, 1000);
        assert_eq!(c.policy.no_show, NoShowOutcome::Flag);
        assert_eq!(c.policy.bans, BanPolicy::default());
        assert_eq!(c.wal_path(), PathBuf::from("./data/roombook.wal"));
    }

    #[test]
    fn overrides() {
        let c = config(&[
            ("ROOMBOOK_DATA_DIR", "/var/lib/roombook"),
            ("ROOMBOOK_METRICS_PORT", "9100"),
            ("ROOMBOOK_NO_SHOW_OUTCOME", "cancel"),
            ("ROOMBOOK_TEMP_BAN_THRESHOLD", "2"),
            ("ROOMBOOK_TEMP_BAN_DAYS", "14"),
            ("ROOMBOOK_PERMANENT_AFTER_BANS", "0"),
        ])
        .unwrap();
        assert_eq!(c.metrics_port, Some(9100));
        assert_eq!(c.policy.no_show, NoShowOutcome::Cancel);
        assert_eq!(c.policy.bans.temp_ban_threshold, 2);
        assert_eq!(c.policy.bans.temp_ban_duration, 14 * DAY);
        assert_eq!(c.policy.bans.permanent_after_temp_bans, 0);
    }

    #[test]
    fn bad_values_rejected() {
        assert!(matches!(
            config(&[("ROOMBOOK_NO_SHOW_OUTCOME", "ignore")]),
            Err(ConfigError::InvalidValue { var: "ROOMBOOK_NO_SHOW_OUTCOME", .. })
        ));
        assert!(matches!(
            config(&[("ROOMBOOK_METRICS_PORT", "99999")]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            config(&[("ROOMBOOK_TEMP_BAN_DAYS", "-1")]),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn permission_table_from_file() {
        let dir = std::env::temp_dir().join("roombook_test_config");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("permissions.json");
        std::fs::write(&path, r#"{"staff": ["reservation:*"], "student": ["reservation:read"]}"#).unwrap();

        let c = config(&[("ROOMBOOK_PERMISSIONS", path.to_str().unwrap())]).unwrap();
        let table = c.permission_table().unwrap();
        assert_eq!(table.grants(Role::Staff).len(), 1);
        assert!(table.grants(Role::ClubLeader).is_empty());

        std::fs::write(&path, r#"{"janitor": ["room:read"]}"#).unwrap();
        assert!(matches!(c.permission_table(), Err(ConfigError::Permissions(_))));

        let missing = config(&[("ROOMBOOK_PERMISSIONS", "/nonexistent/roombook.json")]).unwrap();
        assert!(matches!(missing.permission_table(), Err(ConfigError::PermissionFile { .. })));
    }
}
