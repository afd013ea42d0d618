use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::error::{EntityKind, Error, Result};

/// A server catalog entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Database {
    /// `database_id` in `sys.databases`.
    pub id: i64,
    /// Database name.
    pub name: String,
}

/// Recovery model of a database.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecoveryModel {
    /// `FULL`
    Full,
    /// `BULK_LOGGED`
    BulkLogged,
    /// `SIMPLE`
    Simple,
}

impl Display for RecoveryModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryModel::Full => write!(f, "FULL"),
            RecoveryModel::BulkLogged => write!(f, "BULK_LOGGED"),
            RecoveryModel::Simple => write!(f, "SIMPLE"),
        }
    }
}

impl TryFrom<&str> for RecoveryModel {
    type Error = Error;

    fn try_from(val: &str) -> Result<Self> {
        match val.trim().to_uppercase().as_str() {
            "FULL" => Ok(RecoveryModel::Full),
            "BULK_LOGGED" => Ok(RecoveryModel::BulkLogged),
            "SIMPLE" => Ok(RecoveryModel::Simple),
            other => Err(Error::validation(
                EntityKind::DatabaseOptions,
                other,
                "recovery model must be FULL, BULK_LOGGED or SIMPLE",
            )),
        }
    }
}

/// Engine options of a database. On input, `None` leaves an option as is;
/// on output every option the engine reports is `Some`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseOptions {
    /// Default collation.
    pub collation: Option<String>,
    /// Compatibility level, e.g. 150.
    pub compatibility_level: Option<i32>,
    /// Recovery model.
    pub recovery_model: Option<RecoveryModel>,
    /// `ALLOW_SNAPSHOT_ISOLATION`
    pub allow_snapshot_isolation: Option<bool>,
    /// `READ_COMMITTED_SNAPSHOT`
    pub read_committed_snapshot: Option<bool>,
    /// `AUTO_CLOSE`
    pub auto_close: Option<bool>,
    /// `AUTO_SHRINK`
    pub auto_shrink: Option<bool>,
    /// `AUTO_CREATE_STATISTICS`
    pub auto_create_statistics: Option<bool>,
    /// `AUTO_UPDATE_STATISTICS`
    pub auto_update_statistics: Option<bool>,
    /// `AUTO_UPDATE_STATISTICS_ASYNC`
    pub auto_update_statistics_async: Option<bool>,
}

impl DatabaseOptions {
    /// The `SET` flags as (keyword, value) pairs, in the order they are applied.
    pub fn flags(&self) -> Vec<(&'static str, bool)> {
        [
            ("ALLOW_SNAPSHOT_ISOLATION", self.allow_snapshot_isolation),
            ("READ_COMMITTED_SNAPSHOT", self.read_committed_snapshot),
            ("AUTO_CLOSE", self.auto_close),
            ("AUTO_SHRINK", self.auto_shrink),
            ("AUTO_CREATE_STATISTICS", self.auto_create_statistics),
            ("AUTO_UPDATE_STATISTICS", self.auto_update_statistics),
            (
                "AUTO_UPDATE_STATISTICS_ASYNC",
                self.auto_update_statistics_async,
            ),
        ]
        .into_iter()
        .filter_map(|(keyword, value)| value.map(|v| (keyword, v)))
        .collect()
    }

    /// Overlay `other` onto `self`: options set in `other` win.
    pub fn merge(&self, other: &DatabaseOptions) -> DatabaseOptions {
        DatabaseOptions {
            collation: other.collation.clone().or_else(|| self.collation.clone()),
            compatibility_level: other.compatibility_level.or(self.compatibility_level),
            recovery_model: other.recovery_model.or(self.recovery_model),
            allow_snapshot_isolation: other
                .allow_snapshot_isolation
                .or(self.allow_snapshot_isolation),
            read_committed_snapshot: other
                .read_committed_snapshot
                .or(self.read_committed_snapshot),
            auto_close: other.auto_close.or(self.auto_close),
            auto_shrink: other.auto_shrink.or(self.auto_shrink),
            auto_create_statistics: other
                .auto_create_statistics
                .or(self.auto_create_statistics),
            auto_update_statistics: other
                .auto_update_statistics
                .or(self.auto_update_statistics),
            auto_update_statistics_async: other
                .auto_update_statistics_async
                .or(self.auto_update_statistics_async),
        }
    }

    /// Check the compatibility level against the levels the engine accepts.
    pub fn validate(&self, database: &str) -> Result<()> {
        if let Some(level) = self.compatibility_level {
            if !COMPATIBILITY_LEVELS.contains(&level) {
                return Err(Error::validation(
                    EntityKind::DatabaseOptions,
                    database,
                    format!("unsupported compatibility level {level}"),
                ));
            }
        }
        if let Some(collation) = &self.collation {
            crate::securable::token(collation, EntityKind::DatabaseOptions, "collation")?;
        }
        Ok(())
    }
}

/// Compatibility levels accepted by `ALTER DATABASE .. SET COMPATIBILITY_LEVEL`.
pub const COMPATIBILITY_LEVELS: &[i32] = &[80, 90, 100, 110, 120, 130, 140, 150, 160, 170];

/// A database scoped configuration setting.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopedConfiguration {
    /// Configuration key, e.g. `MAXDOP`.
    pub name: String,
    /// Value on the primary.
    pub value: String,
    /// Value on secondary replicas. `None` means "same as primary".
    pub value_for_secondary: Option<String>,
}

/// Engine default for the scoped configuration keys that `clear` can reset.
pub fn scoped_configuration_default(key: &str) -> Option<&'static str> {
    let default = match key.trim().to_uppercase().as_str() {
        "MAXDOP" => "0",
        "LEGACY_CARDINALITY_ESTIMATION" => "OFF",
        "PARAMETER_SNIFFING" => "ON",
        "QUERY_OPTIMIZER_HOTFIXES" => "OFF",
        "IDENTITY_CACHE" => "ON",
        "OPTIMIZE_FOR_AD_HOC_WORKLOADS" => "OFF",
        "XTP_PROCEDURE_EXECUTION_STATISTICS" => "OFF",
        "XTP_QUERY_EXECUTION_STATISTICS" => "OFF",
        "BATCH_MODE_ON_ROWSTORE" => "ON",
        "BATCH_MODE_MEMORY_GRANT_FEEDBACK" => "ON",
        "BATCH_MODE_ADAPTIVE_JOINS" => "ON",
        "TSQL_SCALAR_UDF_INLINING" => "ON",
        "ELEVATE_ONLINE" => "OFF",
        "ELEVATE_RESUMABLE" => "OFF",
        "LAST_QUERY_PLAN_STATS" => "OFF",
        "ISOLATE_SECURITY_POLICY_CARDINALITY" => "OFF",
        _ => return None,
    };
    Some(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_skip_unset_options() {
        let opts = DatabaseOptions {
            auto_close: Some(false),
            allow_snapshot_isolation: Some(true),
            ..Default::default()
        };
        assert_eq!(
            opts.flags(),
            vec![("ALLOW_SNAPSHOT_ISOLATION", true), ("AUTO_CLOSE", false)]
        );
    }

    #[test]
    fn merge_prefers_the_overlay() {
        let base = DatabaseOptions {
            compatibility_level: Some(140),
            auto_shrink: Some(true),
            ..Default::default()
        };
        let overlay = DatabaseOptions {
            compatibility_level: Some(150),
            ..Default::default()
        };
        let merged = base.merge(&overlay);
        assert_eq!(merged.compatibility_level, Some(150));
        assert_eq!(merged.auto_shrink, Some(true));
    }

    #[test]
    fn validate_checks_level_and_collation() {
        let opts = DatabaseOptions {
            compatibility_level: Some(151),
            ..Default::default()
        };
        assert!(opts.validate("db1").is_err());
        let opts = DatabaseOptions {
            collation: Some("Latin1_General_CI_AS".to_owned()),
            compatibility_level: Some(150),
            ..Default::default()
        };
        assert!(opts.validate("db1").is_ok());
    }

    #[test]
    fn recovery_model_round_trips_through_text() {
        for model in [
            RecoveryModel::Full,
            RecoveryModel::BulkLogged,
            RecoveryModel::Simple,
        ] {
            assert_eq!(
                RecoveryModel::try_from(model.to_string().as_str()).unwrap(),
                model
            );
        }
        assert!(RecoveryModel::try_from("PARTIAL").is_err());
    }

    #[test]
    fn known_scoped_defaults() {
        assert_eq!(scoped_configuration_default("maxdop"), Some("0"));
        assert_eq!(scoped_configuration_default("NOT_A_KEY"), None);
    }
}
