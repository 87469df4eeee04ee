//! The ordered set of schema migrations this crate knows how to apply.
//!
//! Migrations are plain values: a version, a description, and a function
//! that mutates the schema through the connection it is handed. The runner
//! always hands it the open transaction for that migration, so whatever the
//! function does commits or rolls back together with the version record.
//!
//! New migrations are appended to [`BUILTIN`] with the next version number.
//! There is no discovery; the list is explicit and total.

use rusqlite::Connection;

use crate::migrations::MigrationError;

/// The unit of work a migration performs.
pub type ApplyFn = fn(&Connection) -> rusqlite::Result<()>;

/// A single versioned, forward-only schema change.
#[derive(Clone, Copy)]
pub struct Migration {
    /// Ordering key. Unique and positive.
    pub version: i64,
    /// Human readable summary, stored alongside the version when applied.
    pub description: &'static str,
    /// Executes the migration's DDL and/or DML.
    pub apply: ApplyFn,
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

fn initial_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(include_str!("migrations/001_initial_schema.sql"))
}

fn add_user_status(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(include_str!("migrations/002_user_status.sql"))
}

fn add_audit_log(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(include_str!("migrations/003_audit_log.sql"))
}

/// All built-in migrations. New migrations are appended here.
const BUILTIN: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial database schema with users table",
        apply: initial_schema,
    },
    Migration {
        version: 2,
        description: "Add status column to users table",
        apply: add_user_status,
    },
    Migration {
        version: 3,
        description: "Add audit logging table",
        apply: add_audit_log,
    },
];

/// An ordered, duplicate-free sequence of migrations.
#[derive(Debug, Clone)]
pub struct MigrationRegistry {
    migrations: Vec<Migration>,
}

impl MigrationRegistry {
    /// Builds a registry, sorting the definitions by version.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::InvalidVersion` for a version below 1 and
    /// `MigrationError::DuplicateDefinition` if two definitions share a
    /// version.
    pub fn new(mut migrations: Vec<Migration>) -> Result<Self, MigrationError> {
        if let Some(bad) = migrations.iter().find(|m| m.version < 1) {
            return Err(MigrationError::InvalidVersion(bad.version));
        }

        migrations.sort_by_key(|m| m.version);

        if let Some(pair) = migrations
            .windows(2)
            .find(|pair| pair[0].version == pair[1].version)
        {
            return Err(MigrationError::DuplicateDefinition(pair[0].version));
        }

        Ok(Self { migrations })
    }

    /// The registry of migrations shipped with this crate.
    ///
    /// # Errors
    ///
    /// Fails only if the built-in list itself is malformed.
    pub fn builtin() -> Result<Self, MigrationError> {
        Self::new(BUILTIN.to_vec())
    }

    /// All migrations in ascending version order.
    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Migrations with a version strictly greater than `current`, ascending.
    pub fn pending(&self, current: i64) -> impl Iterator<Item = &Migration> {
        self.migrations.iter().filter(move |m| m.version > current)
    }

    /// The highest registered version, or 0 for an empty registry.
    pub fn latest_version(&self) -> i64 {
        self.migrations.last().map_or(0, |m| m.version)
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &Connection) -> rusqlite::Result<()> {
        Ok(())
    }

    fn def(version: i64) -> Migration {
        Migration {
            version,
            description: "test",
            apply: noop,
        }
    }

    #[test]
    fn builtin_registry_is_ordered() {
        let registry = MigrationRegistry::builtin().expect("builtin registry should be valid");
        let versions: Vec<i64> = registry.migrations().iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert_eq!(registry.latest_version(), 3);
    }

    #[test]
    fn unordered_definitions_are_sorted() {
        let registry = MigrationRegistry::new(vec![def(3), def(1), def(2)]).unwrap();
        let versions: Vec<i64> = registry.migrations().iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[test]
    fn duplicate_versions_are_rejected() {
        let err = MigrationRegistry::new(vec![def(1), def(2), def(2)]).unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateDefinition(2)));
    }

    #[test]
    fn non_positive_versions_are_rejected() {
        let err = MigrationRegistry::new(vec![def(0), def(1)]).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidVersion(0)));
    }

    #[test]
    fn pending_skips_applied_versions() {
        let registry = MigrationRegistry::new(vec![def(1), def(2), def(3)]).unwrap();
        let pending: Vec<i64> = registry.pending(1).map(|m| m.version).collect();
        assert_eq!(pending, vec![2, 3]);
        assert_eq!(registry.pending(3).count(), 0);
    }

    #[test]
    fn empty_registry_has_version_zero() {
        let registry = MigrationRegistry::new(Vec::new()).unwrap();
        assert!(registry.is_empty());
        assert_eq!(registry.latest_version(), 0);
    }
}
