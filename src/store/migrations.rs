//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `init_schema()` checks the
//! current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS cities (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                country TEXT NOT NULL,
                lat REAL NOT NULL,
                lng REAL NOT NULL,
                population INTEGER NOT NULL,
                unit_preference TEXT NOT NULL DEFAULT 'metric',
                stats TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (name, country)
            );

            CREATE TABLE IF NOT EXISTS modules (
                id TEXT PRIMARY KEY,
                slug TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS hotspots (
                id TEXT PRIMARY KEY,
                city_id TEXT NOT NULL REFERENCES cities(id) ON DELETE CASCADE,
                module_id TEXT NOT NULL REFERENCES modules(id),
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                lat REAL NOT NULL,
                lng REAL NOT NULL,
                address TEXT,
                neighborhood TEXT,
                severity TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                metrics TEXT NOT NULL DEFAULT '[]',
                display_value TEXT,
                detected_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_hotspots_city ON hotspots(city_id);
            CREATE INDEX IF NOT EXISTS idx_hotspots_city_module ON hotspots(city_id, module_id);

            CREATE TABLE IF NOT EXISTS quick_wins (
                id TEXT PRIMARY KEY,
                city_id TEXT NOT NULL REFERENCES cities(id) ON DELETE CASCADE,
                module_id TEXT NOT NULL REFERENCES modules(id),
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                impact TEXT NOT NULL,
                effort TEXT NOT NULL,
                estimated_days INTEGER,
                co2_reduction_tons REAL,
                tags TEXT NOT NULL DEFAULT '[]',
                steps TEXT,
                sort_order INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_quick_wins_city ON quick_wins(city_id);
            CREATE INDEX IF NOT EXISTS idx_quick_wins_active ON quick_wins(city_id, is_active);
        "#,
    },
    Migration {
        version: 2,
        name: "onboarding_runs",
        sql: r#"
            CREATE TABLE IF NOT EXISTS onboarding_runs (
                id TEXT PRIMARY KEY,
                city_id TEXT NOT NULL REFERENCES cities(id) ON DELETE CASCADE,
                status TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_onboarding_runs_city ON onboarding_runs(city_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_onboarding_runs_status ON onboarding_runs(status);
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn init_schema(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    if tracing::enabled!(tracing::Level::DEBUG) {
        let version = get_current_version(conn).await?;
        tracing::debug!(version = version, "Database migrations complete");
    }
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => row.get::<i64>(0).map_err(|e| {
            DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
        }),
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
