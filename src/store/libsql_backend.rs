//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Timestamps are written as
//! fixed-width RFC 3339 (microseconds, `Z`) so they sort lexically.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params, params_from_iter};
use tracing::{debug, info};
use uuid::Uuid;

use crate::city::model::{City, CityProfile, CityStats, Coordinates};
use crate::content::model::{
    Hotspot, HotspotDraft, HotspotStatus, Level, Metric, QuickWin, QuickWinDraft, Severity,
};
use crate::error::DatabaseError;
use crate::onboarding::state::OnboardingRun;
use crate::store::migrations;
use crate::store::traits::{Database, ModuleRecord};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical write format for timestamps.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_uuid(s: &str, what: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::Serialization(format!("{what} id {s}: {e}")))
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_real(v: Option<f64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Real(v),
        None => libsql::Value::Null,
    }
}

fn opt_integer(v: Option<u32>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Integer(i64::from(v)),
        None => libsql::Value::Null,
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(s: &str, what: &str) -> Result<T, DatabaseError> {
    serde_json::from_str(s).map_err(|e| DatabaseError::Serialization(format!("{what}: {e}")))
}

fn query_err(op: &str) -> impl Fn(libsql::Error) -> DatabaseError + '_ {
    move |e| DatabaseError::Query(format!("{op}: {e}"))
}

/// Map a unique-index violation to `Constraint`, anything else to `Query`.
fn write_err(op: &str) -> impl Fn(libsql::Error) -> DatabaseError + '_ {
    move |e| {
        let msg = e.to_string();
        if msg.contains("UNIQUE constraint failed") {
            DatabaseError::Constraint(format!("{op}: {msg}"))
        } else {
            DatabaseError::Query(format!("{op}: {msg}"))
        }
    }
}

/// `(?1, ?2, ..), (?n+1, ..)` placeholders for a multi-row insert.
fn row_placeholders(rows: usize, columns: usize) -> String {
    (0..rows)
        .map(|r| {
            let cols = (1..=columns)
                .map(|c| format!("?{}", r * columns + c))
                .collect::<Vec<_>>()
                .join(", ");
            format!("({cols})")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

const CITY_COLUMNS: &str =
    "id, name, country, lat, lng, population, unit_preference, stats, created_at, updated_at";

const MODULE_COLUMNS: &str = "id, slug, name, created_at";

const HOTSPOT_COLUMNS: &str = "id, city_id, module_id, name, description, lat, lng, address, neighborhood, severity, status, metrics, display_value, detected_at, created_at, updated_at";
const HOTSPOT_COLUMN_COUNT: usize = 16;

const QUICK_WIN_COLUMNS: &str = "id, city_id, module_id, title, description, impact, effort, estimated_days, co2_reduction_tons, tags, steps, sort_order, is_active, created_at, updated_at";
const QUICK_WIN_COLUMN_COUNT: usize = 15;

/// Map a libsql Row to a City. Column order matches CITY_COLUMNS.
fn row_to_city(row: &libsql::Row) -> Result<City, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("city row parse: {e}"));

    let id: String = row.get(0).map_err(get_err)?;
    let unit_str: String = row.get(6).map_err(get_err)?;
    let stats_str: Option<String> = row.get(7).ok();
    let created_str: String = row.get(8).map_err(get_err)?;
    let updated_str: String = row.get(9).map_err(get_err)?;

    let stats = match stats_str {
        Some(s) => Some(from_json::<CityStats>(&s, "city stats")?),
        None => None,
    };

    Ok(City {
        id: parse_uuid(&id, "city")?,
        profile: CityProfile {
            name: row.get(1).map_err(get_err)?,
            country: row.get(2).map_err(get_err)?,
            coordinates: Coordinates::new(
                row.get(3).map_err(get_err)?,
                row.get(4).map_err(get_err)?,
            ),
            population: row.get::<i64>(5).map_err(get_err)?.max(0) as u64,
            unit_preference: unit_str.parse().unwrap_or_default(),
        },
        stats,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

fn row_to_module(row: &libsql::Row) -> Result<ModuleRecord, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("module row parse: {e}"));
    let id: String = row.get(0).map_err(get_err)?;
    let created_str: String = row.get(3).map_err(get_err)?;
    Ok(ModuleRecord {
        id: parse_uuid(&id, "module")?,
        slug: row.get(1).map_err(get_err)?,
        name: row.get(2).map_err(get_err)?,
        created_at: parse_datetime(&created_str),
    })
}

/// Column order matches HOTSPOT_COLUMNS.
fn row_to_hotspot(row: &libsql::Row) -> Result<Hotspot, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("hotspot row parse: {e}"));

    let id: String = row.get(0).map_err(get_err)?;
    let city_id: String = row.get(1).map_err(get_err)?;
    let module_id: String = row.get(2).map_err(get_err)?;
    let severity: String = row.get(9).map_err(get_err)?;
    let status: String = row.get(10).map_err(get_err)?;
    let metrics: String = row.get(11).map_err(get_err)?;
    let detected_str: String = row.get(13).map_err(get_err)?;
    let created_str: String = row.get(14).map_err(get_err)?;
    let updated_str: String = row.get(15).map_err(get_err)?;

    Ok(Hotspot {
        id: parse_uuid(&id, "hotspot")?,
        city_id: parse_uuid(&city_id, "city")?,
        module_id: parse_uuid(&module_id, "module")?,
        content: HotspotDraft {
            name: row.get(3).map_err(get_err)?,
            description: row.get(4).map_err(get_err)?,
            coordinates: Coordinates::new(
                row.get(5).map_err(get_err)?,
                row.get(6).map_err(get_err)?,
            ),
            address: row.get(7).ok(),
            neighborhood: row.get(8).ok(),
            severity: Severity::parse(&severity).unwrap_or_default(),
            metrics: from_json::<Vec<Metric>>(&metrics, "hotspot metrics")?,
            display_value: row.get(12).ok(),
        },
        status: HotspotStatus::parse(&status),
        detected_at: parse_datetime(&detected_str),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

/// Column order matches QUICK_WIN_COLUMNS.
fn row_to_quick_win(row: &libsql::Row) -> Result<QuickWin, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("quick win row parse: {e}"));

    let id: String = row.get(0).map_err(get_err)?;
    let city_id: String = row.get(1).map_err(get_err)?;
    let module_id: String = row.get(2).map_err(get_err)?;
    let impact: String = row.get(5).map_err(get_err)?;
    let effort: String = row.get(6).map_err(get_err)?;
    let estimated_days: Option<i64> = row.get(7).ok();
    let tags: String = row.get(9).map_err(get_err)?;
    let steps: Option<String> = row.get(10).ok();
    let sort_order: i64 = row.get(11).map_err(get_err)?;
    let is_active: i64 = row.get(12).map_err(get_err)?;
    let created_str: String = row.get(13).map_err(get_err)?;
    let updated_str: String = row.get(14).map_err(get_err)?;

    let steps = match steps {
        Some(s) => Some(from_json::<Vec<String>>(&s, "quick win steps")?),
        None => None,
    };

    Ok(QuickWin {
        id: parse_uuid(&id, "quick win")?,
        city_id: parse_uuid(&city_id, "city")?,
        module_id: parse_uuid(&module_id, "module")?,
        content: QuickWinDraft {
            title: row.get(3).map_err(get_err)?,
            description: row.get(4).map_err(get_err)?,
            impact: Level::parse(&impact).unwrap_or_default(),
            effort: Level::parse(&effort).unwrap_or_default(),
            estimated_days: estimated_days.and_then(|d| u32::try_from(d).ok()),
            co2_reduction_tons: row.get(8).ok(),
            tags: from_json::<Vec<String>>(&tags, "quick win tags")?,
            steps,
            sort_order: u32::try_from(sort_order).unwrap_or(0),
        },
        is_active: is_active != 0,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::init_schema(self.conn()).await
    }

    // ── Cities ──────────────────────────────────────────────────────

    async fn insert_city(&self, city: &City) -> Result<(), DatabaseError> {
        let stats = match &city.stats {
            Some(stats) => libsql::Value::Text(to_json(stats)?),
            None => libsql::Value::Null,
        };
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO cities ({CITY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    city.id.to_string(),
                    city.profile.name.clone(),
                    city.profile.country.clone(),
                    city.profile.coordinates.lat,
                    city.profile.coordinates.lng,
                    i64::try_from(city.profile.population).unwrap_or(i64::MAX),
                    city.profile.unit_preference.to_string(),
                    stats,
                    ts(&city.created_at),
                    ts(&city.updated_at),
                ],
            )
            .await
            .map_err(write_err("insert_city"))?;
        debug!(city_id = %city.id, name = %city.profile.name, "City inserted");
        Ok(())
    }

    async fn get_city(&self, id: Uuid) -> Result<Option<City>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {CITY_COLUMNS} FROM cities WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(query_err("get_city"))?;

        match rows.next().await.map_err(query_err("get_city"))? {
            Some(row) => Ok(Some(row_to_city(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_city_by_name(
        &self,
        name: &str,
        country: &str,
    ) -> Result<Option<City>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {CITY_COLUMNS} FROM cities WHERE name = ?1 AND country = ?2"),
                params![name, country],
            )
            .await
            .map_err(query_err("find_city_by_name"))?;

        match rows.next().await.map_err(query_err("find_city_by_name"))? {
            Some(row) => Ok(Some(row_to_city(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_city_stats(&self, id: Uuid, stats: &CityStats) -> Result<(), DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE cities SET stats = ?1, updated_at = ?2 WHERE id = ?3",
                params![to_json(stats)?, ts(&Utc::now()), id.to_string()],
            )
            .await
            .map_err(query_err("update_city_stats"))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "city".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    // ── Module catalog ──────────────────────────────────────────────

    async fn upsert_module(&self, slug: &str, name: &str) -> Result<ModuleRecord, DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO modules (id, slug, name, created_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(slug) DO UPDATE SET name = excluded.name",
                params![Uuid::new_v4().to_string(), slug, name, ts(&Utc::now())],
            )
            .await
            .map_err(write_err("upsert_module"))?;

        self.get_module_by_slug(slug)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "module".into(),
                id: slug.to_string(),
            })
    }

    async fn get_module_by_slug(&self, slug: &str) -> Result<Option<ModuleRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MODULE_COLUMNS} FROM modules WHERE slug = ?1"),
                params![slug],
            )
            .await
            .map_err(query_err("get_module_by_slug"))?;

        match rows.next().await.map_err(query_err("get_module_by_slug"))? {
            Some(row) => Ok(Some(row_to_module(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_modules(&self) -> Result<Vec<ModuleRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MODULE_COLUMNS} FROM modules ORDER BY slug"),
                (),
            )
            .await
            .map_err(query_err("list_modules"))?;

        let mut modules = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err("list_modules"))? {
            modules.push(row_to_module(&row)?);
        }
        Ok(modules)
    }

    // ── Generated content ───────────────────────────────────────────

    async fn insert_hotspots(&self, hotspots: &[Hotspot]) -> Result<(), DatabaseError> {
        if hotspots.is_empty() {
            return Ok(());
        }

        let mut values: Vec<libsql::Value> =
            Vec::with_capacity(hotspots.len() * HOTSPOT_COLUMN_COUNT);
        for h in hotspots {
            let c = &h.content;
            values.extend([
                h.id.to_string().into(),
                h.city_id.to_string().into(),
                h.module_id.to_string().into(),
                c.name.clone().into(),
                c.description.clone().into(),
                c.coordinates.lat.into(),
                c.coordinates.lng.into(),
                opt_text(c.address.as_deref()),
                opt_text(c.neighborhood.as_deref()),
                c.severity.as_str().into(),
                h.status.as_str().into(),
                to_json(&c.metrics)?.into(),
                opt_text(c.display_value.as_deref()),
                ts(&h.detected_at).into(),
                ts(&h.created_at).into(),
                ts(&h.updated_at).into(),
            ]);
        }

        // One multi-row statement so a batch lands atomically.
        let sql = format!(
            "INSERT INTO hotspots ({HOTSPOT_COLUMNS}) VALUES {}",
            row_placeholders(hotspots.len(), HOTSPOT_COLUMN_COUNT)
        );
        self.conn()
            .execute(&sql, params_from_iter(values))
            .await
            .map_err(write_err("insert_hotspots"))?;
        Ok(())
    }

    async fn list_hotspots_by_city(&self, city_id: Uuid) -> Result<Vec<Hotspot>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {HOTSPOT_COLUMNS} FROM hotspots WHERE city_id = ?1 ORDER BY module_id, created_at, id"
                ),
                params![city_id.to_string()],
            )
            .await
            .map_err(query_err("list_hotspots_by_city"))?;

        let mut hotspots = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err("list_hotspots_by_city"))? {
            hotspots.push(row_to_hotspot(&row)?);
        }
        Ok(hotspots)
    }

    async fn insert_quick_wins(&self, quick_wins: &[QuickWin]) -> Result<(), DatabaseError> {
        if quick_wins.is_empty() {
            return Ok(());
        }

        let mut values: Vec<libsql::Value> =
            Vec::with_capacity(quick_wins.len() * QUICK_WIN_COLUMN_COUNT);
        for q in quick_wins {
            let c = &q.content;
            let steps = match &c.steps {
                Some(steps) => libsql::Value::Text(to_json(steps)?),
                None => libsql::Value::Null,
            };
            values.extend([
                q.id.to_string().into(),
                q.city_id.to_string().into(),
                q.module_id.to_string().into(),
                c.title.clone().into(),
                c.description.clone().into(),
                c.impact.as_str().into(),
                c.effort.as_str().into(),
                opt_integer(c.estimated_days),
                opt_real(c.co2_reduction_tons),
                to_json(&c.tags)?.into(),
                steps,
                libsql::Value::Integer(i64::from(c.sort_order)),
                libsql::Value::Integer(i64::from(q.is_active)),
                ts(&q.created_at).into(),
                ts(&q.updated_at).into(),
            ]);
        }

        let sql = format!(
            "INSERT INTO quick_wins ({QUICK_WIN_COLUMNS}) VALUES {}",
            row_placeholders(quick_wins.len(), QUICK_WIN_COLUMN_COUNT)
        );
        self.conn()
            .execute(&sql, params_from_iter(values))
            .await
            .map_err(write_err("insert_quick_wins"))?;
        Ok(())
    }

    async fn list_quick_wins_by_city(
        &self,
        city_id: Uuid,
    ) -> Result<Vec<QuickWin>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {QUICK_WIN_COLUMNS} FROM quick_wins WHERE city_id = ?1 AND is_active = 1 ORDER BY module_id, sort_order, id"
                ),
                params![city_id.to_string()],
            )
            .await
            .map_err(query_err("list_quick_wins_by_city"))?;

        let mut quick_wins = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(query_err("list_quick_wins_by_city"))?
        {
            quick_wins.push(row_to_quick_win(&row)?);
        }
        Ok(quick_wins)
    }

    // ── Onboarding runs ─────────────────────────────────────────────

    async fn save_onboarding_run(&self, run: &OnboardingRun) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO onboarding_runs (id, city_id, status, payload, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    status = excluded.status,
                    payload = excluded.payload,
                    updated_at = excluded.updated_at",
                params![
                    run.id.to_string(),
                    run.city_id.to_string(),
                    run.status.as_str(),
                    to_json(run)?,
                    ts(&run.started_at),
                    ts(&run.updated_at),
                ],
            )
            .await
            .map_err(write_err("save_onboarding_run"))?;
        Ok(())
    }

    async fn get_onboarding_run(
        &self,
        city_id: Uuid,
    ) -> Result<Option<OnboardingRun>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT payload FROM onboarding_runs WHERE city_id = ?1
                 ORDER BY created_at DESC, updated_at DESC LIMIT 1",
                params![city_id.to_string()],
            )
            .await
            .map_err(query_err("get_onboarding_run"))?;

        match rows.next().await.map_err(query_err("get_onboarding_run"))? {
            Some(row) => {
                let payload: String = row.get(0).map_err(query_err("get_onboarding_run"))?;
                Ok(Some(from_json(&payload, "onboarding run")?))
            }
            None => Ok(None),
        }
    }

    async fn list_unfinished_onboarding_runs(&self) -> Result<Vec<OnboardingRun>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT payload FROM onboarding_runs
                 WHERE status IN ('pending', 'generating') ORDER BY created_at",
                (),
            )
            .await
            .map_err(query_err("list_unfinished_onboarding_runs"))?;

        let mut runs = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(query_err("list_unfinished_onboarding_runs"))?
        {
            let payload: String = row
                .get(0)
                .map_err(query_err("list_unfinished_onboarding_runs"))?;
            runs.push(from_json(&payload, "onboarding run")?);
        }
        Ok(runs)
    }
}
