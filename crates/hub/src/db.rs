use anyhow::{Context, Result};
use irrigation_sim::Metric;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;

use crate::automation::{AutomationRules, RuleSet};
use crate::scheduler::{Day, Schedule};
use crate::thresholds::ThresholdsPatch;

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

/// Named threshold preset for a crop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub description: String,
    pub thresholds: ThresholdsPatch,
    /// Seeded from the config file; cannot be deleted or overwritten by
    /// clients.
    #[serde(default)]
    pub builtin: bool,
}

impl Db {
    /// db_url examples:
    /// - "sqlite:irrigation.db?mode=rwc"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    // ----------------------------
    // Profiles
    // ----------------------------

    pub async fn upsert_profile(&self, p: &Profile) -> Result<()> {
        let thresholds =
            serde_json::to_string(&p.thresholds).context("serialize profile thresholds")?;
        sqlx::query(
            r#"
            INSERT INTO profiles (id, name, icon, description, thresholds, builtin)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
              name=excluded.name,
              icon=excluded.icon,
              description=excluded.description,
              thresholds=excluded.thresholds,
              builtin=excluded.builtin
            "#,
        )
        .bind(&p.id)
        .bind(&p.name)
        .bind(&p.icon)
        .bind(&p.description)
        .bind(thresholds)
        .bind(p.builtin)
        .execute(&self.pool)
        .await
        .with_context(|| format!("upsert_profile failed: {}", p.id))?;
        Ok(())
    }

    /// Builtin profiles first, then by id.
    pub async fn load_profiles(&self) -> Result<Vec<Profile>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, icon, description, thresholds, builtin
            FROM profiles
            ORDER BY builtin DESC, id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("load_profiles failed")?;

        rows.iter().map(profile_from_row).collect()
    }

    pub async fn get_profile(&self, id: &str) -> Result<Option<Profile>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, icon, description, thresholds, builtin
            FROM profiles
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("get_profile failed")?;

        row.as_ref().map(profile_from_row).transpose()
    }

    /// Removes a client-created profile.  Returns `false` if the id is
    /// unknown or builtin.
    pub async fn delete_profile(&self, id: &str) -> Result<bool> {
        let res = sqlx::query("DELETE FROM profiles WHERE id = ? AND builtin = 0")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("delete_profile failed")?;
        Ok(res.rows_affected() > 0)
    }

    // ----------------------------
    // Automation rules
    // ----------------------------

    pub async fn upsert_rule(&self, metric: Metric, rule: &RuleSet) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO automation_rules (metric, if_below_min, if_below_optimal, if_above_max)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(metric) DO UPDATE SET
              if_below_min=excluded.if_below_min,
              if_below_optimal=excluded.if_below_optimal,
              if_above_max=excluded.if_above_max
            "#,
        )
        .bind(metric.as_str())
        .bind(&rule.if_below_min)
        .bind(&rule.if_below_optimal)
        .bind(&rule.if_above_max)
        .execute(&self.pool)
        .await
        .with_context(|| format!("upsert_rule failed: {metric}"))?;
        Ok(())
    }

    /// Rows with an unrecognised metric key are skipped.
    pub async fn load_automation_rules(&self) -> Result<AutomationRules> {
        let rows = sqlx::query(
            r#"
            SELECT metric, if_below_min, if_below_optimal, if_above_max
            FROM automation_rules
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("load_automation_rules failed")?;

        let mut rules = AutomationRules::new();
        for r in &rows {
            let key: String = r.try_get("metric")?;
            let Ok(metric) = key.parse::<Metric>() else {
                tracing::warn!(metric = %key, "skipping rule for unknown metric");
                continue;
            };
            rules.insert(
                metric,
                RuleSet {
                    if_below_min: r.try_get("if_below_min")?,
                    if_below_optimal: r.try_get("if_below_optimal")?,
                    if_above_max: r.try_get("if_above_max")?,
                },
            );
        }
        Ok(rules)
    }

    // ----------------------------
    // Schedules
    // ----------------------------

    pub async fn upsert_schedule(&self, s: &Schedule) -> Result<()> {
        let days = serde_json::to_string(&s.days).context("serialize schedule days")?;
        let duration = i64::try_from(s.duration).context("schedule duration out of range")?;
        sqlx::query(
            r#"
            INSERT INTO schedules (id, time, days, duration_sec, enabled)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
              time=excluded.time,
              days=excluded.days,
              duration_sec=excluded.duration_sec,
              enabled=excluded.enabled
            "#,
        )
        .bind(&s.id)
        .bind(&s.time)
        .bind(days)
        .bind(duration)
        .bind(s.enabled)
        .execute(&self.pool)
        .await
        .with_context(|| format!("upsert_schedule failed: {}", s.id))?;
        Ok(())
    }

    pub async fn load_schedules(&self) -> Result<Vec<Schedule>> {
        let rows = sqlx::query(
            r#"
            SELECT id, time, days, duration_sec, enabled
            FROM schedules
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("load_schedules failed")?;

        rows.iter()
            .map(|r| -> Result<Schedule> {
                let id: String = r.try_get("id")?;
                let days: String = r.try_get("days")?;
                let days: Vec<Day> = serde_json::from_str(&days)
                    .with_context(|| format!("bad days column for schedule {id}"))?;
                let duration: i64 = r.try_get("duration_sec")?;
                Ok(Schedule {
                    time: r.try_get("time")?,
                    days,
                    duration: u64::try_from(duration).unwrap_or(0),
                    enabled: r.try_get("enabled")?,
                    id,
                })
            })
            .collect()
    }

    pub async fn delete_schedule(&self, id: &str) -> Result<bool> {
        let res = sqlx::query("DELETE FROM schedules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("delete_schedule failed")?;
        Ok(res.rows_affected() > 0)
    }
}

fn profile_from_row(r: &SqliteRow) -> Result<Profile> {
    let id: String = r.try_get("id")?;
    let thresholds: String = r.try_get("thresholds")?;
    let thresholds = serde_json::from_str(&thresholds)
        .with_context(|| format!("bad thresholds column for profile {id}"))?;
    Ok(Profile {
        name: r.try_get("name")?,
        icon: r.try_get("icon")?,
        description: r.try_get("description")?,
        thresholds,
        builtin: r.try_get("builtin")?,
        id,
    })
}
