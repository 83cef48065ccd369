/// Run persistence operations
///
/// Records each research run, the rollout of every completed cycle, and the
/// final status. All queries are parameterized.
use crate::agent::Rollout;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::time::{SystemTime, UNIX_EPOCH};

/// Run status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "running" => RunStatus::Running,
            "completed" => RunStatus::Completed,
            _ => RunStatus::Failed,
        }
    }
}

/// Run record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub question: String,
    pub status: RunStatus,
    pub provider_used: Option<String>,
    pub output: Option<String>,
    pub errors: Vec<String>,
    pub cycles: i64,
    pub duration_ms: Option<i64>,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

impl RunRecord {
    fn from_row(r: &SqliteRow) -> Result<Self> {
        let errors: String = r.get("errors");
        Ok(Self {
            id: r.get("id"),
            question: r.get("question"),
            status: RunStatus::parse(r.get::<String, _>("status").as_str()),
            provider_used: r.get("provider_used"),
            output: r.get("output"),
            errors: serde_json::from_str(&errors).context("Corrupt errors column")?,
            cycles: r.get("cycles"),
            duration_ms: r.get("duration_ms"),
            created_at: r.get("created_at"),
            completed_at: r.get("completed_at"),
        })
    }
}

/// One completed cycle of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCycle {
    pub run_id: String,
    pub cycle: i64,
    pub summary: String,
    pub rollout: Rollout,
    pub created_at: i64,
}

/// How a run finished, for `finish_run`
#[derive(Debug, Clone)]
pub struct RunSummary<'a> {
    pub status: RunStatus,
    pub provider_used: &'a str,
    pub output: Option<&'a str>,
    pub errors: &'a [String],
    pub cycles: usize,
    pub duration_ms: i64,
}

const RUN_COLUMNS: &str = "id, question, status, provider_used, output, errors, cycles, duration_ms, created_at, completed_at";

fn now_secs() -> Result<i64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as i64)
}

/// Run repository for database operations
pub struct RunRepository {
    pool: SqlitePool,
}

impl RunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new run in the `running` state
    pub async fn create_run(&self, id: &str, question: &str) -> Result<RunRecord> {
        let now = now_secs()?;

        sqlx::query("INSERT INTO runs (id, question, status, created_at) VALUES (?, ?, ?, ?)")
            .bind(id)
            .bind(question)
            .bind(RunStatus::Running.as_str())
            .bind(now)
            .execute(&self.pool)
            .await
            .context("Failed to create run")?;

        Ok(RunRecord {
            id: id.to_string(),
            question: question.to_string(),
            status: RunStatus::Running,
            provider_used: None,
            output: None,
            errors: Vec::new(),
            cycles: 0,
            duration_ms: None,
            created_at: now,
            completed_at: None,
        })
    }

    /// Store the rollout of a completed cycle
    ///
    /// The summary is the last message of the rollout.
    pub async fn record_cycle(&self, run_id: &str, rollout: &Rollout) -> Result<()> {
        let now = now_secs()?;
        let summary = rollout
            .messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let rollout_json = serde_json::to_string(rollout).context("Failed to encode rollout")?;

        sqlx::query(
            "INSERT OR REPLACE INTO run_cycles (run_id, cycle, summary, rollout, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(run_id)
        .bind(rollout.cycle as i64)
        .bind(summary)
        .bind(rollout_json)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to record cycle")?;

        sqlx::query("UPDATE runs SET cycles = MAX(cycles, ?) WHERE id = ?")
            .bind(rollout.cycle as i64)
            .bind(run_id)
            .execute(&self.pool)
            .await
            .context("Failed to update cycle count")?;

        Ok(())
    }

    /// Mark a run as finished
    pub async fn finish_run(&self, run_id: &str, summary: RunSummary<'_>) -> Result<()> {
        let now = now_secs()?;
        let errors = serde_json::to_string(summary.errors).context("Failed to encode errors")?;

        sqlx::query(
            "UPDATE runs SET status = ?, provider_used = ?, output = ?, errors = ?, cycles = ?, duration_ms = ?, completed_at = ? WHERE id = ?",
        )
        .bind(summary.status.as_str())
        .bind(summary.provider_used)
        .bind(summary.output)
        .bind(errors)
        .bind(summary.cycles as i64)
        .bind(summary.duration_ms)
        .bind(now)
        .bind(run_id)
        .execute(&self.pool)
        .await
        .context("Failed to finish run")?;

        Ok(())
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let row = sqlx::query(&format!("SELECT {} FROM runs WHERE id = ?", RUN_COLUMNS))
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch run")?;

        row.as_ref().map(RunRecord::from_row).transpose()
    }

    /// Most recent runs first
    pub async fn recent_runs(&self, limit: i64) -> Result<Vec<RunRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM runs ORDER BY created_at DESC, rowid DESC LIMIT ?",
            RUN_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch recent runs")?;

        rows.iter().map(RunRecord::from_row).collect()
    }

    /// Cycles of a run, in order
    pub async fn get_cycles(&self, run_id: &str) -> Result<Vec<RunCycle>> {
        let rows = sqlx::query(
            "SELECT run_id, cycle, summary, rollout, created_at FROM run_cycles WHERE run_id = ? ORDER BY cycle ASC",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch run cycles")?;

        rows.into_iter()
            .map(|r| -> Result<RunCycle> {
                let rollout: String = r.get("rollout");
                Ok(RunCycle {
                    run_id: r.get("run_id"),
                    cycle: r.get("cycle"),
                    summary: r.get("summary"),
                    rollout: serde_json::from_str(&rollout).context("Corrupt rollout column")?,
                    created_at: r.get("created_at"),
                })
            })
            .collect()
    }
}
