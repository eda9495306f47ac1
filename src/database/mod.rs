use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

use crate::ml::ArtifactMetadata;

/// One completed training run as stored in the registry
#[derive(Debug, Clone, Serialize)]
pub struct TrainingRunRecord {
    pub run_id: Uuid,
    pub ticker: String,
    pub interval: String,
    pub trained_at: DateTime<Utc>,
    pub window: usize,
    pub train_samples: usize,
    pub test_samples: usize,
    pub final_loss: Option<f64>,
    pub mae: Option<f64>,
    pub rmse: Option<f64>,
    pub r2: Option<f64>,
}

impl From<&ArtifactMetadata> for TrainingRunRecord {
    fn from(meta: &ArtifactMetadata) -> Self {
        Self {
            run_id: meta.run_id,
            ticker: meta.ticker.clone(),
            interval: meta.interval.clone(),
            trained_at: meta.trained_at,
            window: meta.window,
            train_samples: meta.train_samples,
            test_samples: meta.test_samples,
            final_loss: meta.final_loss,
            mae: meta.metrics.map(|m| m.mae),
            rmse: meta.metrics.map(|m| m.rmse),
            r2: meta.metrics.map(|m| m.r2),
        }
    }
}

/// SQLite registry of training runs
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Initialize database with schema
    pub async fn new(db_url: &str) -> Result<Self> {
        info!("Initializing SQLite database at: {}", db_url);

        if let Some(file) = db_url.strip_prefix("sqlite:").map(|p| p.trim_start_matches("//")) {
            if let Some(parent) = Path::new(file).parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        // Create database file if it doesn't exist
        let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.create_schema().await?;

        info!("Database initialized successfully");
        Ok(db)
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS training_runs (
                run_id TEXT PRIMARY KEY,
                ticker TEXT NOT NULL,
                interval TEXT NOT NULL,
                trained_at TEXT NOT NULL,
                window_len INTEGER NOT NULL,
                train_samples INTEGER NOT NULL,
                test_samples INTEGER NOT NULL,
                final_loss REAL,
                mae REAL,
                rmse REAL,
                r2 REAL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_training_runs_key ON training_runs(ticker, interval, trained_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn record_training_run(&self, run: &TrainingRunRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO training_runs (
                run_id, ticker, interval, trained_at, window_len,
                train_samples, test_samples, final_loss, mae, rmse, r2
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.run_id.to_string())
        .bind(&run.ticker)
        .bind(&run.interval)
        .bind(run.trained_at.to_rfc3339())
        .bind(run.window as i64)
        .bind(run.train_samples as i64)
        .bind(run.test_samples as i64)
        .bind(run.final_loss)
        .bind(run.mae)
        .bind(run.rmse)
        .bind(run.r2)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent runs first, optionally restricted to one ticker
    pub async fn list_training_runs(&self, ticker: Option<&str>, limit: u32) -> Result<Vec<TrainingRunRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, ticker, interval, trained_at, window_len,
                   train_samples, test_samples, final_loss, mae, rmse, r2
            FROM training_runs
            WHERE ?1 IS NULL OR ticker = ?1
            ORDER BY trained_at DESC
            LIMIT ?2
            "#,
        )
        .bind(ticker.map(|t| t.to_uppercase()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in rows {
            runs.push(TrainingRunRecord {
                run_id: Uuid::parse_str(row.get("run_id"))?,
                ticker: row.get("ticker"),
                interval: row.get("interval"),
                trained_at: DateTime::parse_from_rfc3339(row.get("trained_at"))?.with_timezone(&Utc),
                window: row.get::<i64, _>("window_len") as usize,
                train_samples: row.get::<i64, _>("train_samples") as usize,
                test_samples: row.get::<i64, _>("test_samples") as usize,
                final_loss: row.get("final_loss"),
                mae: row.get("mae"),
                rmse: row.get("rmse"),
                r2: row.get("r2"),
            });
        }

        Ok(runs)
    }
}
