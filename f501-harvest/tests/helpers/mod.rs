//! Shared test fixtures: temporary databases and a scripted source

#![allow(dead_code)]

use async_trait::async_trait;
use f501_common::config::TomlConfig;
use f501_harvest::source::{RosterRow, SeasonRow, SourceAdapter, SourceError};
use f501_harvest::Harvester;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Create a temporary database with the full schema
///
/// The TempDir must stay alive for the duration of the test.
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test_f501.db");
    let pool = f501_harvest::db::init_database(&db_path).await.unwrap();
    (temp_dir, pool)
}

/// Config with no pacing delay and no retry backoff
pub fn fast_config() -> TomlConfig {
    let mut config = TomlConfig::default();
    config.harvest.min_interval_ms = 0;
    config.harvest.retry_backoff_ms = 0;
    config.harvest.workers = 3;
    config.source.request_timeout_secs = 5;
    config
}

/// One season row with appearances only
pub fn apps_row(season: &str, team: &str, competition: &str, appearances: i64) -> SeasonRow {
    SeasonRow {
        season: season.to_string(),
        team: team.to_string(),
        competition: competition.to_string(),
        country: Some("England".to_string()),
        metrics: HashMap::from([("appearances".to_string(), appearances)]),
    }
}

/// Scripted response for one entity
#[derive(Debug, Clone)]
pub enum Script {
    Rows(Vec<SeasonRow>),
    Fail(SourceError),
    /// Fail `n` times with the given error, then return the rows
    FailThen(usize, SourceError, Vec<SeasonRow>),
    /// Sleep before returning the rows
    Slow(Duration, Vec<SeasonRow>),
}

/// In-memory source answering from a script keyed by external id
#[derive(Default)]
pub struct ScriptedSource {
    entities: Mutex<HashMap<String, Script>>,
    rosters: Mutex<HashMap<(String, String), Result<Vec<RosterRow>, SourceError>>>,
    calls: Mutex<HashMap<String, usize>>,
    total_calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, external_id: &str, script: Script) {
        self.entities
            .lock()
            .unwrap()
            .insert(external_id.to_string(), script);
    }

    pub fn roster(
        &self,
        league: &str,
        season: &str,
        result: Result<Vec<RosterRow>, SourceError>,
    ) {
        self.rosters
            .lock()
            .unwrap()
            .insert((league.to_string(), season.to_string()), result);
    }

    /// Number of fetches made for one entity
    pub fn calls_for(&self, external_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(external_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for ScriptedSource {
    async fn fetch_entity_detail(&self, external_id: &str) -> Result<Vec<SeasonRow>, SourceError> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(external_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        let script = self.entities.lock().unwrap().get(external_id).cloned();
        match script {
            None => Err(SourceError::NotFound(external_id.to_string())),
            Some(Script::Rows(rows)) => Ok(rows),
            Some(Script::Fail(err)) => Err(err),
            Some(Script::FailThen(n, err, rows)) => {
                if call <= n {
                    Err(err)
                } else {
                    Ok(rows)
                }
            }
            Some(Script::Slow(delay, rows)) => {
                tokio::time::sleep(delay).await;
                Ok(rows)
            }
        }
    }

    async fn fetch_league_roster(
        &self,
        league: &str,
        season: &str,
    ) -> Result<Vec<RosterRow>, SourceError> {
        self.rosters
            .lock()
            .unwrap()
            .get(&(league.to_string(), season.to_string()))
            .cloned()
            .unwrap_or_else(|| Err(SourceError::NotFound(format!("{} {}", league, season))))
    }
}

/// Harvester over a scripted source
pub fn harvester(pool: &SqlitePool, config: &TomlConfig, source: Arc<ScriptedSource>) -> Harvester {
    Harvester::new(pool.clone(), config, source).unwrap()
}

/// Register an entity the way a roster sighting does; returns its local id
pub async fn seed_entity(harvester: &Harvester, external_id: &str, name: &str) -> i64 {
    harvester
        .store()
        .upsert_entity(external_id, name, Some("England"))
        .await
        .unwrap()
}
