//! Rate bound tests: N acquires at interval t take at least (N-1)·t

mod helpers;

use f501_harvest::rate_gate::RateGate;
use f501_harvest::HarvestOptions;
use helpers::{apps_row, create_test_db, fast_config, harvester, seed_entity, Script, ScriptedSource};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

#[tokio::test]
async fn test_concurrent_acquires_respect_interval() {
    let interval = Duration::from_millis(40);
    let gate = RateGate::shared(interval);
    let start = Instant::now();

    let mut join_set = JoinSet::new();
    for _ in 0..6 {
        let gate = Arc::clone(&gate);
        join_set.spawn(async move {
            gate.acquire().await;
        });
    }

    let mut completed = 0;
    while let Some(result) = join_set.join_next().await {
        result.unwrap();
        completed += 1;
    }

    assert_eq!(completed, 6);
    assert!(
        start.elapsed() >= interval * 5,
        "6 acquires at {:?} took only {:?}",
        interval,
        start.elapsed()
    );
}

#[tokio::test]
async fn test_worker_pool_is_paced_by_gate() {
    let (_dir, pool) = create_test_db().await;
    let source = Arc::new(ScriptedSource::new());
    let mut config = fast_config();
    config.harvest.min_interval_ms = 50;
    config.harvest.workers = 5;

    let h = harvester(&pool, &config, Arc::clone(&source));
    let mut ids = Vec::new();
    for n in 0..5 {
        let external_id = format!("p{}", n);
        source.script(
            &external_id,
            Script::Rows(vec![apps_row("2023-2024", "Fulham", "Premier League", n + 1)]),
        );
        ids.push(seed_entity(&h, &external_id, &format!("Player {}", n)).await);
    }

    let start = Instant::now();
    let report = h
        .harvest_entities(&ids, &HarvestOptions::default())
        .await
        .unwrap();

    assert_eq!(report.job.counters.succeeded, 5);
    assert!(
        start.elapsed() >= Duration::from_millis(200),
        "5 fetches at 50 ms took only {:?}",
        start.elapsed()
    );
}
