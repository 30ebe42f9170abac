//! Integration tests for harvest runs over a scripted source

mod helpers;

use f501_common::models::{ErrorCategory, Job, JobStatus, JobType, Question, ScrapeStatus};
use f501_harvest::db::{answers, init_database, jobs, questions, scrape_attempts};
use f501_harvest::source::SourceError;
use f501_harvest::{HarvestError, HarvestOptions};
use helpers::{apps_row, create_test_db, fast_config, harvester, seed_entity, Script, ScriptedSource};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_end_to_end_partial_run_and_answers() {
    let (_dir, pool) = create_test_db().await;
    let source = Arc::new(ScriptedSource::new());
    source.script(
        "a",
        Script::Rows(vec![
            apps_row("2022", "Arsenal", "Premier League", 50),
            apps_row("2023", "Arsenal", "Premier League", 31),
        ]),
    );
    source.script(
        "b",
        Script::Rows(vec![apps_row("2023", "Arsenal", "Premier League", 163)]),
    );
    source.script(
        "c",
        Script::Fail(SourceError::Network("connection reset".to_string())),
    );

    let h = harvester(&pool, &fast_config(), Arc::clone(&source));
    let a = seed_entity(&h, "a", "Alan Able").await;
    let b = seed_entity(&h, "b", "Ben Baker").await;
    let c = seed_entity(&h, "c", "Carl Cook").await;

    let report = h
        .harvest_entities(&[a, b, c], &HarvestOptions::default())
        .await
        .unwrap();

    assert_eq!(report.job.job_type, JobType::Harvest);
    assert_eq!(report.job.status, JobStatus::Partial);
    assert_eq!(report.job.counters.total, 3);
    assert_eq!(report.job.counters.succeeded, 2);
    assert_eq!(report.job.counters.failed, 1);
    assert_eq!(report.job.counters.rows_written, 3);

    let attempt_c = scrape_attempts::load_attempt(&pool, report.job.id, c)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(attempt_c.status, ScrapeStatus::Failed);
    assert_eq!(attempt_c.attempt_count, 1);
    assert_eq!(attempt_c.error_category, Some(ErrorCategory::Network));

    let mut question = Question::new("Appearances in 2023", "appearances");
    question.filter.season = Some("2023".to_string());
    questions::save_question(&pool, &question).await.unwrap();
    let summary = h.compute_answers(question.id).await.unwrap();
    assert_eq!(summary.answers_written, 2);

    let stored = answers::list_answers(&pool, question.id).await.unwrap();
    assert_eq!(stored.len(), 2);

    let b_answer = stored.iter().find(|x| x.entity_id == b).unwrap();
    assert_eq!(b_answer.score, 163);
    assert!(!b_answer.is_valid);
    assert!(!b_answer.is_bust);

    let a_answer = stored.iter().find(|x| x.entity_id == a).unwrap();
    assert_eq!(a_answer.score, 31);
    assert!(a_answer.is_valid);
    assert!(!a_answer.is_bust);
}

#[tokio::test]
async fn test_all_success_closes_job_success() {
    let (_dir, pool) = create_test_db().await;
    let source = Arc::new(ScriptedSource::new());
    source.script(
        "a",
        Script::Rows(vec![
            apps_row("2022-2023", "Arsenal", "Premier League", 10),
            apps_row("2023-2024", "Arsenal", "Premier League", 20),
        ]),
    );

    let h = harvester(&pool, &fast_config(), Arc::clone(&source));
    let a = seed_entity(&h, "a", "Alan Able").await;

    let report = h
        .harvest_entities(&[a, a], &HarvestOptions::default())
        .await
        .unwrap();

    assert_eq!(report.job.status, JobStatus::Success);
    assert_eq!(report.job.counters.total, 1, "duplicate ids are harvested once");
    assert_eq!(source.calls_for("a"), 1);

    let entity = h.get_entity(a).await.unwrap();
    assert_eq!(entity.seasons.len(), 2);
    assert!(entity.last_harvested_at.is_some());
}

#[tokio::test]
async fn test_not_found_is_skipped() {
    let (_dir, pool) = create_test_db().await;
    let source = Arc::new(ScriptedSource::new());
    let h = harvester(&pool, &fast_config(), Arc::clone(&source));
    let gone = seed_entity(&h, "gone", "Gary Gone").await;

    let report = h
        .harvest_entities(&[gone], &HarvestOptions::default())
        .await
        .unwrap();

    assert_eq!(report.job.status, JobStatus::Success);
    assert_eq!(report.job.counters.skipped, 1);

    let attempt = scrape_attempts::load_attempt(&pool, report.job.id, gone)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(attempt.status, ScrapeStatus::Skipped);
    assert_eq!(attempt.error_category, Some(ErrorCategory::NotFound));
}

#[tokio::test]
async fn test_unknown_entity_is_skipped_without_fetch() {
    let (_dir, pool) = create_test_db().await;
    let source = Arc::new(ScriptedSource::new());
    let h = harvester(&pool, &fast_config(), Arc::clone(&source));

    let report = h
        .harvest_entities(&[9999], &HarvestOptions::default())
        .await
        .unwrap();

    assert_eq!(report.job.counters.skipped, 1);
    assert_eq!(source.total_calls(), 0);

    let attempt = scrape_attempts::load_attempt(&pool, report.job.id, 9999)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(attempt.error_category, Some(ErrorCategory::UnknownEntity));
    assert_eq!(attempt.attempt_count, 0);
}

#[tokio::test]
async fn test_fresh_entity_skipped_unless_forced() {
    let (_dir, pool) = create_test_db().await;
    let source = Arc::new(ScriptedSource::new());
    source.script(
        "a",
        Script::Rows(vec![apps_row("2023-2024", "Arsenal", "Premier League", 5)]),
    );
    let h = harvester(&pool, &fast_config(), Arc::clone(&source));
    let a = seed_entity(&h, "a", "Alan Able").await;

    h.harvest_entities(&[a], &HarvestOptions::default())
        .await
        .unwrap();

    let second = h
        .harvest_entities(&[a], &HarvestOptions::default())
        .await
        .unwrap();
    assert_eq!(second.job.counters.skipped, 1);
    assert_eq!(source.calls_for("a"), 1);

    let attempt = scrape_attempts::load_attempt(&pool, second.job.id, a)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(attempt.error_category, Some(ErrorCategory::Fresh));

    let forced = h
        .harvest_entities(
            &[a],
            &HarvestOptions {
                force: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(forced.job.counters.succeeded, 1);
    assert_eq!(source.calls_for("a"), 2);
}

#[tokio::test]
async fn test_unusable_rows_are_parse_mismatch() {
    let (_dir, pool) = create_test_db().await;
    let source = Arc::new(ScriptedSource::new());
    source.script(
        "a",
        Script::Rows(vec![apps_row("Total", "Arsenal", "Premier League", 300)]),
    );
    let h = harvester(&pool, &fast_config(), Arc::clone(&source));
    let a = seed_entity(&h, "a", "Alan Able").await;

    let report = h
        .harvest_entities(&[a], &HarvestOptions::default())
        .await
        .unwrap();
    assert_eq!(report.job.status, JobStatus::Partial);

    let attempt = scrape_attempts::load_attempt(&pool, report.job.id, a)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(attempt.status, ScrapeStatus::Failed);
    assert_eq!(attempt.error_category, Some(ErrorCategory::ParseMismatch));
    assert!(h.get_entity(a).await.unwrap().seasons.is_empty());
}

#[tokio::test]
async fn test_slow_source_times_out() {
    let (_dir, pool) = create_test_db().await;
    let source = Arc::new(ScriptedSource::new());
    source.script(
        "slow",
        Script::Slow(
            Duration::from_secs(5),
            vec![apps_row("2023-2024", "Arsenal", "Premier League", 5)],
        ),
    );
    let mut config = fast_config();
    config.source.request_timeout_secs = 1;
    let h = harvester(&pool, &config, Arc::clone(&source));
    let slow = seed_entity(&h, "slow", "Sam Slow").await;

    let report = h
        .harvest_entities(&[slow], &HarvestOptions::default())
        .await
        .unwrap();

    let attempt = scrape_attempts::load_attempt(&pool, report.job.id, slow)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(attempt.status, ScrapeStatus::Failed);
    assert_eq!(attempt.error_category, Some(ErrorCategory::Timeout));
    assert_eq!(attempt.attempt_count, 1);
}

#[tokio::test]
async fn test_cancelled_run_leaves_entities_pending() {
    let (_dir, pool) = create_test_db().await;
    let source = Arc::new(ScriptedSource::new());
    source.script(
        "a",
        Script::Rows(vec![apps_row("2023-2024", "Arsenal", "Premier League", 5)]),
    );
    let h = harvester(&pool, &fast_config(), Arc::clone(&source));
    let a = seed_entity(&h, "a", "Alan Able").await;
    let b = seed_entity(&h, "b", "Ben Baker").await;

    let options = HarvestOptions::default();
    options.cancel.cancel();

    let report = h.harvest_entities(&[a, b], &options).await.unwrap();

    assert_eq!(report.job.status, JobStatus::Partial);
    assert_eq!(report.job.counters.processed(), 0);
    assert_eq!(source.total_calls(), 0);

    let pending = h.pending_entities().await.unwrap();
    let pending_ids: Vec<i64> = pending.iter().map(|p| p.entity_id).collect();
    assert_eq!(pending_ids, vec![a, b]);
}

#[tokio::test]
async fn test_second_harvest_refused_while_running() {
    let (_dir, pool) = create_test_db().await;
    let source = Arc::new(ScriptedSource::new());
    let h = harvester(&pool, &fast_config(), Arc::clone(&source));

    let running = h.ledger().open(JobType::Harvest, "manual").await.unwrap();

    let result = h.harvest_entities(&[1], &HarvestOptions::default()).await;
    match result {
        Err(HarvestError::RunInProgress(id)) => assert_eq!(id, running.id),
        other => panic!("expected RunInProgress, got {:?}", other.map(|r| r.job.status)),
    }

    // Aggregation is not blocked by a running harvest
    let aggregation = h.compute_all_active_answers().await.unwrap();
    assert!(aggregation.failures.is_empty());
}

#[tokio::test]
async fn test_schema_holds_single_running_harvest() {
    let (_dir, pool) = create_test_db().await;

    jobs::save_job(&pool, &Job::new(JobType::Harvest, "first"), 1000)
        .await
        .unwrap();
    let second = jobs::save_job(&pool, &Job::new(JobType::Retry, "second"), 1000).await;
    assert!(second.unwrap_err().is_unique_violation());

    // Aggregation jobs sit outside the index
    jobs::save_job(&pool, &Job::new(JobType::Aggregation, "q"), 1000)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_concurrent_opens_from_two_processes_yield_one_job() {
    let (dir, pool) = create_test_db().await;
    let other_pool = init_database(&dir.path().join("test_f501.db"))
        .await
        .unwrap();
    let source = Arc::new(ScriptedSource::new());
    let first = harvester(&pool, &fast_config(), Arc::clone(&source));
    let second = harvester(&other_pool, &fast_config(), Arc::clone(&source));

    for _ in 0..20 {
        let (a, b) = tokio::join!(
            first.ledger().open(JobType::Harvest, "first"),
            second.ledger().open(JobType::Harvest, "second"),
        );

        let mut opened = match (a, b) {
            (Ok(job), Err(HarvestError::RunInProgress(id)))
            | (Err(HarvestError::RunInProgress(id)), Ok(job)) => {
                assert_eq!(id, job.id);
                job
            }
            (a, b) => panic!(
                "expected exactly one job, got {:?} and {:?}",
                a.map(|j| j.id),
                b.map(|j| j.id)
            ),
        };
        first.ledger().abort(&mut opened, "done").await.unwrap();
    }
}

#[tokio::test]
async fn test_stale_running_job_closed_on_cleanup() {
    let (_dir, pool) = create_test_db().await;
    let source = Arc::new(ScriptedSource::new());
    let h = harvester(&pool, &fast_config(), Arc::clone(&source));

    let stale = h.ledger().open(JobType::Harvest, "crashed").await.unwrap();

    // Heartbeat is fresh: the job may belong to a live process
    assert_eq!(h.cleanup_stale().await.unwrap(), 0);

    let closed = h
        .ledger()
        .cleanup_silent_for(chrono::Duration::zero())
        .await
        .unwrap();
    assert_eq!(closed, 1);

    let reloaded = h.ledger().load(stale.id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, JobStatus::Failed);
    assert!(reloaded.ended_at.is_some());

    // The guard no longer blocks new harvests
    h.harvest_entities(&[], &HarvestOptions::default())
        .await
        .unwrap();
}
