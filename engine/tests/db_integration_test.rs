/// Integration tests for run persistence
///
/// Covers the run lifecycle from creation through per-cycle rollouts to the
/// final status, and reopening the database after close.
use recap_engine::agent::Rollout;
use recap_engine::db::{Database, RunStatus, RunSummary};
use recap_engine::llm::Message;
use tempfile::TempDir;

fn rollout(cycle: usize, summary: &str) -> Rollout {
    Rollout {
        cycle,
        messages: vec![
            Message::system("sys"),
            Message::human("What is the capital of France?"),
            Message::human("Summarize"),
            Message::assistant(summary),
        ],
    }
}

#[tokio::test]
async fn test_run_lifecycle() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("recap.db");
    let db = Database::new(&db_path).await.unwrap();
    let runs = db.runs();

    let created = runs
        .create_run("run-1", "What is the capital of France?")
        .await
        .unwrap();
    assert_eq!(created.status, RunStatus::Running);

    runs.record_cycle("run-1", &rollout(1, "think</think>Paris")).await.unwrap();
    runs.record_cycle("run-1", &rollout(2, "Paris.")).await.unwrap();

    let errors = vec!["LLM invocation failed on attempt [1/5] : Timeout".to_string()];
    runs.finish_run(
        "run-1",
        RunSummary {
            status: RunStatus::Completed,
            provider_used: "openai",
            output: Some("Paris."),
            errors: &errors,
            cycles: 2,
            duration_ms: 1234,
        },
    )
    .await
    .unwrap();

    let run = runs.get_run("run-1").await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.output.as_deref(), Some("Paris."));
    assert_eq!(run.errors, errors);
    assert_eq!(run.cycles, 2);
    assert_eq!(run.duration_ms, Some(1234));
    assert!(run.completed_at.is_some());

    let cycles = runs.get_cycles("run-1").await.unwrap();
    assert_eq!(cycles.len(), 2);
    assert_eq!(cycles[0].cycle, 1);
    assert_eq!(cycles[0].summary, "think</think>Paris");
    assert_eq!(cycles[0].rollout, rollout(1, "think</think>Paris"));
    assert_eq!(cycles[1].summary, "Paris.");

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_failed_run_has_no_output() {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("recap.db")).await.unwrap();
    let runs = db.runs();

    runs.create_run("run-2", "q").await.unwrap();
    let errors = vec!["a".to_string(), "b".to_string()];
    runs.finish_run(
        "run-2",
        RunSummary {
            status: RunStatus::Failed,
            provider_used: "openai",
            output: None,
            errors: &errors,
            cycles: 0,
            duration_ms: 10,
        },
    )
    .await
    .unwrap();

    let run = runs.get_run("run-2").await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.output.is_none());
    assert_eq!(run.errors.len(), 2);
    assert!(runs.get_cycles("run-2").await.unwrap().is_empty());

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_recent_runs_newest_first() {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("recap.db")).await.unwrap();
    let runs = db.runs();

    for i in 0..5 {
        runs.create_run(&format!("run-{}", i), &format!("question {}", i))
            .await
            .unwrap();
    }

    let recent = runs.recent_runs(3).await.unwrap();
    assert_eq!(recent.len(), 3);
    assert_eq!(recent[0].id, "run-4");
    assert_eq!(recent[2].id, "run-2");
    assert!(runs.get_run("missing").await.unwrap().is_none());

    db.close().await.unwrap();
}

#[tokio::test]
async fn test_data_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("recap.db");

    let db = Database::new(&db_path).await.unwrap();
    db.runs().create_run("persisted", "q").await.unwrap();
    db.runs().record_cycle("persisted", &rollout(1, "s")).await.unwrap();
    db.close().await.unwrap();

    let db = Database::new(&db_path).await.unwrap();
    let run = db.runs().get_run("persisted").await.unwrap().unwrap();
    assert_eq!(run.cycles, 1);
    assert_eq!(db.runs().get_cycles("persisted").await.unwrap().len(), 1);
    db.close().await.unwrap();
}
