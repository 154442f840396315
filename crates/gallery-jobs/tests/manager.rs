//! Job manager lifecycle tests against a real state directory.

use std::sync::mpsc;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context};
use tempfile::TempDir;

use gallery_jobs::{
    JobContext, JobError, JobManager, JobsConfig, ScriptDefinition, ScriptRegistry,
};
use gallery_models::{JobId, JobParams, JobRecord, JobStatus, ParamSpec};
use gallery_store::JobTableFile;

const WAIT: Duration = Duration::from_secs(10);

fn manager(dir: &TempDir, registry: ScriptRegistry) -> JobManager {
    JobManager::new(&JobsConfig::with_state_dir(dir.path()), Arc::new(registry)).unwrap()
}

fn finish(manager: &JobManager, id: &JobId) -> JobRecord {
    manager
        .wait_for_terminal(id, WAIT)
        .unwrap()
        .expect("job did not finish in time")
}

fn full_log(manager: &JobManager, id: &JobId) -> String {
    manager.read_log(id, 0).unwrap().data
}

/// A runner that blocks until the test releases it.
fn gated(name: &str) -> (ScriptDefinition, mpsc::Receiver<()>, mpsc::Sender<()>) {
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let started_tx = Mutex::new(started_tx);
    let release_rx = Mutex::new(release_rx);

    let def = ScriptDefinition::new(name, move |ctx: &JobContext| -> anyhow::Result<()> {
        ctx.log("waiting for release");
        started_tx.lock().unwrap().send(()).unwrap();
        let _ = release_rx.lock().unwrap().recv_timeout(WAIT);
        Ok(())
    });
    (def, started_rx, release_tx)
}

#[test]
fn test_job_runs_to_completion() {
    let dir = TempDir::new().unwrap();
    let registry = ScriptRegistry::new().register(ScriptDefinition::new(
        "tally",
        |ctx: &JobContext| -> anyhow::Result<()> {
            for item in ["a", "b", "c"] {
                ctx.mark_processed(item)?;
                ctx.log(format!("Processed {}", item));
            }
            Ok(())
        },
    ));
    let manager = manager(&dir, registry);

    let job = manager.start_job("tally", JobParams::new()).unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.progress_key, "tally:{}");

    let done = finish(&manager, &job.id);
    assert_eq!(done.status, JobStatus::Completed);
    assert!(done.started_at.is_some());
    assert!(done.ended_at.is_some());

    let summary = manager.job_status(&job.id).unwrap();
    assert_eq!(summary.processed_count, 3);

    let log = full_log(&manager, &job.id);
    assert!(log.contains("Starting script 'tally' with params {}"));
    assert!(log.contains("Processed b"));
    assert!(log.contains("Script finished successfully."));

    // Persisted
    let table = JobTableFile::new(dir.path().join("jobs.json")).load().unwrap();
    assert_eq!(table[&job.id].status, JobStatus::Completed);
}

#[test]
fn test_second_start_of_same_script_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (blocker, started, release) = gated("blocker");
    let (other, other_started, other_release) = gated("other");
    let manager = manager(&dir, ScriptRegistry::new().register(blocker).register(other));

    let first = manager.start_job("blocker", JobParams::new()).unwrap();
    started.recv_timeout(WAIT).unwrap();

    match manager.start_job("blocker", JobParams::new()) {
        Err(JobError::AlreadyRunning { script, job_id }) => {
            assert_eq!(script, "blocker");
            assert_eq!(job_id, first.id);
        }
        other => panic!("expected AlreadyRunning, got {:?}", other),
    }

    // A different script is unaffected.
    let second = manager.start_job("other", JobParams::new()).unwrap();
    other_started.recv_timeout(WAIT).unwrap();
    assert_eq!(manager.get_job(&second.id).unwrap().status, JobStatus::Running);

    release.send(()).unwrap();
    other_release.send(()).unwrap();
    assert_eq!(finish(&manager, &first.id).status, JobStatus::Completed);
    assert_eq!(finish(&manager, &second.id).status, JobStatus::Completed);

    // Once finished, the script can run again.
    let third = manager.start_job("other", JobParams::new()).unwrap();
    other_started.recv_timeout(WAIT).unwrap();
    other_release.send(()).unwrap();
    assert_eq!(finish(&manager, &third.id).status, JobStatus::Completed);
}

#[test]
fn test_stop_job_ends_stopped_and_keeps_progress() {
    let dir = TempDir::new().unwrap();
    let (processed_tx, processed_rx) = mpsc::channel();
    let (ack_tx, ack_rx) = mpsc::channel::<()>();
    let processed_tx = Mutex::new(processed_tx);
    let ack_rx = Mutex::new(ack_rx);

    let registry = ScriptRegistry::new().register(ScriptDefinition::new(
        "walk",
        move |ctx: &JobContext| -> anyhow::Result<()> {
            for item in ["one", "two", "three"] {
                if ctx.should_stop() {
                    ctx.log("Stop requested. Exiting early.");
                    return Ok(());
                }
                ctx.mark_processed(item)?;
                processed_tx.lock().unwrap().send(()).unwrap();
                let _ = ack_rx.lock().unwrap().recv_timeout(WAIT);
            }
            Ok(())
        },
    ));
    let manager = manager(&dir, registry);

    let job = manager.start_job("walk", JobParams::new()).unwrap();
    processed_rx.recv_timeout(WAIT).unwrap();

    assert!(manager.stop_job(&job.id));
    ack_tx.send(()).unwrap();

    let done = finish(&manager, &job.id);
    assert_eq!(done.status, JobStatus::Stopped);
    assert_eq!(manager.progress().count("walk:{}"), 1);
    assert!(manager.progress().is_processed("walk:{}", "one"));

    let log = full_log(&manager, &job.id);
    assert!(log.contains("Stop requested; exiting early."));

    // Stopping a finished job is a no-op.
    assert!(!manager.stop_job(&job.id));
}

#[test]
fn test_stop_unknown_job_returns_false() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir, ScriptRegistry::new());
    assert!(!manager.stop_job(&JobId::from_string("missing")));
}

#[test]
fn test_runner_error_marks_failed() {
    let dir = TempDir::new().unwrap();
    let registry = ScriptRegistry::new().register(ScriptDefinition::new(
        "broken",
        |_: &JobContext| -> anyhow::Result<()> { bail!("upload folder is gone") },
    ));
    let manager = manager(&dir, registry);

    let job = manager.start_job("broken", JobParams::new()).unwrap();
    assert_eq!(finish(&manager, &job.id).status, JobStatus::Failed);
    assert!(full_log(&manager, &job.id).contains("upload folder is gone"));
}

#[test]
fn test_error_chain_keeps_log_lines_timestamped() {
    let dir = TempDir::new().unwrap();
    let registry = ScriptRegistry::new().register(ScriptDefinition::new(
        "nested",
        |_: &JobContext| -> anyhow::Result<()> {
            Err(anyhow::anyhow!("permission denied")).context("failed to list upload folder")
        },
    ));
    let manager = manager(&dir, registry);

    let job = manager.start_job("nested", JobParams::new()).unwrap();
    assert_eq!(finish(&manager, &job.id).status, JobStatus::Failed);

    let log = full_log(&manager, &job.id);
    assert!(log.contains("Caused by:"));
    assert!(log.contains("permission denied"));
    for line in log.lines() {
        assert!(line.starts_with('['), "unprefixed log line: {:?}", line);
    }
}

#[test]
fn test_runner_panic_marks_failed() {
    let dir = TempDir::new().unwrap();
    let registry = ScriptRegistry::new().register(ScriptDefinition::new(
        "panicky",
        |_: &JobContext| -> anyhow::Result<()> { panic!("index out of range") },
    ));
    let manager = manager(&dir, registry);

    let job = manager.start_job("panicky", JobParams::new()).unwrap();
    assert_eq!(finish(&manager, &job.id).status, JobStatus::Failed);
    assert!(full_log(&manager, &job.id).contains("Script panicked: index out of range"));

    // The script is not wedged as active.
    let again = manager.start_job("panicky", JobParams::new()).unwrap();
    assert_eq!(finish(&manager, &again.id).status, JobStatus::Failed);
}

#[test]
fn test_item_failures_do_not_fail_the_job() {
    let dir = TempDir::new().unwrap();
    let registry = ScriptRegistry::new().register(ScriptDefinition::new(
        "flaky",
        |ctx: &JobContext| -> anyhow::Result<()> {
            for item in ["good", "bad", "fine"] {
                if item == "bad" {
                    ctx.item_failed(item, "decoder error");
                    continue;
                }
                ctx.mark_processed(item)?;
            }
            Ok(())
        },
    ));
    let manager = manager(&dir, registry);

    let job = manager.start_job("flaky", JobParams::new()).unwrap();
    let done = finish(&manager, &job.id);
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.item_failures, 1);
    assert!(!manager.progress().is_processed("flaky:{}", "bad"));
    assert!(full_log(&manager, &job.id).contains("Failed bad: decoder error"));
}

#[test]
fn test_unknown_script_and_bad_params_create_no_row() {
    let dir = TempDir::new().unwrap();
    let registry = ScriptRegistry::new().register(
        ScriptDefinition::new("export", |_: &JobContext| -> anyhow::Result<()> { Ok(()) })
            .param(ParamSpec::required("target", "where to write")),
    );
    let manager = manager(&dir, registry);

    let err = manager.start_job("nope", JobParams::new()).unwrap_err();
    assert!(matches!(err, JobError::UnknownScript(ref name) if name == "nope"));
    assert!(err.is_caller_error());

    let err = manager.start_job("export", JobParams::new()).unwrap_err();
    assert!(matches!(err, JobError::InvalidParams { .. }));

    assert!(manager.list_jobs().is_empty());
}

#[test]
fn test_restart_marks_interrupted_jobs_stopped() {
    let dir = TempDir::new().unwrap();
    let table_file = JobTableFile::new(dir.path().join("jobs.json"));

    let mut table = table_file.load().unwrap();
    for (id, status) in [
        ("was-running", JobStatus::Running),
        ("was-queued", JobStatus::Queued),
        ("was-done", JobStatus::Completed),
    ] {
        let mut job = JobRecord::new(
            JobId::from_string(id),
            id,
            JobParams::new(),
            format!("{}:{{}}", id),
            dir.path().join("logs").join(format!("{}.log", id)),
        );
        job.status = status;
        table.insert(job.id.clone(), job);
    }
    table_file.save(&table).unwrap();

    let manager = manager(&dir, ScriptRegistry::new());
    let status = |id: &str| manager.get_job(&JobId::from_string(id)).unwrap().status;
    assert_eq!(status("was-running"), JobStatus::Stopped);
    assert_eq!(status("was-queued"), JobStatus::Stopped);
    assert_eq!(status("was-done"), JobStatus::Completed);

    // Recovery is persisted immediately.
    let reloaded = table_file.load().unwrap();
    assert_eq!(
        reloaded[&JobId::from_string("was-running")].status,
        JobStatus::Stopped
    );
}

#[test]
fn test_list_jobs_is_newest_first() {
    let dir = TempDir::new().unwrap();
    let registry = ScriptRegistry::new().register(ScriptDefinition::new(
        "quick",
        |_: &JobContext| -> anyhow::Result<()> { Ok(()) },
    ));
    let manager = manager(&dir, registry);

    let mut ids = Vec::new();
    for _ in 0..3 {
        let job = manager.start_job("quick", JobParams::new()).unwrap();
        finish(&manager, &job.id);
        ids.push(job.id);
        std::thread::sleep(Duration::from_millis(5));
    }

    let listed: Vec<JobId> = manager.list_jobs().into_iter().map(|j| j.id).collect();
    ids.reverse();
    assert_eq!(listed, ids);
}

#[test]
fn test_incremental_log_reads_do_not_repeat_or_skip() {
    let dir = TempDir::new().unwrap();
    let (step_tx, step_rx) = mpsc::channel::<()>();
    let (wrote_tx, wrote_rx) = mpsc::channel();
    let step_rx = Mutex::new(step_rx);
    let wrote_tx = Mutex::new(wrote_tx);

    let registry = ScriptRegistry::new().register(ScriptDefinition::new(
        "chatty",
        move |ctx: &JobContext| -> anyhow::Result<()> {
            ctx.log("line 1");
            wrote_tx.lock().unwrap().send(()).unwrap();
            let _ = step_rx.lock().unwrap().recv_timeout(WAIT);
            ctx.log("line 2");
            Ok(())
        },
    ));
    let manager = manager(&dir, registry);
    let job = manager.start_job("chatty", JobParams::new()).unwrap();

    wrote_rx.recv_timeout(WAIT).unwrap();
    let first = manager.read_log(&job.id, 0).unwrap();
    assert_eq!(first.status, JobStatus::Running);
    assert!(first.data.contains("line 1"));
    assert!(!first.data.contains("line 2"));

    step_tx.send(()).unwrap();
    finish(&manager, &job.id);

    let second = manager.read_log(&job.id, first.offset).unwrap();
    assert_eq!(second.status, JobStatus::Completed);
    assert!(!second.data.contains("line 1"));
    assert!(second.data.contains("line 2"));
    assert_eq!(format!("{}{}", first.data, second.data), full_log(&manager, &job.id));

    let tail = manager.read_log(&job.id, second.offset).unwrap();
    assert!(tail.data.is_empty());
    assert_eq!(tail.offset, second.offset);
}

#[test]
fn test_unknown_job_queries() {
    let dir = TempDir::new().unwrap();
    let manager = manager(&dir, ScriptRegistry::new());
    let id = JobId::from_string("missing");

    assert!(manager.get_job(&id).is_none());
    assert!(matches!(manager.job_status(&id), Err(JobError::NotFound(_))));
    assert!(matches!(manager.read_log(&id, 0), Err(JobError::NotFound(_))));
}

#[test]
fn test_concurrent_starts_admit_exactly_one() {
    const CALLERS: usize = 16;

    let dir = TempDir::new().unwrap();
    let (def, started, release) = gated("blocker");
    let manager = Arc::new(manager(&dir, ScriptRegistry::new().register(def)));
    let barrier = Arc::new(Barrier::new(CALLERS));

    let callers: Vec<_> = (0..CALLERS)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                manager.start_job("blocker", JobParams::new())
            })
        })
        .collect();
    let results: Vec<_> = callers.into_iter().map(|h| h.join().unwrap()).collect();

    let admitted: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(JobError::AlreadyRunning { .. })))
        .count();
    assert_eq!(admitted.len(), 1);
    assert_eq!(rejected, CALLERS - 1);

    started.recv_timeout(WAIT).unwrap();
    release.send(()).unwrap();
    let id = admitted[0].id.clone();
    assert_eq!(finish(&manager, &id).status, JobStatus::Completed);
    assert_eq!(manager.list_jobs().len(), 1);
}
