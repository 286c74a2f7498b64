//! Tests for the remote task model, workflow patching, and completion
//! semantics that do not need a live generation server.

use std::path::{Path, PathBuf};
use std::time::Duration;

use photovar::remote::staging;
use photovar::remote::workflow::WorkflowTemplate;
use photovar::remote::{RemoteTask, TaskSet, TaskStatus};
use photovar::{PhotovarError, SamplerOverrides};
use serde_json::json;

fn task(name: &str) -> RemoteTask {
    RemoteTask::new(
        PathBuf::from(format!("/photos/{name}.png")),
        json!({"1": {"class_type": "LoadImage", "inputs": {}}}),
        format!("20250101_093000_000000_{name}.png"),
        Some("backdrop[studio]".to_owned()),
    )
}

#[test]
fn tasks_complete_independently() {
    // one slow job must not hold back the others
    let mut set = TaskSet::new();
    for (i, name) in ["a", "b", "c"].iter().enumerate() {
        let idx = set.add(task(name));
        assert_eq!(idx, i);
        set.register_job_id(idx, &format!("job-{name}"));
    }

    // b and c finish out of order while a is still running
    set.update_status("job-c", TaskStatus::Completed);
    set.update_status("job-b", TaskStatus::Completed);
    assert_eq!(set.completed_count(), 2);
    assert!(!set.is_all_completed());
    assert_eq!(
        set.get_by_job_id("job-a").unwrap().status,
        TaskStatus::Submitted
    );

    set.update_status("job-a", TaskStatus::Completed);
    assert!(set.is_all_completed());
}

#[test]
fn duplicate_completion_signals_count_once() {
    // the server can report done twice (progress max + execution_success)
    let mut set = TaskSet::new();
    let idx = set.add(task("a"));
    set.register_job_id(idx, "job-a");

    set.update_status("job-a", TaskStatus::Completed);
    set.update_status("job-a", TaskStatus::Completed);
    assert_eq!(set.completed_count(), 1);
}

#[test]
fn empty_set_reports_not_all_completed() {
    let set = TaskSet::new();
    assert!(!set.is_all_completed());
}

#[test]
fn timed_out_task_stays_submitted() {
    // Scenario: history never materializes. The completion handler gives up
    // with a timeout; the task must remain Submitted so the run cannot
    // report all-done.
    let mut set = TaskSet::new();
    let idx = set.add(task("a"));
    set.register_job_id(idx, "job-a");

    let err = PhotovarError::timeout("history entry for job job-a", 10);
    assert!(err.is_task_level());
    // a recoverable error performs no status transition
    assert_eq!(
        set.get_by_job_id("job-a").unwrap().status,
        TaskStatus::Submitted
    );
    assert!(!set.is_all_completed());
    assert_eq!(set.resolved_count(), 0);
}

#[test]
fn patching_many_tasks_never_bleeds_between_them() {
    let template = WorkflowTemplate::from_value(json!({
        "1": {"class_type": "LoadImage", "inputs": {"image": "placeholder.png"}},
        "2": {"class_type": "CLIPTextEncode", "inputs": {"text": "template prompt"}},
        "3": {"class_type": "SaveImage", "inputs": {"filename_prefix": "final"}}
    }))
    .unwrap();
    let overrides = SamplerOverrides::default();

    let first = template.patch("input/one.png", "prompt one", &overrides);
    let second = template.patch("input/two.png", "prompt two", &overrides);

    assert_eq!(first["1"]["inputs"]["image"], json!("input/one.png"));
    assert_eq!(second["1"]["inputs"]["image"], json!("input/two.png"));
    assert_eq!(first["2"]["inputs"]["text"], json!("prompt one"));
    // every payload gets the managed output prefix
    for payload in [&first, &second] {
        assert_eq!(
            payload["3"]["inputs"]["filename_prefix"],
            json!("comfy_api_output/final")
        );
    }
}

#[test]
fn staged_names_are_unique_per_call() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("drone.png");
    std::fs::write(&source, b"bytes").unwrap();
    let staging_dir = dir.path().join("comfy_api_input");

    let a = staging::stage_image(&source, &staging_dir).unwrap();
    let b = staging::stage_image(&source, &staging_dir).unwrap();
    assert_ne!(a.file_name, b.file_name);
    assert!(staging_dir.join(&a.file_name).exists());
    assert!(staging_dir.join(&b.file_name).exists());
}

#[test]
fn final_names_derive_from_source_and_prompt_tag() {
    assert_eq!(staging::output_tag(Some("backdrop[studio]")), "studio");
    assert_eq!(staging::output_tag(Some("no_tag_here")), "processed");

    let dir = tempfile::tempdir().unwrap();
    let tmp = dir.path().join("final_00001_.png");
    std::fs::write(&tmp, b"img").unwrap();
    let dest = staging::relocate_output(
        &tmp,
        &dir.path().join("done"),
        Path::new("/photos/drone.png"),
        &staging::output_tag(Some("backdrop[studio]")),
    )
    .unwrap();
    assert!(dest.ends_with("done/drone_studio.png"));
}

#[tokio::test]
async fn missing_output_file_times_out_with_task_level_error() {
    tokio::time::pause();
    let dir = tempfile::tempdir().unwrap();
    let err = staging::wait_for_output_file(
        dir.path(),
        &["never_written.png".to_owned()],
        Duration::from_secs(15),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, PhotovarError::Timeout { .. }));
    assert!(err.is_task_level());
}
