//! Progress reporting against a live registry
//!
//! The reporter is the only way pipeline stages publish progress; these tests
//! pin the monotonic-projection invariant end to end through the actor.

use vscribe_server::models::{Stage, TaskSource, TaskStatus};
use vscribe_server::pipeline::ProgressReporter;
use vscribe_server::registry::RegistryHandle;

fn url_source() -> TaskSource {
    TaskSource::Url {
        value: "https://example.com/v".to_string(),
    }
}

#[tokio::test]
async fn stage_walk_produces_the_documented_progress_ladder() {
    let dir = tempfile::tempdir().unwrap();
    let registry = RegistryHandle::open(dir.path()).unwrap();
    let task = registry.create(url_source(), "r".to_string()).await.unwrap();
    let reporter = ProgressReporter::new(registry.clone(), task.id.clone());

    reporter.begin().await.unwrap();

    let mut observed = vec![registry.get(&task.id).await.unwrap().unwrap().progress];
    for (stage, detail) in [
        (Stage::FetchingInfo, "获取视频信息"),
        (Stage::Downloading, "下载音频"),
        (Stage::Extracting, "处理音频"),
        (Stage::Transcribing, "语音转文字"),
        (Stage::Polishing, "生成逐字稿"),
        (Stage::Summarizing, "生成总结报告"),
        (Stage::Analyzing, "内容分析"),
        (Stage::Writing, "保存结果"),
    ] {
        reporter.enter_stage(stage, detail).await.unwrap();
        observed.push(registry.get(&task.id).await.unwrap().unwrap().progress);
    }

    // Non-decreasing throughout, and the documented checkpoints appear.
    for window in observed.windows(2) {
        assert!(window[0] <= window[1], "progress regressed: {:?}", observed);
    }
    for checkpoint in [0, 15, 25, 70, 80, 90, 97] {
        assert!(observed.contains(&checkpoint), "missing {}", checkpoint);
    }
}

#[tokio::test]
async fn segment_progress_is_linear_and_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let registry = RegistryHandle::open(dir.path()).unwrap();
    let task = registry.create(url_source(), "r".to_string()).await.unwrap();
    let reporter = ProgressReporter::new(registry.clone(), task.id.clone());

    reporter.begin().await.unwrap();
    reporter.enter_stage(Stage::Transcribing, "语音转文字").await.unwrap();
    reporter.segments_total(3).await.unwrap();

    let mut progresses = Vec::new();
    for done in 1..=3 {
        reporter.segments(done, 3).await.unwrap();
        let snapshot = registry.get(&task.id).await.unwrap().unwrap();
        progresses.push(snapshot.progress);
        assert_eq!(snapshot.segments_done, done);
        assert_eq!(snapshot.segments_total, 3);
    }
    assert_eq!(progresses, vec![40, 55, 70]);
}

#[tokio::test]
async fn reporter_cannot_move_progress_backwards() {
    let dir = tempfile::tempdir().unwrap();
    let registry = RegistryHandle::open(dir.path()).unwrap();
    let task = registry.create(url_source(), "r".to_string()).await.unwrap();
    let reporter = ProgressReporter::new(registry.clone(), task.id.clone());

    reporter.begin().await.unwrap();
    reporter.enter_stage(Stage::Summarizing, "生成总结报告").await.unwrap();
    assert_eq!(registry.get(&task.id).await.unwrap().unwrap().progress, 80);

    // A stage entry lower than current progress is clamped by the registry.
    reporter.enter_stage(Stage::Extracting, "处理音频").await.unwrap();
    let snapshot = registry.get(&task.id).await.unwrap().unwrap();
    assert_eq!(snapshot.progress, 80);
    // The label itself still moves; only the number is monotonic.
    assert_eq!(snapshot.stage, Stage::Extracting);
}

#[tokio::test]
async fn timings_accumulate_per_sub_stage() {
    let dir = tempfile::tempdir().unwrap();
    let registry = RegistryHandle::open(dir.path()).unwrap();
    let task = registry.create(url_source(), "r".to_string()).await.unwrap();
    let reporter = ProgressReporter::new(registry.clone(), task.id.clone());

    reporter.timing("transcript", 12.5).await.unwrap();
    reporter.timing("summary", 3.25).await.unwrap();
    reporter.timing("analysis", 1.0).await.unwrap();

    let snapshot = registry.get(&task.id).await.unwrap().unwrap();
    assert_eq!(snapshot.ai_timings.get("transcript"), Some(&12.5));
    assert_eq!(snapshot.ai_timings.get("summary"), Some(&3.25));
    assert_eq!(snapshot.ai_timings.get("analysis"), Some(&1.0));
}

#[tokio::test]
async fn terminal_status_keeps_partial_progress() {
    let dir = tempfile::tempdir().unwrap();
    let registry = RegistryHandle::open(dir.path()).unwrap();
    let task = registry.create(url_source(), "r".to_string()).await.unwrap();
    let reporter = ProgressReporter::new(registry.clone(), task.id.clone());

    reporter.begin().await.unwrap();
    reporter.enter_stage(Stage::Transcribing, "语音转文字").await.unwrap();

    registry
        .update(&task.id, |t| {
            t.status = TaskStatus::Failed;
        })
        .await
        .unwrap();

    let snapshot = registry.get(&task.id).await.unwrap().unwrap();
    assert_eq!(snapshot.status, TaskStatus::Failed);
    assert_eq!(snapshot.progress, 25);
}
