//! End-to-end runs of the composition service against the scripted encoder.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use reel_media::{EncoderCall, EncoderOp, ScriptedEncoder};
use reel_models::{
    BackgroundMusic, CompositionJob, CompositionOptions, JobId, JobStatus, Scene, SceneStatus,
    TransitionType,
};
use reel_queue::{CompositionQueue, EntryState, QueueConfig};
use reel_worker::{
    ComposeRequest, InMemoryJobStore, InMemorySceneCatalog, JobStore, QueueService, WorkerConfig,
    WorkerError,
};

const USER: &str = "user-1";

struct Harness {
    dirs: TempDir,
    service: QueueService,
    jobs: Arc<InMemoryJobStore>,
    catalog: Arc<InMemorySceneCatalog>,
    encoder: Arc<ScriptedEncoder>,
}

impl Harness {
    fn new(encoder: ScriptedEncoder, concurrency: usize) -> Self {
        let dirs = TempDir::new().unwrap();
        let config = WorkerConfig::default()
            .with_concurrency(concurrency)
            .with_dirs(dirs.path().join("work"), dirs.path().join("out"))
            .with_poll_interval(Duration::from_millis(500));
        let queue = CompositionQueue::new(QueueConfig::default());
        let jobs = Arc::new(InMemoryJobStore::new());
        let catalog = Arc::new(InMemorySceneCatalog::new());
        let encoder = Arc::new(encoder);
        let service = QueueService::new(config, queue, jobs.clone(), catalog.clone(), encoder.clone());

        Self {
            dirs,
            service,
            jobs,
            catalog,
            encoder,
        }
    }

    fn work_dir(&self) -> PathBuf {
        self.dirs.path().join("work")
    }

    async fn project(&self, project_id: &str, scenes: Vec<Scene>) {
        self.catalog.insert_project(project_id, scenes).await;
    }

    /// Create the queued record, then enqueue it like an external producer.
    async fn enqueue(&self, project_id: &str, options: CompositionOptions) -> (JobId, String) {
        let record = CompositionJob::new_compose_movie(USER, project_id, options.clone());
        let job_id = record.id.clone();
        self.jobs.create(record).await.unwrap();

        let entry_id = self
            .service
            .enqueue(ComposeRequest {
                project_id: project_id.to_string(),
                user_id: USER.to_string(),
                options,
                job_store_id: job_id.clone(),
            })
            .await
            .unwrap();
        (job_id, entry_id)
    }

    async fn record(&self, job_id: &JobId) -> CompositionJob {
        self.jobs.get(job_id).await.unwrap().unwrap()
    }

    async fn wait_terminal(&self, job_id: &JobId) -> CompositionJob {
        for _ in 0..100_000 {
            let job = self.record(job_id).await;
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} never settled");
    }
}

fn three_scenes() -> Vec<Scene> {
    vec![
        Scene::video(2, "https://cdn.example.com/s2.mp4"),
        Scene::video(0, "https://cdn.example.com/s0.mp4"),
        Scene::video(1, "https://cdn.example.com/s1.mp4"),
    ]
}

fn leftover_workspaces(root: &Path) -> usize {
    match std::fs::read_dir(root) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}

#[tokio::test(start_paused = true)]
async fn scenario_a_three_scenes_default_options() {
    let h = Harness::new(ScriptedEncoder::new(), 2);
    h.project("p-a", three_scenes()).await;
    h.service.start().await.unwrap();

    let (job_id, entry_id) = h.enqueue("p-a", CompositionOptions::default()).await;
    let job = h.wait_terminal(&job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.completed_at.is_some());
    assert!(job.started_at.is_some());
    assert!(job.error.is_none());
    let output = job.output.expect("completed job carries output");
    assert!(Path::new(output.url()).exists());

    assert_eq!(h.encoder.count(EncoderOp::FetchClip), 3);
    let composed: Vec<_> = h
        .encoder
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            EncoderCall::Compose { orders, transition, .. } => Some((orders, transition)),
            _ => None,
        })
        .collect();
    assert_eq!(composed, vec![(vec![0, 1, 2], TransitionType::Fade)]);

    let entry = h.service.entry(&entry_id).await.unwrap();
    assert_eq!(entry.state, EntryState::Completed);
    assert_eq!(entry.attempts, 0);
    assert_eq!(leftover_workspaces(&h.work_dir()), 0);

    let status = h.service.job_status(&job_id, USER).await.unwrap().unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.output.as_deref(), Some(output.url()));

    h.service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn scenario_b_no_completed_scenes() {
    let h = Harness::new(ScriptedEncoder::new(), 2);
    h.project(
        "p-b",
        vec![
            Scene::video(0, "a.mp4").with_status(SceneStatus::Pending),
            Scene::image(1, "b.png").with_status(SceneStatus::Failed),
        ],
    )
    .await;
    h.service.start().await.unwrap();

    let (job_id, entry_id) = h.enqueue("p-b", CompositionOptions::default()).await;
    let job = h.wait_terminal(&job_id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.output.is_none());
    assert!(job.completed_at.is_some());
    assert!(job
        .error
        .as_deref()
        .is_some_and(|e| e.contains("No completed scenes")));

    let entry = h.service.entry(&entry_id).await.unwrap();
    assert_eq!(entry.state, EntryState::Failed);
    assert_eq!(entry.attempts, 0);
    assert!(h.encoder.calls().is_empty());
    assert_eq!(leftover_workspaces(&h.work_dir()), 0);

    h.service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn scenario_c_music_shorter_than_video() {
    let h = Harness::new(ScriptedEncoder::new().with_music_duration(6.0), 2);
    h.project("p-c", three_scenes()).await;
    h.service.start().await.unwrap();

    let options = CompositionOptions::default()
        .with_background_music(BackgroundMusic::new("https://cdn.example.com/song.mp3").with_fades(1.0, 1.5));
    let (job_id, _) = h.enqueue("p-c", options).await;
    let job = h.wait_terminal(&job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    // Three 4s clips joined by two 0.5s fades last 11s; the music lasts 6s.
    assert!(h.encoder.calls().contains(&EncoderCall::MixAudio {
        video_duration: 11.0,
        music_duration: 6.0,
        duration: 6.0,
    }));

    h.service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn scenario_d_transient_failures_then_success() {
    let h = Harness::new(ScriptedEncoder::new(), 1);
    h.project("p-d", three_scenes()).await;
    h.encoder.fail_next(EncoderOp::Compose, 2);
    h.service.start().await.unwrap();

    let (job_id, entry_id) = h.enqueue("p-d", CompositionOptions::default()).await;
    let job = h.wait_terminal(&job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.error.is_none());

    let entry = h.service.entry(&entry_id).await.unwrap();
    assert_eq!(entry.state, EntryState::Completed);
    assert_eq!(entry.attempts, 2);
    assert!(entry.last_error.is_some());

    let starts = h.encoder.started_at(EncoderOp::Compose);
    assert_eq!(starts.len(), 3);
    let first_gap = starts[1] - starts[0];
    let second_gap = starts[2] - starts[1];
    assert!(first_gap >= Duration::from_secs(2) && first_gap < Duration::from_millis(2100));
    assert!(second_gap >= Duration::from_secs(4) && second_gap < Duration::from_millis(4100));
    assert_eq!(leftover_workspaces(&h.work_dir()), 0);

    h.service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn transient_failures_exhaust_attempts() {
    let h = Harness::new(ScriptedEncoder::new(), 1);
    h.project("p-x", vec![Scene::video(0, "broken.mp4")]).await;
    h.encoder.break_source("broken.mp4");
    h.service.start().await.unwrap();

    let (job_id, entry_id) = h.enqueue("p-x", CompositionOptions::default()).await;
    let job = h.wait_terminal(&job_id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.as_deref().is_some_and(|e| e.contains("Conversion failed!")));

    let entry = h.service.entry(&entry_id).await.unwrap();
    assert_eq!(entry.state, EntryState::Failed);
    assert_eq!(entry.attempts, entry.max_attempts);
    assert_eq!(h.encoder.count(EncoderOp::FetchClip), 3);

    h.service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn scenario_e_pause_lets_active_finish_and_holds_waiting() {
    let h = Harness::new(ScriptedEncoder::new().with_latency(Duration::from_secs(10)), 2);
    h.project("p-e", three_scenes()).await;
    h.service.start().await.unwrap();

    let mut jobs = Vec::new();
    for _ in 0..5 {
        jobs.push(h.enqueue("p-e", CompositionOptions::default()).await.0);
    }

    // Let both workers claim a job.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let admin = h.service.admin();
    let before = admin.status().await;
    assert_eq!(before.active, 2);
    assert_eq!(before.waiting, 3);

    assert!(admin.pause());

    // Each job takes four 10s encoder calls.
    tokio::time::sleep(Duration::from_secs(60)).await;
    let paused = admin.status().await;
    assert_eq!(paused.active, 0);
    assert_eq!(paused.completed, 2);
    assert_eq!(paused.waiting, 3);

    // Nothing moves across further poll intervals.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(admin.status().await.waiting, 3);

    assert!(admin.resume());
    for job_id in &jobs {
        assert_eq!(h.wait_terminal(job_id).await.status, JobStatus::Completed);
    }

    let done = admin.status().await;
    assert_eq!(done.completed, 5);
    assert_eq!(done.total, 5);
    assert!(h.encoder.peak_concurrency() <= 2);

    h.service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn priority_and_delay_order_dispatch() {
    let h = Harness::new(ScriptedEncoder::new(), 1);
    h.project("low", vec![Scene::video(0, "low.mp4")]).await;
    h.project("high", vec![Scene::video(0, "high.mp4")]).await;
    h.project("later", vec![Scene::video(0, "later.mp4")]).await;

    let mut delayed = CompositionOptions::default();
    delayed.priority = Some(10);
    delayed.delay = Some(30_000);
    let mut urgent = CompositionOptions::default();
    urgent.priority = Some(5);

    let (later, _) = h.enqueue("later", delayed).await;
    let (low, _) = h.enqueue("low", CompositionOptions::default()).await;
    let (high, _) = h.enqueue("high", urgent).await;
    h.service.start().await.unwrap();

    for job_id in [&high, &low, &later] {
        h.wait_terminal(job_id).await;
    }

    let fetched: Vec<String> = h
        .encoder
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            EncoderCall::FetchClip { source } => Some(source),
            _ => None,
        })
        .collect();
    assert_eq!(fetched, vec!["high.mp4", "low.mp4", "later.mp4"]);

    h.service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn delete_job_rules() {
    let h = Harness::new(ScriptedEncoder::new(), 1);
    h.project("p-del", vec![Scene::video(0, "a.mp4")]).await;

    // Waiting jobs can be cancelled before any worker runs.
    let (waiting, entry_id) = h.enqueue("p-del", CompositionOptions::default()).await;
    h.service.delete_job(&waiting, USER).await.unwrap();
    assert!(h.service.entry(&entry_id).await.is_none());
    assert!(h.jobs.get(&waiting).await.unwrap().is_none());

    h.service.start().await.unwrap();
    let (done, _) = h.enqueue("p-del", CompositionOptions::default()).await;
    h.wait_terminal(&done).await;

    // Someone else's job looks like a missing one.
    assert!(matches!(
        h.service.delete_job(&done, "intruder").await,
        Err(WorkerError::JobNotFound(_))
    ));
    h.service.delete_job(&done, USER).await.unwrap();
    assert!(h.service.job_status(&done, USER).await.unwrap().is_none());

    h.service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn processing_job_cannot_be_deleted() {
    let h = Harness::new(ScriptedEncoder::new().with_latency(Duration::from_secs(10)), 1);
    h.project("p-busy", vec![Scene::video(0, "a.mp4")]).await;
    h.service.start().await.unwrap();

    let (job_id, _) = h.enqueue("p-busy", CompositionOptions::default()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = h.service.delete_job(&job_id, USER).await.unwrap_err();
    assert!(matches!(
        err,
        WorkerError::InvalidState {
            status: JobStatus::Processing,
            ..
        }
    ));

    assert_eq!(h.wait_terminal(&job_id).await.status, JobStatus::Completed);
    h.service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn history_and_stats() {
    let h = Harness::new(ScriptedEncoder::new(), 2);
    h.project("good", vec![Scene::video(0, "a.mp4")]).await;
    h.project("empty", vec![]).await;
    h.service.start().await.unwrap();

    let mut ids = Vec::new();
    for project in ["good", "good", "empty"] {
        ids.push(h.enqueue(project, CompositionOptions::default()).await.0);
    }
    for id in &ids {
        h.wait_terminal(id).await;
    }

    let stats = h.service.stats(USER).await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.processing, 0);

    assert_eq!(h.service.history(USER, None).await.unwrap().len(), 3);
    assert_eq!(h.service.history(USER, Some(1)).await.unwrap().len(), 1);
    assert!(h.service.history("someone-else", None).await.unwrap().is_empty());

    h.service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn enqueue_validation() {
    let h = Harness::new(ScriptedEncoder::new(), 1);

    let missing = h
        .service
        .enqueue(ComposeRequest {
            project_id: "p".to_string(),
            user_id: USER.to_string(),
            options: CompositionOptions::default(),
            job_store_id: JobId::from_string("nope"),
        })
        .await;
    assert!(matches!(missing, Err(WorkerError::JobNotFound(_))));

    let mut bad = CompositionOptions::default();
    bad.fps = Some(0);
    assert!(matches!(
        h.service.submit(USER, "p", bad).await,
        Err(WorkerError::InvalidOptions(_))
    ));
    assert!(h.jobs.is_empty().await);

    let (job_id, _) = h.service.submit(USER, "p", CompositionOptions::default()).await.unwrap();
    let duplicate = h
        .service
        .enqueue(ComposeRequest {
            project_id: "p".to_string(),
            user_id: USER.to_string(),
            options: CompositionOptions::default(),
            job_store_id: job_id,
        })
        .await;
    assert!(matches!(duplicate, Err(WorkerError::Queue(_))));
}

#[tokio::test(start_paused = true)]
async fn start_sweeps_orphaned_workspaces() {
    let h = Harness::new(ScriptedEncoder::new(), 1);
    std::fs::create_dir_all(h.work_dir().join("job-crashed-1234")).unwrap();
    std::fs::create_dir_all(h.work_dir().join("keep-me")).unwrap();

    h.service.start().await.unwrap();

    assert!(!h.work_dir().join("job-crashed-1234").exists());
    assert!(h.work_dir().join("keep-me").exists());
    h.service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn clean_keeps_live_entries() {
    let h = Harness::new(ScriptedEncoder::new(), 1);
    h.project("p", vec![Scene::video(0, "a.mp4")]).await;
    h.service.start().await.unwrap();

    let (done, _) = h.enqueue("p", CompositionOptions::default()).await;
    h.wait_terminal(&done).await;
    h.service.admin().pause();
    h.enqueue("p", CompositionOptions::default()).await;

    let report = h
        .service
        .admin()
        .clean(Duration::ZERO, Duration::ZERO, 100)
        .await
        .unwrap();
    assert_eq!(report.completed, 1);

    let counts = h.service.admin().status().await;
    assert_eq!(counts.waiting, 1);
    assert_eq!(counts.total, 1);

    // Nothing in the default policy's age window yet.
    assert_eq!(h.service.admin().clean_default().await.unwrap().total(), 0);
    h.service.stop().await;
}

#[test]
fn export_catalog_lists_resolutions() {
    let h = Harness::new(ScriptedEncoder::new(), 1);
    let catalog = h.service.export_options();
    let values: Vec<_> = catalog.resolutions.iter().map(|r| r.value.as_str()).collect();
    assert_eq!(values, vec!["1280x720", "1920x1080", "2560x1440", "3840x2160"]);
}
