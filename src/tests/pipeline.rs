//! End-to-end scenarios over a scripted backend and a paused clock

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::Receiver;
use tokio::time::sleep;

use super::mocks::{MockGenerationApi, MockViewer, RecordedCall};
use super::utils::test_helpers::*;
use crate::artifact::ArtifactStore;
use crate::config::GenerationConfig;
use crate::error::{ErrorCode, ForgeError};
use crate::job::{ImageUpload, JobId, JobKind, JobRequest, JobStatus, Thumbnail};
use crate::session::{Admission, GenerationSession, SessionEvent};

type Session = GenerationSession<MockGenerationApi>;

fn session_with(api: &MockGenerationApi, config: GenerationConfig) -> Session {
    GenerationSession::new(api.clone(), config).unwrap()
}

fn accepted(admission: Admission) -> JobId {
    match admission {
        Admission::Accepted(id) => id,
        Admission::AlreadySubmitting => panic!("submission was ignored"),
    }
}

/// Let the background submission finish without advancing the clock
async fn submitted(session: &Session) {
    while session.is_submitting() {
        tokio::task::yield_now().await;
    }
}

/// Run a text job through to completion and return its id and model handle
async fn completed_job(session: &Session, api: &MockGenerationApi, id: &str) -> (JobId, String) {
    let path = format!("/files/{}.bin", id);
    api.add_submission(id);
    api.add_status(id, completed_body(&path));
    api.add_download(&path, &glb_bytes());

    accepted(session.submit_job(JobRequest::text(id)).unwrap());
    session.wait_until_settled().await;

    let job_id = JobId::new(id);
    let url = session.record(&job_id).unwrap().url.unwrap();
    (job_id, url)
}

fn drain(events: &mut Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

fn statuses_for(events: &[SessionEvent], id: &JobId) -> Vec<JobStatus> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::JobUpdated { job_id, status } if job_id == id => Some(*status),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_text_job_end_to_end_with_capture() {
    let api = MockGenerationApi::new();
    api.add_submission("abc");
    api.add_status("abc", status_body("processing"));
    api.add_status("abc", completed_body("/files/abc.bin"));
    api.add_download("/files/abc.bin", &glb_bytes());

    let viewer = Arc::new(MockViewer::rendering());
    let session = session_with(&api, generation_config()).with_viewer(viewer.clone());
    let mut events = session.subscribe();

    let temp_id = accepted(session.submit_job(JobRequest::text("a ceramic mug")).unwrap());
    let placeholder = session.record(&temp_id).unwrap();
    assert_eq!(placeholder.status, JobStatus::Queued);
    assert_eq!(placeholder.prompt, "a ceramic mug");
    assert!(placeholder.url.is_none());
    assert_eq!(session.library(|l| l.len()), 1);

    session.wait_until_settled().await;

    let job_id = JobId::new("abc");
    assert!(session.record(&temp_id).is_none());
    let record = session.record(&job_id).unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    let url = record.url.clone().unwrap();
    assert!(ArtifactStore::is_handle(&url));
    assert_eq!(
        record.thumbnail,
        Thumbnail::Placeholder("/logo/dark.png".to_string())
    );
    assert_eq!(session.current_model().as_deref(), Some(url.as_str()));
    assert_eq!(&*session.artifact_bytes(&url).unwrap(), glb_bytes().as_slice());
    assert_eq!(api.status_calls("abc"), 2);
    assert!(!session.is_polling(&job_id));

    assert!(session.notify_model_loaded());
    session.wait_until_settled().await;

    let record = session.record(&job_id).unwrap();
    match &record.thumbnail {
        Thumbnail::Captured(data) => assert!(data.starts_with("data:image/png;base64,")),
        other => panic!("expected a captured thumbnail, got {:?}", other),
    }
    assert_eq!(viewer.snapshots(), 1);

    let seen = drain(&mut events);
    assert_eq!(seen[0], SessionEvent::JobInserted { job_id: temp_id.clone() });
    assert_eq!(
        seen[1],
        SessionEvent::JobRenamed {
            from: temp_id,
            to: job_id.clone()
        }
    );
    assert_eq!(
        statuses_for(&seen, &job_id),
        vec![
            JobStatus::Processing,
            JobStatus::Downloading,
            JobStatus::Completed
        ]
    );
    assert!(seen.contains(&SessionEvent::CurrentModelChanged {
        url: Some(url.clone())
    }));
    assert_eq!(seen.last(), Some(&SessionEvent::ThumbnailCaptured { job_id }));
}

#[tokio::test(start_paused = true)]
async fn test_backend_failure_stops_polling_without_download() {
    let api = MockGenerationApi::new();
    api.add_submission("img-1");
    api.add_status("img-1", failed_body("model server overloaded"));
    let session = session_with(&api, generation_config());

    let upload = ImageUpload::new("chair.png", "image/png", vec![0x89, b'P', b'N', b'G']);
    accepted(session.submit_job(JobRequest::image(upload)).unwrap());
    session.wait_until_settled().await;

    let job_id = JobId::new("img-1");
    let record = session.record(&job_id).unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.error.as_deref(), Some("model server overloaded"));
    assert_eq!(record.prompt, "chair.png");
    assert!(!session.is_polling(&job_id));
    assert_eq!(api.download_calls(), 0);
    assert!(api.calls().contains(&RecordedCall::Submit {
        kind: JobKind::Image,
        prompt: "chair.png".to_string()
    }));

    // No further ticks once terminal
    sleep(Duration::from_secs(30)).await;
    assert_eq!(api.status_calls("img-1"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failure_without_message_uses_default() {
    let api = MockGenerationApi::new();
    api.add_submission("x");
    api.add_status("x", status_body("failed"));
    let session = session_with(&api, generation_config());

    accepted(session.submit_job(JobRequest::text("vase")).unwrap());
    session.wait_until_settled().await;

    let record = session.record(&JobId::new("x")).unwrap();
    assert_eq!(record.error.as_deref(), Some("An unknown error occurred."));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_window_rolls_over() {
    let api = MockGenerationApi::new();
    for i in 1..=7 {
        api.add_status(&format!("job-{}", i), status_body("processing"));
    }
    let config = GenerationConfig {
        max_concurrent_jobs: 10,
        ..generation_config()
    };
    let session = session_with(&api, config);

    for i in 0..5 {
        accepted(session.submit_job(JobRequest::text(format!("prompt {}", i))).unwrap());
        submitted(&session).await;
    }
    assert!(session.is_rate_limited());

    sleep(Duration::from_secs(60)).await;
    let err = session.submit_job(JobRequest::text("sixth")).unwrap_err();
    assert_eq!(err.code(), ErrorCode::RateLimited);
    assert!(err.is_admission_error());
    match err {
        ForgeError::RateLimited { retry_after, .. } => {
            assert_eq!(retry_after, Duration::from_secs(9 * 60));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(session.library(|l| l.len()), 5);

    sleep(Duration::from_secs(10 * 60)).await;
    assert!(!session.is_rate_limited());
    accepted(session.submit_job(JobRequest::text("sixth")).unwrap());
    assert_eq!(session.library(|l| l.len()), 6);
}

#[tokio::test(start_paused = true)]
async fn test_failed_submissions_do_not_count_against_rate_limit() {
    let api = MockGenerationApi::new();
    api.add_submission_error(ForgeError::api(503, "GPU pool exhausted"));
    let session = session_with(&api, generation_config());

    let temp_id = accepted(session.submit_job(JobRequest::text("mug")).unwrap());
    session.wait_until_settled().await;

    let record = session.record(&temp_id).unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.error.as_deref(), Some("GPU pool exhausted"));
    assert_eq!(session.remaining_requests(), 5);
    assert!(!session.is_submitting());
    assert_eq!(api.status_calls(temp_id.as_str()), 0);
}

#[tokio::test(start_paused = true)]
async fn test_discovery_error_is_surfaced_on_the_record() {
    let api = MockGenerationApi::new();
    api.fail_discovery(ForgeError::discovery("Backend URL not found"));
    let session = session_with(&api, generation_config());

    let temp_id = accepted(session.submit_job(JobRequest::text("mug")).unwrap());
    session.wait_until_settled().await;

    let record = session.record(&temp_id).unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.error.as_deref(), Some("Backend URL not found"));
}

#[tokio::test(start_paused = true)]
async fn test_queue_full_is_independent_of_rate_limit() {
    let api = MockGenerationApi::new();
    api.add_status("job-1", status_body("processing"));
    api.add_status("job-1", failed_body("out of memory"));
    api.add_status("job-2", status_body("processing"));
    api.add_status("job-3", status_body("queued"));
    api.add_status("job-4", status_body("processing"));
    let session = session_with(&api, generation_config());

    for i in 0..3 {
        accepted(session.submit_job(JobRequest::text(format!("p{}", i))).unwrap());
        submitted(&session).await;
    }
    assert_eq!(session.active_jobs(), 3);
    assert!(!session.is_rate_limited());

    let err = session.submit_job(JobRequest::text("fourth")).unwrap_err();
    assert_eq!(err.code(), ErrorCode::QueueFull);
    assert!(!session.is_submitting());

    // job-1 fails on its second tick
    sleep(Duration::from_secs(7)).await;
    assert_eq!(
        session.record(&JobId::new("job-1")).unwrap().status,
        JobStatus::Failed
    );
    assert_eq!(session.active_jobs(), 2);
    accepted(session.submit_job(JobRequest::text("fourth")).unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_ids_stay_unique_across_renames() {
    let api = MockGenerationApi::new();
    api.add_submission("dup");
    api.add_submission("dup");
    api.add_status("dup", status_body("processing"));
    let session = session_with(&api, generation_config());

    let first = accepted(session.submit_job(JobRequest::text("one")).unwrap());
    submitted(&session).await;
    let second = accepted(session.submit_job(JobRequest::text("two")).unwrap());
    submitted(&session).await;

    let ids: Vec<JobId> = session.library(|l| l.records().iter().map(|r| r.job_id.clone()).collect());
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
    assert!(session.record(&first).is_none());
    assert_eq!(
        session.record(&JobId::new("dup")).unwrap().status,
        JobStatus::Processing
    );

    // The colliding submission is failed under its temporary id
    let loser = session.record(&second).unwrap();
    assert_eq!(loser.status, JobStatus::Failed);
    assert_eq!(loser.prompt, "two");
}

#[tokio::test(start_paused = true)]
async fn test_transient_errors_are_bounded() {
    let api = MockGenerationApi::new();
    api.add_submission("flaky");
    api.add_status_error("flaky", ForgeError::network("connection reset"));
    api.add_status_error("flaky", ForgeError::network("connection reset"));
    api.add_status("flaky", status_body("processing"));
    api.add_status_error("flaky", ForgeError::network("connection reset"));
    let session = session_with(&api, generation_config());

    accepted(session.submit_job(JobRequest::text("mug")).unwrap());
    session.wait_until_settled().await;

    let record = session.record(&JobId::new("flaky")).unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(
        record.error.as_deref(),
        Some("Lost contact with generation backend: connection reset")
    );
    // Two errors, one success resetting the count, then five errors
    assert_eq!(api.status_calls("flaky"), 8);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_job_fails_without_retrying() {
    let api = MockGenerationApi::new();
    api.add_submission("lost");
    api.add_status_error("lost", ForgeError::api(404, "Job not found"));
    let session = session_with(&api, generation_config());

    accepted(session.submit_job(JobRequest::text("mug")).unwrap());
    session.wait_until_settled().await;

    let record = session.record(&JobId::new("lost")).unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.error.as_deref(), Some("Job not found"));
    assert_eq!(api.status_calls("lost"), 1);
    assert!(!session.is_polling(&JobId::new("lost")));
}

#[tokio::test(start_paused = true)]
async fn test_regressing_status_is_ignored() {
    let api = MockGenerationApi::new();
    api.add_submission("r");
    api.add_status("r", status_body("processing"));
    api.add_status("r", status_body("queued"));
    api.add_status("r", completed_body("/files/r.bin"));
    api.add_download("/files/r.bin", &glb_bytes());
    let session = session_with(&api, generation_config());
    let mut events = session.subscribe();

    accepted(session.submit_job(JobRequest::text("mug")).unwrap());
    session.wait_until_settled().await;

    let job_id = JobId::new("r");
    assert_eq!(
        statuses_for(&drain(&mut events), &job_id),
        vec![
            JobStatus::Processing,
            JobStatus::Downloading,
            JobStatus::Completed
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_completion_without_download_url_fails() {
    let api = MockGenerationApi::new();
    api.add_submission("nourl");
    api.add_status("nourl", status_body("completed"));
    let session = session_with(&api, generation_config());

    accepted(session.submit_job(JobRequest::text("mug")).unwrap());
    session.wait_until_settled().await;

    let record = session.record(&JobId::new("nourl")).unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(
        record.error.as_deref(),
        Some("Backend reported completion without a download URL")
    );
    assert_eq!(api.download_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_download_failure_is_terminal() {
    let api = MockGenerationApi::new();
    api.add_submission("dl");
    api.add_status("dl", completed_body("/files/dl.bin"));
    api.add_download_error(
        "/files/dl.bin",
        ForgeError::download("Failed to download GLB file. Status: 500"),
    );
    let session = session_with(&api, generation_config());
    let mut events = session.subscribe();

    accepted(session.submit_job(JobRequest::text("mug")).unwrap());
    session.wait_until_settled().await;

    let job_id = JobId::new("dl");
    let record = session.record(&job_id).unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(
        record.error.as_deref(),
        Some("Failed to download GLB file. Status: 500")
    );
    assert!(record.url.is_none());
    assert_eq!(
        statuses_for(&drain(&mut events), &job_id),
        vec![
            JobStatus::Processing,
            JobStatus::Downloading,
            JobStatus::Failed
        ]
    );
    assert!(session.library(|l| l.artifacts().live_count()) == 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_is_idempotent_and_releases_once() {
    let api = MockGenerationApi::new();
    let session = session_with(&api, generation_config());
    let (job_id, url) = completed_job(&session, &api, "done").await;

    session.remove_job(&job_id).unwrap();
    assert!(session.remove_job(&job_id).is_err());
    assert!(session.artifact_bytes(&url).is_err());
    assert!(session.current_model().is_none());

    session.dispose();
    session.dispose();
    assert_eq!(session.library(|l| l.artifacts().stats()), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn test_remove_stops_polling() {
    let api = MockGenerationApi::new();
    api.add_submission("slow");
    api.add_status("slow", status_body("processing"));
    let session = session_with(&api, generation_config());

    accepted(session.submit_job(JobRequest::text("mug")).unwrap());
    submitted(&session).await;
    let job_id = JobId::new("slow");
    assert!(session.is_polling(&job_id));

    sleep(Duration::from_millis(3500)).await;
    let calls = api.status_calls("slow");
    assert_eq!(calls, 1);

    session.remove_job(&job_id).unwrap();
    assert!(!session.is_polling(&job_id));
    sleep(Duration::from_secs(30)).await;
    assert_eq!(api.status_calls("slow"), calls);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_the_session_stops_pollers() {
    let api = MockGenerationApi::new();
    api.add_submission("orphan");
    api.add_status("orphan", status_body("processing"));

    {
        let session = session_with(&api, generation_config());
        accepted(session.submit_job(JobRequest::text("mug")).unwrap());
        submitted(&session).await;
        sleep(Duration::from_millis(3500)).await;
    }

    let calls = api.status_calls("orphan");
    sleep(Duration::from_secs(30)).await;
    assert_eq!(api.status_calls("orphan"), calls);
}

#[tokio::test(start_paused = true)]
async fn test_capture_happens_once_per_job() {
    let api = MockGenerationApi::new();
    let viewer = Arc::new(MockViewer::rendering());
    let session = session_with(&api, generation_config()).with_viewer(viewer.clone());
    let (job_id, _) = completed_job(&session, &api, "mug").await;

    // Two loads in a row before the settle delay elapses
    assert!(session.notify_model_loaded());
    assert!(session.notify_model_loaded());
    session.wait_until_settled().await;
    assert_eq!(viewer.snapshots(), 1);

    // Re-render after capture: nothing left to do
    assert!(!session.notify_model_loaded());
    session.wait_until_settled().await;
    assert_eq!(viewer.snapshots(), 1);
    assert!(matches!(
        session.record(&job_id).unwrap().thumbnail,
        Thumbnail::Captured(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_blank_or_failed_snapshots_keep_placeholder() {
    let api = MockGenerationApi::new();
    let tiny = Arc::new(MockViewer::with_frame("data:image/png;base64,AAAA".to_string()));
    let session = session_with(&api, generation_config()).with_viewer(tiny.clone());
    let (job_id, _) = completed_job(&session, &api, "mug").await;

    assert!(session.notify_model_loaded());
    session.wait_until_settled().await;
    assert_eq!(tiny.snapshots(), 1);
    assert!(session.record(&job_id).unwrap().thumbnail.needs_capture());

    let broken = Arc::new(MockViewer::failing("context lost"));
    session.attach_viewer(broken.clone());
    assert!(session.notify_model_loaded());
    session.wait_until_settled().await;
    assert_eq!(broken.snapshots(), 1);
    assert_eq!(
        session.record(&job_id).unwrap().thumbnail,
        Thumbnail::Placeholder("/logo/dark.png".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_must_be_an_image_data_url() {
    let api = MockGenerationApi::new();
    let garbage = Arc::new(MockViewer::with_frame("x".repeat(4096)));
    let session = session_with(&api, generation_config()).with_viewer(garbage.clone());
    let (job_id, _) = completed_job(&session, &api, "mug").await;

    assert!(session.notify_model_loaded());
    session.wait_until_settled().await;
    assert_eq!(garbage.snapshots(), 1);
    assert!(session.record(&job_id).unwrap().thumbnail.needs_capture());

    let text = Arc::new(MockViewer::with_frame(crate::utils::encode_data_url(
        "text/plain",
        &[b'a'; 2048],
    )));
    session.attach_viewer(text.clone());
    assert!(session.notify_model_loaded());
    session.wait_until_settled().await;
    assert_eq!(text.snapshots(), 1);
    assert!(session.record(&job_id).unwrap().thumbnail.needs_capture());
}

#[tokio::test(start_paused = true)]
async fn test_switching_models_cancels_pending_capture() {
    let api = MockGenerationApi::new();
    let viewer = Arc::new(MockViewer::rendering());
    let session = session_with(&api, generation_config()).with_viewer(viewer.clone());
    let (first, first_url) = completed_job(&session, &api, "first").await;
    let (second, second_url) = completed_job(&session, &api, "second").await;
    assert_eq!(session.current_model().as_deref(), Some(second_url.as_str()));

    assert!(session.notify_model_loaded());
    session.set_current_model(Some(first_url)).unwrap();
    assert!(!session.capture_in_progress());

    sleep(Duration::from_secs(1)).await;
    assert_eq!(viewer.snapshots(), 0);
    assert!(session.record(&second).unwrap().thumbnail.needs_capture());

    assert!(session.notify_model_loaded());
    session.wait_until_settled().await;
    assert_eq!(viewer.snapshots(), 1);
    assert!(!session.record(&first).unwrap().thumbnail.needs_capture());
    assert!(session.record(&second).unwrap().thumbnail.needs_capture());
}

#[tokio::test(start_paused = true)]
async fn test_export_completed_job() {
    let api = MockGenerationApi::new();
    let session = session_with(&api, generation_config());
    let (job_id, _) = completed_job(&session, &api, "ceramic-mug").await;

    let dir = create_temp_dir();
    let path = session.export_job(&job_id, dir.path(), false).await.unwrap();
    assert_eq!(path, dir.path().join("ceramic_mug.glb"));
    assert_eq!(std::fs::read(&path).unwrap(), glb_bytes());

    let err = session
        .export_job(&job_id, dir.path(), false)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::FileAlreadyExists);
}
