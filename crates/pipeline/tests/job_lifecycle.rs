//! End-to-end behaviour of the job orchestrator over scripted transforms.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{harness, manifest, CountingTransform, GatedTransform, ScriptedTransform};
use imgpipe_core::manifest::{decode, ManifestColumns};
use imgpipe_core::naming::{artifact_key, result_manifest_key};
use imgpipe_core::types::JobId;
use imgpipe_db::JobStatus;
use imgpipe_events::bus::{EVENT_IMAGE_FAILED, EVENT_JOB_COMPLETED};

const DRAIN: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Test: one failing image shrinks the row, the job still completes
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_image_is_dropped_from_row_and_job_completes() {
    let a = "https://img.test/a.jpg";
    let b = "https://img.test/b.jpg";
    let c = "https://img.test/c.jpg";
    let h = harness(Arc::new(ScriptedTransform::failing(&[b])), 4);
    let mut rx = h.events.subscribe();

    let job_id = h
        .orchestrator
        .submit(manifest(&[("SKU1", &[a, b, c])]))
        .await
        .unwrap();
    assert!(h.orchestrator.shutdown(DRAIN).await);

    let record = h.orchestrator.query(&job_id).await.unwrap();
    assert_eq!(record.status, JobStatus::Completed);

    let raw = h.orchestrator.result_manifest(&job_id).await.unwrap();
    let result = decode(&raw, &ManifestColumns::default()).unwrap();
    let row = &result.rows()[0];
    assert_eq!(
        result.value(row, "Output Image Urls"),
        Some(
            format!(
                "mem://{},mem://{}",
                artifact_key(&job_id, 0, a),
                artifact_key(&job_id, 0, c)
            )
            .as_str()
        )
    );
    assert_eq!(result.value(row, "Product Name"), Some("SKU1"));

    let mut saw_failure = false;
    while let Ok(event) = rx.try_recv() {
        if event.event_type == EVENT_IMAGE_FAILED {
            assert_eq!(event.payload["source"], b);
            saw_failure = true;
        }
        if event.event_type == EVENT_JOB_COMPLETED {
            assert_eq!(event.payload["images_failed"], 1);
            assert_eq!(event.payload["images_succeeded"], 2);
        }
    }
    assert!(saw_failure);
}

// ---------------------------------------------------------------------------
// Test: in-flight transforms never exceed the configured bound
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrency_bound_holds_for_large_manifest() {
    const BOUND: usize = 3;
    let transform = Arc::new(CountingTransform::default());
    let h = harness(transform.clone(), BOUND);

    let refs: Vec<String> = (0..5).map(|i| format!("https://img.test/{i}.jpg")).collect();
    let refs: Vec<&str> = refs.iter().map(String::as_str).collect();
    let names: Vec<String> = (0..100).map(|i| format!("SKU{i}")).collect();
    let rows: Vec<(&str, &[&str])> = names.iter().map(|n| (n.as_str(), &refs[..])).collect();

    let job_id = h.orchestrator.submit(manifest(&rows)).await.unwrap();
    assert!(h.orchestrator.shutdown(DRAIN).await);

    assert_eq!(transform.calls.load(Ordering::SeqCst), 500);
    let max_seen = transform.max_seen.load(Ordering::SeqCst);
    assert!(max_seen <= BOUND, "observed {max_seen} concurrent transforms");
    assert!(max_seen >= 1);

    let record = h.orchestrator.query(&job_id).await.unwrap();
    assert_eq!(record.status, JobStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bound_is_shared_across_jobs() {
    const BOUND: usize = 2;
    let transform = Arc::new(CountingTransform::default());
    let h = harness(transform.clone(), BOUND);

    let refs = ["https://img.test/1.jpg", "https://img.test/2.jpg", "https://img.test/3.jpg"];
    for _ in 0..4 {
        h.orchestrator
            .submit(manifest(&[("A", &refs), ("B", &refs)]))
            .await
            .unwrap();
    }
    assert!(h.orchestrator.shutdown(DRAIN).await);

    assert_eq!(transform.calls.load(Ordering::SeqCst), 24);
    assert!(transform.max_seen.load(Ordering::SeqCst) <= BOUND);
}

// ---------------------------------------------------------------------------
// Test: rows without inputs never reach the transform
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_rows_do_not_invoke_transform() {
    let transform = Arc::new(ScriptedTransform::default());
    let h = harness(transform.clone(), 2);

    let job_id = h
        .orchestrator
        .submit(manifest(&[("SKU1", &[]), ("SKU2", &[])]))
        .await
        .unwrap();
    assert!(h.orchestrator.shutdown(DRAIN).await);

    assert_eq!(transform.calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        h.orchestrator.query(&job_id).await.unwrap().status,
        JobStatus::Completed
    );

    let raw = h.orchestrator.result_manifest(&job_id).await.unwrap();
    let result = decode(&raw, &ManifestColumns::default()).unwrap();
    for row in result.rows() {
        assert_eq!(result.value(row, "Output Image Urls"), Some(""));
    }
}

#[tokio::test]
async fn manifest_without_image_column_completes_unchanged() {
    let h = harness(Arc::new(ScriptedTransform::default()), 2);
    let raw = b"sku,name\n1,Shoe\n2,Hat\n".to_vec();

    let job_id = h.orchestrator.submit(raw.clone()).await.unwrap();
    assert!(h.orchestrator.shutdown(DRAIN).await);

    assert_eq!(h.orchestrator.result_manifest(&job_id).await.unwrap(), raw);
}

// ---------------------------------------------------------------------------
// Test: status visibility around the background run
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_is_pending_until_run_finishes() {
    let transform = Arc::new(GatedTransform::default());
    let h = harness(transform.clone(), 2);

    let job_id = h
        .orchestrator
        .submit(manifest(&[("SKU1", &["https://img.test/a.jpg"])]))
        .await
        .unwrap();

    let pending = h.orchestrator.query(&job_id).await.unwrap();
    assert_eq!(pending.status, JobStatus::Pending);
    assert!(pending.completed_at.is_none());
    assert_eq!(h.orchestrator.in_flight(), 1);

    transform.open();
    assert!(h.orchestrator.shutdown(DRAIN).await);

    let done = h.orchestrator.query(&job_id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    let completed_at = done.completed_at.expect("completed_at set");
    assert!(completed_at >= done.created_at);
    assert_eq!(done.created_at, pending.created_at);
    assert_eq!(h.orchestrator.in_flight(), 0);
}

#[tokio::test]
async fn shutdown_times_out_while_jobs_are_stuck() {
    let transform = Arc::new(GatedTransform::default());
    let h = harness(transform.clone(), 1);

    h.orchestrator
        .submit(manifest(&[("SKU1", &["https://img.test/a.jpg"])]))
        .await
        .unwrap();

    assert!(!h.orchestrator.shutdown(Duration::from_millis(50)).await);
    transform.open();
    assert!(h.orchestrator.shutdown(DRAIN).await);
}

#[tokio::test]
async fn unknown_job_is_none() {
    let h = harness(Arc::new(ScriptedTransform::default()), 2);
    assert!(h.orchestrator.query(&JobId::from("never-submitted")).await.is_none());
}

// ---------------------------------------------------------------------------
// Test: manifest-level failures fail the job
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_manifest_fails_job() {
    let transform = Arc::new(ScriptedTransform::default());
    let h = harness(transform.clone(), 2);

    let job_id = h
        .orchestrator
        .submit(b"a,b,Input Image Urls\n1,2\n".to_vec())
        .await
        .unwrap();
    assert!(h.orchestrator.shutdown(DRAIN).await);

    let record = h.orchestrator.query(&job_id).await.unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.completed_at.is_some());
    assert_eq!(transform.calls.load(Ordering::SeqCst), 0);
    assert!(h
        .publisher
        .artifacts
        .lock()
        .unwrap()
        .get(&result_manifest_key(&job_id))
        .is_none());
}

#[tokio::test]
async fn submissions_get_distinct_ids() {
    let h = harness(Arc::new(ScriptedTransform::default()), 2);
    let a = h.orchestrator.submit(manifest(&[])).await.unwrap();
    let b = h.orchestrator.submit(manifest(&[])).await.unwrap();
    assert_ne!(a, b);
    assert!(h.orchestrator.shutdown(DRAIN).await);
    assert_eq!(h.repo.count_by_status(JobStatus::Completed).await, 2);
}
