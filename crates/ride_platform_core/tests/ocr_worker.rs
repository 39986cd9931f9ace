mod common;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use ride_platform_core::domain::documents::{
    DocumentDetails, DocumentStatus, HistoryEvent, OcrJob, OcrJobStatus, OcrResult,
};
use ride_platform_core::memory::{InMemoryStore, MockOcrProcessor};
use ride_platform_core::ports::{
    DocumentRepository, OcrJobCompletion, OcrJobFailure, OcrJobRepository, PortError, PortResult,
    RandomIds,
};
use ride_platform_core::services::Viewer;
use ride_platform_core::workers::{OcrWorker, OcrWorkerConfig, OcrWorkerPorts};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use common::{upload, Harness};

#[tokio::test]
async fn low_confidence_completes_but_leaves_document_pending() {
    let h = Harness::new();
    h.document_type("drivers_license", true, true).await;
    let driver = h.store.seed_driver(Uuid::new_v4());
    let doc = h
        .documents
        .upload_document(upload(driver.id, "drivers_license", DocumentDetails::default()))
        .await
        .unwrap();

    let worker = h.ocr_worker(
        MockOcrProcessor::with_result(OcrResult {
            raw_text: "DL 12345".into(),
            confidence: 0.55,
            document_number: Some("DL-12345".into()),
            ..OcrResult::default()
        }),
        OcrWorkerConfig::default(),
    );
    let summary = worker.run_once(&CancellationToken::new()).await;
    assert_eq!(summary.completed, 1);

    let job = h.store.find_ocr_job_for_document(doc.id).await.unwrap().unwrap();
    assert_eq!(job.status, OcrJobStatus::Completed);
    assert_eq!(job.confidence, Some(0.55));
    assert_eq!(job.provider.as_deref(), Some("mock"));

    let doc = h.documents.get_document(doc.id, Viewer::Admin).await.unwrap();
    assert_eq!(doc.status, DocumentStatus::Pending);
    assert_eq!(doc.ocr_confidence, Some(0.55));
    assert!(doc.ocr_processed_at.is_some());
    assert_eq!(doc.details.document_number.as_deref(), Some("DL-12345"));

    let events: Vec<_> = h
        .documents
        .document_history(doc.id, Viewer::Admin)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.event)
        .collect();
    assert!(events.contains(&HistoryEvent::OcrProcessed));
    assert!(events.contains(&HistoryEvent::OcrLowConfidence));
}

#[tokio::test]
async fn extracted_fields_never_overwrite_existing_values() {
    let h = Harness::new();
    h.document_type("drivers_license", true, true).await;
    let driver = h.store.seed_driver(Uuid::new_v4());
    let typed_expiry = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
    let doc = h
        .documents
        .upload_document(upload(
            driver.id,
            "drivers_license",
            DocumentDetails {
                expiry_date: Some(typed_expiry),
                ..DocumentDetails::default()
            },
        ))
        .await
        .unwrap();

    let worker = h.ocr_worker(
        MockOcrProcessor::with_result(OcrResult {
            confidence: 0.93,
            document_number: Some("X-1".into()),
            expiry_date: NaiveDate::from_ymd_opt(2029, 6, 30),
            issuing_authority: Some("DMV".into()),
            ..OcrResult::default()
        }),
        OcrWorkerConfig::default(),
    );
    worker.run_once(&CancellationToken::new()).await;

    let doc = h.documents.get_document(doc.id, Viewer::Admin).await.unwrap();
    assert_eq!(doc.details.expiry_date, Some(typed_expiry));
    assert_eq!(doc.details.document_number.as_deref(), Some("X-1"));
    assert_eq!(doc.details.issuing_authority.as_deref(), Some("DMV"));

    let events: Vec<_> = h
        .documents
        .document_history(doc.id, Viewer::Admin)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.event)
        .collect();
    assert!(!events.contains(&HistoryEvent::OcrLowConfidence));
}

#[tokio::test]
async fn failures_back_off_quadratically_then_stop() {
    let h = Harness::new();
    h.document_type("drivers_license", true, true).await;
    let driver = h.store.seed_driver(Uuid::new_v4());
    let doc = h
        .documents
        .upload_document(upload(driver.id, "drivers_license", DocumentDetails::default()))
        .await
        .unwrap();
    let worker = h.ocr_worker(MockOcrProcessor::new(0.9).failing(3), OcrWorkerConfig::default());
    let token = CancellationToken::new();

    for k in 1..=2 {
        let summary = worker.run_once(&token).await;
        assert_eq!(summary.failed, 1);
        let job = h.store.find_ocr_job_for_document(doc.id).await.unwrap().unwrap();
        assert_eq!(job.status, OcrJobStatus::Failed);
        assert_eq!(job.retry_count, k);
        let delay = job.next_retry_at.unwrap() - h.clock_now();
        assert_eq!(delay, Duration::minutes(i64::from(k * k)));

        // Not due until the back-off has elapsed.
        assert_eq!(worker.run_once(&token).await.failed, 0);
        h.clock.advance(delay);
    }

    worker.run_once(&token).await;
    let job = h.store.find_ocr_job_for_document(doc.id).await.unwrap().unwrap();
    assert_eq!(job.retry_count, 3);
    assert_eq!(job.next_retry_at, None);

    h.clock.advance(Duration::hours(1));
    let summary = worker.run_once(&token).await;
    assert_eq!(summary.completed + summary.failed, 0);
}

#[tokio::test]
async fn missing_document_fails_terminally() {
    let h = Harness::new();
    h.document_type("drivers_license", true, true).await;
    let driver = h.store.seed_driver(Uuid::new_v4());
    let doc = h
        .documents
        .upload_document(upload(driver.id, "drivers_license", DocumentDetails::default()))
        .await
        .unwrap();

    let job = h.store.find_ocr_job_for_document(doc.id).await.unwrap().unwrap();
    h.store.remove_document(doc.id);

    let worker = h.ocr_worker(MockOcrProcessor::new(0.9), OcrWorkerConfig::default());
    worker.run_once(&CancellationToken::new()).await;

    let job = h
        .store
        .ocr_jobs()
        .into_iter()
        .find(|j| j.id == job.id)
        .unwrap();
    assert_eq!(job.status, OcrJobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some("document_not_found"));
    assert!(job.retry_count >= job.max_retries);
    assert_eq!(job.next_retry_at, None);
}

#[tokio::test(start_paused = true)]
async fn slow_download_hits_the_job_deadline() {
    let h = Harness::new();
    h.document_type("drivers_license", true, true).await;
    let driver = h.store.seed_driver(Uuid::new_v4());
    let doc = h
        .documents
        .upload_document(upload(driver.id, "drivers_license", DocumentDetails::default()))
        .await
        .unwrap();
    h.storage.set_download_delay(std::time::Duration::from_secs(120));

    let worker = h.ocr_worker(MockOcrProcessor::new(0.9), OcrWorkerConfig::default());
    let summary = worker.run_once(&CancellationToken::new()).await;
    assert_eq!(summary.failed, 1);

    let job = h.store.find_ocr_job_for_document(doc.id).await.unwrap().unwrap();
    assert_eq!(job.retry_count, 1);
    assert!(job.error_message.unwrap().contains("timed out"));
}

#[tokio::test]
async fn stuck_jobs_are_reaped() {
    let h = Harness::new();
    h.document_type("drivers_license", true, true).await;
    let driver = h.store.seed_driver(Uuid::new_v4());
    let doc = h
        .documents
        .upload_document(upload(driver.id, "drivers_license", DocumentDetails::default()))
        .await
        .unwrap();
    let job = h.store.find_ocr_job_for_document(doc.id).await.unwrap().unwrap();

    // A worker claimed the job and died.
    assert!(h
        .store
        .claim_ocr_job(job.id, OcrJobStatus::Pending, h.clock_now())
        .await
        .unwrap());
    h.clock.advance(Duration::minutes(11));

    let worker = h.ocr_worker(MockOcrProcessor::new(0.9), OcrWorkerConfig::default());
    let summary = worker.run_once(&CancellationToken::new()).await;
    assert_eq!(summary.reaped, 1);
    assert_eq!(summary.completed, 1);

    let job = h.store.find_ocr_job_for_document(doc.id).await.unwrap().unwrap();
    assert_eq!(job.status, OcrJobStatus::Completed);
    assert_eq!(job.retry_count, 1);
}

#[tokio::test]
async fn required_documents_go_first_and_shutdown_stops_the_batch() {
    let h = Harness::new();
    h.document_type("profile_photo", false, true).await;
    h.document_type("drivers_license", true, true).await;
    let driver = h.store.seed_driver(Uuid::new_v4());
    let photo = h
        .documents
        .upload_document(upload(driver.id, "profile_photo", DocumentDetails::default()))
        .await
        .unwrap();
    h.clock.advance(Duration::seconds(1));
    let license = h
        .documents
        .upload_document(upload(driver.id, "drivers_license", DocumentDetails::default()))
        .await
        .unwrap();

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let worker = h.ocr_worker(
        MockOcrProcessor::new(0.9),
        OcrWorkerConfig {
            batch_size: 1,
            ..OcrWorkerConfig::default()
        },
    );
    assert_eq!(worker.run_once(&cancelled).await.completed, 0);

    worker.run_once(&CancellationToken::new()).await;
    let license_job = h.store.find_ocr_job_for_document(license.id).await.unwrap().unwrap();
    let photo_job = h.store.find_ocr_job_for_document(photo.id).await.unwrap().unwrap();
    assert_eq!(license_job.status, OcrJobStatus::Completed);
    assert_eq!(photo_job.status, OcrJobStatus::Pending);
}

#[tokio::test]
async fn completed_jobs_have_bounded_confidence() {
    let h = Harness::new();
    h.document_type("drivers_license", true, true).await;
    let driver = h.store.seed_driver(Uuid::new_v4());
    let doc = h
        .documents
        .upload_document(upload(driver.id, "drivers_license", DocumentDetails::default()))
        .await
        .unwrap();

    let worker = h.ocr_worker(MockOcrProcessor::new(1.7), OcrWorkerConfig::default());
    worker.run_once(&CancellationToken::new()).await;

    let job = h.store.find_ocr_job_for_document(doc.id).await.unwrap().unwrap();
    let confidence = job.confidence.unwrap();
    assert!((0.0..=1.0).contains(&confidence));
    let stored = h.store.find_document(doc.id).await.unwrap().unwrap();
    assert!(stored.ocr_processed_at.is_some());
}

#[tokio::test]
async fn non_finite_confidence_is_stored_as_zero() {
    let h = Harness::new();
    h.document_type("drivers_license", true, true).await;
    let driver = h.store.seed_driver(Uuid::new_v4());
    let doc = h
        .documents
        .upload_document(upload(driver.id, "drivers_license", DocumentDetails::default()))
        .await
        .unwrap();

    let worker = h.ocr_worker(MockOcrProcessor::new(f64::NAN), OcrWorkerConfig::default());
    worker.run_once(&CancellationToken::new()).await;

    let job = h.store.find_ocr_job_for_document(doc.id).await.unwrap().unwrap();
    assert_eq!(job.confidence, Some(0.0));
    let stored = h.store.find_document(doc.id).await.unwrap().unwrap();
    assert_eq!(stored.ocr_confidence, Some(0.0));
}

/// Job queue whose next completion fails before anything is written.
struct FailingCompletion {
    inner: Arc<InMemoryStore>,
    fail_next: AtomicBool,
}

#[async_trait]
impl OcrJobRepository for FailingCompletion {
    async fn list_due_ocr_jobs(&self, now: DateTime<Utc>, limit: i64) -> PortResult<Vec<OcrJob>> {
        self.inner.list_due_ocr_jobs(now, limit).await
    }

    async fn claim_ocr_job(&self, job_id: Uuid, expected: OcrJobStatus, now: DateTime<Utc>) -> PortResult<bool> {
        self.inner.claim_ocr_job(job_id, expected, now).await
    }

    async fn complete_ocr_job(&self, job_id: Uuid, completion: OcrJobCompletion) -> PortResult<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(PortError::Unavailable("connection reset".into()));
        }
        self.inner.complete_ocr_job(job_id, completion).await
    }

    async fn fail_ocr_job(&self, job_id: Uuid, failure: OcrJobFailure) -> PortResult<()> {
        self.inner.fail_ocr_job(job_id, failure).await
    }

    async fn reap_stuck_ocr_jobs(&self, started_before: DateTime<Utc>, now: DateTime<Utc>) -> PortResult<u64> {
        self.inner.reap_stuck_ocr_jobs(started_before, now).await
    }

    async fn find_ocr_job_for_document(&self, document_id: Uuid) -> PortResult<Option<OcrJob>> {
        self.inner.find_ocr_job_for_document(document_id).await
    }
}

#[tokio::test]
async fn failed_commit_leaves_no_partial_result_and_retry_records_once() {
    let h = Harness::new();
    h.document_type("drivers_license", true, true).await;
    let driver = h.store.seed_driver(Uuid::new_v4());
    let doc = h
        .documents
        .upload_document(upload(driver.id, "drivers_license", DocumentDetails::default()))
        .await
        .unwrap();

    let worker = OcrWorker::new(
        OcrWorkerPorts {
            jobs: Arc::new(FailingCompletion {
                inner: h.store.clone(),
                fail_next: AtomicBool::new(true),
            }),
            documents: h.store.clone(),
            types: h.store.clone(),
            storage: h.storage.clone(),
            processor: Arc::new(MockOcrProcessor::new(0.9)),
            clock: h.clock.clone(),
            ids: Arc::new(RandomIds),
        },
        OcrWorkerConfig::default(),
    );
    let token = CancellationToken::new();

    let first = worker.run_once(&token).await;
    assert_eq!(first.completed, 0);
    assert_eq!(first.failed, 1);
    let job = h.store.find_ocr_job_for_document(doc.id).await.unwrap().unwrap();
    assert_eq!(job.status, OcrJobStatus::Failed);
    let stored = h.store.find_document(doc.id).await.unwrap().unwrap();
    assert!(stored.ocr_processed_at.is_none());
    assert!(stored.ocr_data.is_none());

    h.clock.advance(Duration::minutes(2));
    let second = worker.run_once(&token).await;
    assert_eq!(second.completed, 1);
    let job = h.store.find_ocr_job_for_document(doc.id).await.unwrap().unwrap();
    assert_eq!(job.status, OcrJobStatus::Completed);

    let processed = h
        .documents
        .document_history(doc.id, Viewer::Admin)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.event == HistoryEvent::OcrProcessed)
        .count();
    assert_eq!(processed, 1);
}
