//! crates/ride_platform_core/src/workers/ocr.rs
//!
//! Drains the OCR job queue: claim, download, extract, persist, retry.

use bytes::BytesMut;
use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::documents::{
    DriverDocument, HistoryEntry, HistoryEvent, OcrJob, OcrResult, Performer,
};
use crate::ports::{
    Clock, DocumentRepository, DocumentTypeRepository, IdGenerator, OcrDocumentUpdate,
    OcrJobCompletion, OcrJobFailure, OcrJobRepository, OcrProcessor, PortError, PortResult,
    Storage,
};

#[derive(Debug, Clone)]
pub struct OcrWorkerConfig {
    pub tick: std::time::Duration,
    pub batch_size: i64,
    /// Results below this confidence still complete, with a warning event.
    pub min_confidence: f64,
    /// Upper bound on downloading and processing one job.
    pub job_timeout: std::time::Duration,
    /// Jobs left in `processing` longer than this are handed back to the queue.
    pub stuck_job_threshold: Duration,
}

impl Default for OcrWorkerConfig {
    fn default() -> Self {
        Self {
            tick: std::time::Duration::from_secs(30),
            batch_size: 10,
            min_confidence: 0.7,
            job_timeout: std::time::Duration::from_secs(60),
            stuck_job_threshold: Duration::minutes(10),
        }
    }
}

#[derive(Clone)]
pub struct OcrWorkerPorts {
    pub jobs: Arc<dyn OcrJobRepository>,
    pub documents: Arc<dyn DocumentRepository>,
    pub types: Arc<dyn DocumentTypeRepository>,
    pub storage: Arc<dyn Storage>,
    pub processor: Arc<dyn OcrProcessor>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OcrPassSummary {
    pub reaped: u64,
    pub completed: usize,
    pub failed: usize,
    /// Jobs another worker claimed first.
    pub skipped: usize,
}

enum JobOutcome {
    Completed,
    Failed,
    Skipped,
}

/// Why a job attempt did not complete.
struct AttemptError {
    message: String,
    retryable: bool,
}

impl AttemptError {
    fn retry(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    fn terminal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl From<PortError> for AttemptError {
    fn from(err: PortError) -> Self {
        AttemptError::retry(err.to_string())
    }
}

/// When the k-th failed attempt may run again: k squared minutes from `now`.
pub fn next_retry_at(now: DateTime<Utc>, retry_count: i32) -> DateTime<Utc> {
    let k = i64::from(retry_count.max(1));
    now + Duration::minutes(k * k)
}

/// Clamps a processor confidence into `[0, 1]`; non-finite values count as 0.
fn normalize_confidence(raw: f64) -> f64 {
    if raw.is_finite() {
        raw.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

pub struct OcrWorker {
    ports: OcrWorkerPorts,
    config: OcrWorkerConfig,
}

impl OcrWorker {
    pub fn new(ports: OcrWorkerPorts, config: OcrWorkerConfig) -> Self {
        Self { ports, config }
    }

    /// Runs until `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let period = self.config.tick;
        super::run_every("ocr", period, shutdown, move |token| {
            let worker = self.clone();
            async move {
                worker.run_once(&token).await;
            }
        })
        .await;
    }

    /// One tick: reap stuck jobs, then work through a batch of due jobs.
    pub async fn run_once(&self, shutdown: &CancellationToken) -> OcrPassSummary {
        let mut summary = OcrPassSummary::default();
        let now = self.ports.clock.now();

        match self
            .ports
            .jobs
            .reap_stuck_ocr_jobs(now - self.config.stuck_job_threshold, now)
            .await
        {
            Ok(0) => {}
            Ok(n) => {
                warn!(count = n, "Requeued OCR jobs stuck in processing");
                summary.reaped = n;
            }
            Err(e) => error!(error = %e, "Failed to reap stuck OCR jobs"),
        }

        let jobs = match self
            .ports
            .jobs
            .list_due_ocr_jobs(now, self.config.batch_size)
            .await
        {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "Failed to list due OCR jobs");
                return summary;
            }
        };
        if jobs.is_empty() {
            return summary;
        }
        debug!(count = jobs.len(), "Processing OCR batch");

        for job in jobs {
            if shutdown.is_cancelled() {
                info!("Shutdown requested, leaving remaining OCR jobs for the next run");
                break;
            }
            match self.process_job(job).await {
                JobOutcome::Completed => summary.completed += 1,
                JobOutcome::Failed => summary.failed += 1,
                JobOutcome::Skipped => summary.skipped += 1,
            }
        }
        summary
    }

    async fn process_job(&self, job: OcrJob) -> JobOutcome {
        let started = self.ports.clock.now();
        match self.ports.jobs.claim_ocr_job(job.id, job.status, started).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(job_id = %job.id, "OCR job already claimed");
                return JobOutcome::Skipped;
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to claim OCR job");
                return JobOutcome::Skipped;
            }
        }

        let attempt = tokio::time::timeout(self.config.job_timeout, self.extract(&job)).await;
        let outcome = match attempt {
            Ok(Ok((doc, result))) => self.commit(&job, &doc, result, started).await,
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AttemptError::retry(format!(
                "timed out after {}s",
                self.config.job_timeout.as_secs()
            ))),
        };
        let error = match outcome {
            Ok(()) => return JobOutcome::Completed,
            Err(e) => e,
        };

        self.record_failure(&job, error).await;
        JobOutcome::Failed
    }

    /// Downloads the front artifact and runs the processor. Writes nothing.
    async fn extract(&self, job: &OcrJob) -> Result<(DriverDocument, OcrResult), AttemptError> {
        let doc = self
            .ports
            .documents
            .find_document(job.document_id)
            .await?
            .ok_or_else(|| AttemptError::terminal("document_not_found"))?;

        let type_code = self
            .ports
            .types
            .find_document_type(doc.document_type_id)
            .await?
            .map(|t| t.code)
            .unwrap_or_default();

        let image = self.download(&doc.front.key).await?;
        let mut result = self
            .ports
            .processor
            .process(&image, &doc.front.mime, &type_code)
            .await?;
        result.confidence = normalize_confidence(result.confidence);
        Ok((doc, result))
    }

    async fn commit(
        &self,
        job: &OcrJob,
        doc: &DriverDocument,
        result: OcrResult,
        started: DateTime<Utc>,
    ) -> Result<(), AttemptError> {
        let finished = self.ports.clock.now();
        let history = self.history_for(doc, &result, finished);
        let document = OcrDocumentUpdate {
            document_id: doc.id,
            ocr_data: json!({
                "raw_text": result.raw_text,
                "extracted": result.extracted_json(),
                "metadata": result.metadata,
            }),
            confidence: result.confidence,
            processed_at: finished,
            details: result.details(),
        };
        let completion = OcrJobCompletion {
            document,
            history,
            provider: self.ports.processor.provider().to_string(),
            raw_response: json!({ "raw_text": result.raw_text, "metadata": result.metadata }),
            extracted_data: result.extracted_json(),
            confidence: result.confidence,
            completed_at: finished,
            processing_time_ms: (finished - started).num_milliseconds(),
        };
        self.ports.jobs.complete_ocr_job(job.id, completion).await?;

        if result.confidence < self.config.min_confidence {
            warn!(
                job_id = %job.id,
                document_id = %doc.id,
                confidence = result.confidence,
                "OCR confidence below threshold, document left for manual review"
            );
        } else {
            info!(job_id = %job.id, document_id = %doc.id, confidence = result.confidence, "OCR job completed");
        }
        Ok(())
    }

    async fn download(&self, key: &str) -> PortResult<Vec<u8>> {
        let mut stream = self.ports.storage.download(key).await?;
        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.to_vec())
    }

    fn history_for(&self, doc: &DriverDocument, result: &OcrResult, at: DateTime<Utc>) -> Vec<HistoryEntry> {
        let entry = |event: HistoryEvent, notes: Option<String>| HistoryEntry {
            id: self.ports.ids.new_id(),
            document_id: doc.id,
            event,
            performed_by: Performer::System,
            previous_status: Some(doc.status),
            new_status: doc.status,
            notes,
            metadata: json!({
                "provider": self.ports.processor.provider(),
                "confidence": result.confidence,
            }),
            created_at: at,
        };

        let mut history = vec![entry(HistoryEvent::OcrProcessed, None)];
        if result.confidence < self.config.min_confidence {
            history.push(entry(
                HistoryEvent::OcrLowConfidence,
                Some(format!(
                    "confidence {:.2} below threshold {:.2}",
                    result.confidence, self.config.min_confidence
                )),
            ));
        }
        history
    }

    async fn record_failure(&self, job: &OcrJob, error: AttemptError) {
        let now = self.ports.clock.now();
        let attempts = job.retry_count + 1;
        let terminal = !error.retryable || attempts >= job.max_retries;
        let failure = OcrJobFailure {
            retry_count: if error.retryable {
                attempts
            } else {
                attempts.max(job.max_retries)
            },
            next_retry_at: (!terminal).then(|| next_retry_at(now, attempts)),
            error_message: error.message.clone(),
            failed_at: now,
        };

        if terminal {
            error!(job_id = %job.id, document_id = %job.document_id, error = %error.message, "OCR job failed permanently");
        } else {
            warn!(
                job_id = %job.id,
                attempt = attempts,
                retry_at = ?failure.next_retry_at,
                error = %error.message,
                "OCR job failed, retry scheduled"
            );
        }

        if let Err(e) = self.ports.jobs.fail_ocr_job(job.id, failure).await {
            error!(job_id = %job.id, error = %e, "Failed to record OCR job failure; reaper will recover it");
        }
    }
}
