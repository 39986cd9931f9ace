//! crates/ride_platform_core/src/memory.rs
//!
//! In-memory implementations of every port. They back the test suite and the
//! `mock` OCR provider, and honour the same atomicity contracts as the SQL
//! adapter: each method runs under one lock, so a compare-and-set or a capped
//! increment cannot interleave with another call.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use futures::StreamExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::domain::documents::{
    BackArtifact, DocumentStatus, DocumentType, Driver, DriverDocument, HistoryEntry, OcrJob,
    OcrJobStatus, OcrResult,
};
use crate::domain::subscriptions::{Subscription, SubscriptionPlan, SubscriptionStatus, UsageLog};
use crate::domain::{Caller, Money};
use crate::ports::{
    byte_stream_from, ByteStream, Clock, DocumentRepository, DocumentTypeRepository,
    DriverDirectory, NewDocumentVersion, ObjectInfo, OcrJobCompletion, OcrJobFailure,
    OcrJobRepository, OcrProcessor, PaymentError, PaymentProcessor, PaymentReceipt, PlanRepository,
    PortError, PortResult, PresignedUrl, RideSpendReader, RideUsage, SessionStore, StatusTransition,
    Storage, StoredObject, SubscriptionChange, SubscriptionRepository,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

//=========================================================================================
// Repository
//=========================================================================================

#[derive(Default)]
struct State {
    document_types: Vec<DocumentType>,
    documents: HashMap<Uuid, DriverDocument>,
    history: Vec<HistoryEntry>,
    ocr_jobs: HashMap<Uuid, OcrJob>,
    plans: HashMap<Uuid, SubscriptionPlan>,
    subscriptions: HashMap<Uuid, Subscription>,
    usage: Vec<UsageLog>,
    spend: HashMap<Uuid, Vec<(DateTime<Utc>, Money)>>,
    drivers: HashMap<Uuid, Driver>,
    suspended: HashSet<Uuid>,
    sessions: HashMap<String, Caller>,
    fail_next_document_insert: bool,
}

/// One shared in-memory database implementing every repository port.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a driver record for `user_id` and returns it.
    pub fn seed_driver(&self, user_id: Uuid) -> Driver {
        let driver = Driver {
            id: Uuid::new_v4(),
            user_id,
        };
        lock(&self.state).drivers.insert(user_id, driver.clone());
        driver
    }

    pub fn suspend_driver(&self, driver_id: Uuid) {
        lock(&self.state).suspended.insert(driver_id);
    }

    pub fn add_session(&self, token: &str, caller: Caller) {
        lock(&self.state).sessions.insert(token.to_string(), caller);
    }

    pub fn record_spend(&self, user_id: Uuid, at: DateTime<Utc>, amount: Money) {
        lock(&self.state)
            .spend
            .entry(user_id)
            .or_default()
            .push((at, amount));
    }

    /// Makes the next `insert_document_version` fail as if the database went away.
    pub fn fail_next_document_insert(&self) {
        lock(&self.state).fail_next_document_insert = true;
    }

    pub fn all_documents(&self, driver_id: Uuid) -> Vec<DriverDocument> {
        let mut docs: Vec<_> = lock(&self.state)
            .documents
            .values()
            .filter(|d| d.driver_id == driver_id)
            .cloned()
            .collect();
        docs.sort_by_key(|d| d.version);
        docs
    }

    pub fn ocr_jobs(&self) -> Vec<OcrJob> {
        lock(&self.state).ocr_jobs.values().cloned().collect()
    }

    /// Overwrites a stored subscription, bypassing the lifecycle rules.
    pub fn put_subscription(&self, subscription: Subscription) {
        lock(&self.state)
            .subscriptions
            .insert(subscription.id, subscription);
    }

    /// Overwrites a stored document, bypassing the lifecycle rules.
    pub fn put_document(&self, document: DriverDocument) {
        lock(&self.state).documents.insert(document.id, document);
    }

    pub fn remove_document(&self, document_id: Uuid) {
        lock(&self.state).documents.remove(&document_id);
    }
}

fn current_of(state: &State, driver_id: Uuid, document_type_id: Uuid) -> Option<&DriverDocument> {
    state.documents.values().find(|d| {
        d.driver_id == driver_id
            && d.document_type_id == document_type_id
            && d.status != DocumentStatus::Superseded
    })
}

#[async_trait]
impl DocumentTypeRepository for InMemoryStore {
    async fn list_document_types(&self, active_only: bool) -> PortResult<Vec<DocumentType>> {
        let mut types: Vec<_> = lock(&self.state)
            .document_types
            .iter()
            .filter(|t| !active_only || t.is_active)
            .cloned()
            .collect();
        types.sort_by(|a, b| a.display_order.cmp(&b.display_order).then(a.name.cmp(&b.name)));
        Ok(types)
    }

    async fn find_document_type(&self, id: Uuid) -> PortResult<Option<DocumentType>> {
        Ok(lock(&self.state)
            .document_types
            .iter()
            .find(|t| t.id == id)
            .cloned())
    }

    async fn find_document_type_by_code(&self, code: &str) -> PortResult<Option<DocumentType>> {
        Ok(lock(&self.state)
            .document_types
            .iter()
            .find(|t| t.code == code)
            .cloned())
    }

    async fn create_document_type(&self, document_type: DocumentType) -> PortResult<DocumentType> {
        let mut state = lock(&self.state);
        if state.document_types.iter().any(|t| t.code == document_type.code) {
            return Err(PortError::Conflict(format!(
                "document type {} already exists",
                document_type.code
            )));
        }
        state.document_types.push(document_type.clone());
        Ok(document_type)
    }
}

#[async_trait]
impl DocumentRepository for InMemoryStore {
    async fn find_document(&self, id: Uuid) -> PortResult<Option<DriverDocument>> {
        Ok(lock(&self.state).documents.get(&id).cloned())
    }

    async fn find_current_document(
        &self,
        driver_id: Uuid,
        document_type_id: Uuid,
    ) -> PortResult<Option<DriverDocument>> {
        Ok(current_of(&lock(&self.state), driver_id, document_type_id).cloned())
    }

    async fn latest_version(&self, driver_id: Uuid, document_type_id: Uuid) -> PortResult<Option<i32>> {
        Ok(lock(&self.state)
            .documents
            .values()
            .filter(|d| d.driver_id == driver_id && d.document_type_id == document_type_id)
            .map(|d| d.version)
            .max())
    }

    async fn find_document_by_file_key(&self, key: &str) -> PortResult<Option<DriverDocument>> {
        Ok(lock(&self.state)
            .documents
            .values()
            .find(|d| d.front.key == key && d.status != DocumentStatus::Superseded)
            .cloned())
    }

    async fn list_current_documents(&self, driver_id: Uuid) -> PortResult<Vec<DriverDocument>> {
        let mut docs: Vec<_> = lock(&self.state)
            .documents
            .values()
            .filter(|d| d.driver_id == driver_id && d.status != DocumentStatus::Superseded)
            .cloned()
            .collect();
        docs.sort_by_key(|d| d.submitted_at);
        Ok(docs)
    }

    async fn list_documents_by_status(
        &self,
        statuses: &[DocumentStatus],
        limit: i64,
        offset: i64,
    ) -> PortResult<(Vec<DriverDocument>, i64)> {
        let mut docs: Vec<_> = lock(&self.state)
            .documents
            .values()
            .filter(|d| statuses.contains(&d.status))
            .cloned()
            .collect();
        docs.sort_by_key(|d| d.submitted_at);
        let total = docs.len() as i64;
        let page = docs
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn list_expiring_documents(
        &self,
        from: NaiveDate,
        until: NaiveDate,
    ) -> PortResult<Vec<DriverDocument>> {
        let mut docs: Vec<_> = lock(&self.state)
            .documents
            .values()
            .filter(|d| d.status == DocumentStatus::Approved)
            .filter(|d| {
                d.details
                    .expiry_date
                    .is_some_and(|exp| exp >= from && exp <= until)
            })
            .cloned()
            .collect();
        docs.sort_by_key(|d| d.details.expiry_date);
        Ok(docs)
    }

    async fn list_lapsed_documents(&self, today: NaiveDate, limit: i64) -> PortResult<Vec<DriverDocument>> {
        Ok(lock(&self.state)
            .documents
            .values()
            .filter(|d| d.status == DocumentStatus::Approved && d.is_expired_at(today))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn insert_document_version(&self, version: NewDocumentVersion) -> PortResult<DriverDocument> {
        let mut state = lock(&self.state);
        if std::mem::take(&mut state.fail_next_document_insert) {
            return Err(PortError::Unavailable("simulated database outage".to_string()));
        }

        let doc = version.document;
        let current = current_of(&state, doc.driver_id, doc.document_type_id).map(|d| d.id);
        if current != version.supersedes {
            return Err(PortError::Conflict(
                "current document changed before the new version was stored".to_string(),
            ));
        }

        if let Some(prior_id) = current {
            if let Some(prior) = state.documents.get_mut(&prior_id) {
                prior.status = DocumentStatus::Superseded;
                prior.updated_at = doc.created_at;
            }
        }
        state.documents.insert(doc.id, doc.clone());
        state.history.extend(version.history);
        if let Some(job) = version.ocr_job {
            state.ocr_jobs.insert(job.id, job);
        }
        Ok(doc)
    }

    async fn transition_document(&self, transition: StatusTransition) -> PortResult<DriverDocument> {
        let mut state = lock(&self.state);
        let doc = state
            .documents
            .get_mut(&transition.document_id)
            .ok_or_else(|| PortError::NotFound(format!("document {}", transition.document_id)))?;
        if !transition.allowed_from.contains(&doc.status) {
            return Err(PortError::Conflict(format!(
                "document {} is {}",
                doc.id, doc.status
            )));
        }
        doc.status = transition.to;
        if let Some(review) = transition.review {
            doc.review = review;
        }
        doc.updated_at = transition.at;
        let updated = doc.clone();
        state.history.push(transition.history);
        Ok(updated)
    }

    async fn attach_back_side(
        &self,
        document_id: Uuid,
        back: BackArtifact,
        allowed_from: &[DocumentStatus],
        at: DateTime<Utc>,
    ) -> PortResult<DriverDocument> {
        let mut state = lock(&self.state);
        let doc = state
            .documents
            .get_mut(&document_id)
            .ok_or_else(|| PortError::NotFound(format!("document {}", document_id)))?;
        if !allowed_from.contains(&doc.status) {
            return Err(PortError::Conflict(format!("document {} is {}", doc.id, doc.status)));
        }
        doc.back = Some(back);
        doc.updated_at = at;
        Ok(doc.clone())
    }

    async fn list_history(&self, document_id: Uuid) -> PortResult<Vec<HistoryEntry>> {
        Ok(lock(&self.state)
            .history
            .iter()
            .filter(|h| h.document_id == document_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl OcrJobRepository for InMemoryStore {
    async fn list_due_ocr_jobs(&self, now: DateTime<Utc>, limit: i64) -> PortResult<Vec<OcrJob>> {
        let mut jobs: Vec<_> = lock(&self.state)
            .ocr_jobs
            .values()
            .filter(|j| j.is_due(now))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
        jobs.truncate(limit.max(0) as usize);
        Ok(jobs)
    }

    async fn claim_ocr_job(
        &self,
        job_id: Uuid,
        expected: OcrJobStatus,
        now: DateTime<Utc>,
    ) -> PortResult<bool> {
        let mut state = lock(&self.state);
        let Some(job) = state.ocr_jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        if job.status != expected || !job.is_due(now) {
            return Ok(false);
        }
        job.status = OcrJobStatus::Processing;
        job.started_at = Some(now);
        Ok(true)
    }

    async fn complete_ocr_job(&self, job_id: Uuid, completion: OcrJobCompletion) -> PortResult<()> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let job = state
            .ocr_jobs
            .get_mut(&job_id)
            .ok_or_else(|| PortError::NotFound(format!("ocr job {}", job_id)))?;
        if job.status != OcrJobStatus::Processing {
            return Err(PortError::Conflict(format!("ocr job {} is {}", job_id, job.status)));
        }
        let update = completion.document;
        let doc = state
            .documents
            .get_mut(&update.document_id)
            .ok_or_else(|| PortError::NotFound(format!("document {}", update.document_id)))?;

        doc.ocr_data = Some(update.ocr_data);
        doc.ocr_confidence = Some(update.confidence);
        doc.ocr_processed_at = Some(update.processed_at);
        doc.details.fill_blanks_from(&update.details);
        doc.updated_at = update.processed_at;
        state.history.extend(completion.history);

        job.status = OcrJobStatus::Completed;
        job.provider = Some(completion.provider);
        job.raw_response = Some(completion.raw_response);
        job.extracted_data = Some(completion.extracted_data);
        job.confidence = Some(completion.confidence);
        job.completed_at = Some(completion.completed_at);
        job.processing_time_ms = Some(completion.processing_time_ms);
        job.error_message = None;
        Ok(())
    }

    async fn fail_ocr_job(&self, job_id: Uuid, failure: OcrJobFailure) -> PortResult<()> {
        let mut state = lock(&self.state);
        let job = state
            .ocr_jobs
            .get_mut(&job_id)
            .ok_or_else(|| PortError::NotFound(format!("ocr job {}", job_id)))?;
        job.status = OcrJobStatus::Failed;
        job.retry_count = failure.retry_count;
        job.next_retry_at = failure.next_retry_at;
        job.error_message = Some(failure.error_message);
        job.completed_at = Some(failure.failed_at);
        Ok(())
    }

    async fn reap_stuck_ocr_jobs(
        &self,
        started_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> PortResult<u64> {
        let mut state = lock(&self.state);
        let mut reaped = 0;
        for job in state.ocr_jobs.values_mut() {
            let stuck = job.status == OcrJobStatus::Processing
                && job.started_at.is_some_and(|at| at < started_before);
            if stuck {
                job.status = OcrJobStatus::Failed;
                job.retry_count += 1;
                job.next_retry_at = Some(now);
                job.error_message = Some("processing timed out".to_string());
                reaped += 1;
            }
        }
        Ok(reaped)
    }

    async fn find_ocr_job_for_document(&self, document_id: Uuid) -> PortResult<Option<OcrJob>> {
        Ok(lock(&self.state)
            .ocr_jobs
            .values()
            .filter(|j| j.document_id == document_id)
            .max_by_key(|j| j.created_at)
            .cloned())
    }
}

#[async_trait]
impl PlanRepository for InMemoryStore {
    async fn create_plan(&self, plan: SubscriptionPlan) -> PortResult<SubscriptionPlan> {
        let mut state = lock(&self.state);
        if state.plans.values().any(|p| p.slug == plan.slug) {
            return Err(PortError::Conflict(format!("plan {} already exists", plan.slug)));
        }
        state.plans.insert(plan.id, plan.clone());
        Ok(plan)
    }

    async fn find_plan(&self, id: Uuid) -> PortResult<Option<SubscriptionPlan>> {
        Ok(lock(&self.state).plans.get(&id).cloned())
    }

    async fn list_plans(&self, active_only: bool) -> PortResult<Vec<SubscriptionPlan>> {
        let mut plans: Vec<_> = lock(&self.state)
            .plans
            .values()
            .filter(|p| !active_only || p.is_active())
            .cloned()
            .collect();
        plans.sort_by(|a, b| {
            a.presentation
                .display_order
                .cmp(&b.presentation.display_order)
                .then(a.price.cmp(&b.price))
        });
        Ok(plans)
    }

    async fn save_plan(&self, plan: &SubscriptionPlan) -> PortResult<()> {
        let mut state = lock(&self.state);
        match state.plans.get_mut(&plan.id) {
            Some(existing) => {
                *existing = plan.clone();
                Ok(())
            }
            None => Err(PortError::NotFound(format!("plan {}", plan.id))),
        }
    }
}

#[async_trait]
impl SubscriptionRepository for InMemoryStore {
    async fn find_live_subscription(&self, user_id: Uuid) -> PortResult<Option<Subscription>> {
        Ok(lock(&self.state)
            .subscriptions
            .values()
            .find(|s| s.user_id == user_id && s.status.is_live())
            .cloned())
    }

    async fn find_subscription(&self, id: Uuid) -> PortResult<Option<Subscription>> {
        Ok(lock(&self.state).subscriptions.get(&id).cloned())
    }

    async fn create_subscription(&self, subscription: Subscription) -> PortResult<Subscription> {
        let mut state = lock(&self.state);
        let taken = state
            .subscriptions
            .values()
            .any(|s| s.user_id == subscription.user_id && s.status.is_live());
        if taken {
            return Err(PortError::Conflict("user already has a live subscription".to_string()));
        }
        state
            .subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(subscription)
    }

    async fn update_subscription(
        &self,
        id: Uuid,
        expected: &[SubscriptionStatus],
        change: SubscriptionChange,
    ) -> PortResult<Subscription> {
        let mut state = lock(&self.state);
        let sub = state
            .subscriptions
            .get_mut(&id)
            .ok_or_else(|| PortError::NotFound(format!("subscription {}", id)))?;
        if !expected.contains(&sub.status) {
            return Err(PortError::Conflict(format!("subscription {} is {}", id, sub.status)));
        }
        change.apply(sub);
        Ok(sub.clone())
    }

    async fn list_due_for_renewal(&self, now: DateTime<Utc>, limit: i64) -> PortResult<Vec<Subscription>> {
        let mut due: Vec<_> = lock(&self.state)
            .subscriptions
            .values()
            .filter(|s| {
                matches!(s.status, SubscriptionStatus::Active | SubscriptionStatus::PastDue)
                    && s.current_period_end <= now
            })
            .cloned()
            .collect();
        due.sort_by_key(|s| s.current_period_end);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn record_ride_usage(&self, usage: RideUsage) -> PortResult<bool> {
        let mut state = lock(&self.state);
        let sub = state
            .subscriptions
            .get_mut(&usage.subscription_id)
            .ok_or_else(|| PortError::NotFound(format!("subscription {}", usage.subscription_id)))?;
        if sub.status != SubscriptionStatus::Active {
            return Ok(false);
        }
        if usage.cap.is_some_and(|cap| sub.rides_used >= cap) {
            return Ok(false);
        }
        sub.rides_used += 1;
        sub.total_saved += usage.log.savings_amount;
        sub.updated_at = usage.log.created_at;
        state.usage.push(usage.log);
        Ok(true)
    }

    async fn list_usage(&self, subscription_id: Uuid) -> PortResult<Vec<UsageLog>> {
        Ok(lock(&self.state)
            .usage
            .iter()
            .filter(|u| u.subscription_id == subscription_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RideSpendReader for InMemoryStore {
    async fn total_spend_since(&self, user_id: Uuid, since: DateTime<Utc>) -> PortResult<Money> {
        let state = lock(&self.state);
        let total = state
            .spend
            .get(&user_id)
            .map(|rides| {
                rides
                    .iter()
                    .filter(|(at, _)| *at >= since)
                    .fold(Money::ZERO, |acc, (_, amount)| acc + *amount)
            })
            .unwrap_or(Money::ZERO);
        Ok(total)
    }
}

#[async_trait]
impl DriverDirectory for InMemoryStore {
    async fn get_driver_by_user_id(&self, user_id: Uuid) -> PortResult<Driver> {
        lock(&self.state)
            .drivers
            .get(&user_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("driver for user {}", user_id)))
    }

    async fn is_driver_suspended(&self, driver_id: Uuid) -> PortResult<bool> {
        Ok(lock(&self.state).suspended.contains(&driver_id))
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn validate_session(&self, token: &str) -> PortResult<Caller> {
        lock(&self.state)
            .sessions
            .get(token)
            .copied()
            .ok_or(PortError::Unauthorized)
    }
}

//=========================================================================================
// Blob storage
//=========================================================================================

#[derive(Default)]
struct StorageState {
    objects: HashMap<String, (Bytes, String)>,
    fail_uploads: bool,
    fail_deletes: bool,
    download_delay: Option<std::time::Duration>,
}

/// Blob storage held in a map, with switches for failure injection.
pub struct MemoryStorage {
    base_url: String,
    state: Mutex<StorageState>,
}

impl MemoryStorage {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            state: Mutex::new(StorageState::default()),
        }
    }

    /// Stores an object directly, as a client using a presigned URL would.
    pub fn put_object(&self, key: &str, body: impl Into<Bytes>, content_type: &str) {
        lock(&self.state)
            .objects
            .insert(key.to_string(), (body.into(), content_type.to_string()));
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.state).objects.contains_key(key)
    }

    pub fn object_count(&self) -> usize {
        lock(&self.state).objects.len()
    }

    pub fn fail_uploads(&self, fail: bool) {
        lock(&self.state).fail_uploads = fail;
    }

    pub fn fail_deletes(&self, fail: bool) {
        lock(&self.state).fail_deletes = fail;
    }

    pub fn set_download_delay(&self, delay: std::time::Duration) {
        lock(&self.state).download_delay = Some(delay);
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn upload(
        &self,
        key: &str,
        mut body: ByteStream,
        _size: i64,
        content_type: &str,
    ) -> PortResult<StoredObject> {
        if lock(&self.state).fail_uploads {
            return Err(PortError::Unavailable("simulated storage outage".to_string()));
        }
        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        self.put_object(key, buffer.freeze(), content_type);
        Ok(StoredObject {
            url: self.get_url(key),
            key: key.to_string(),
        })
    }

    async fn download(&self, key: &str) -> PortResult<ByteStream> {
        let (delay, body) = {
            let state = lock(&self.state);
            let body = state
                .objects
                .get(key)
                .map(|(bytes, _)| bytes.clone())
                .ok_or_else(|| PortError::NotFound(format!("object {}", key)))?;
            (state.download_delay, body)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(byte_stream_from(body))
    }

    async fn delete(&self, key: &str) -> PortResult<()> {
        let mut state = lock(&self.state);
        if state.fail_deletes {
            return Err(PortError::Unavailable("simulated storage outage".to_string()));
        }
        state.objects.remove(key);
        Ok(())
    }

    async fn stat(&self, key: &str) -> PortResult<Option<ObjectInfo>> {
        Ok(lock(&self.state).objects.get(key).map(|(bytes, content_type)| ObjectInfo {
            size: bytes.len() as i64,
            content_type: Some(content_type.clone()),
        }))
    }

    fn get_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key)
    }

    async fn presigned_upload_url(
        &self,
        key: &str,
        content_type: &str,
        expiry: Duration,
    ) -> PortResult<PresignedUrl> {
        let expires_at = Utc::now() + expiry;
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), content_type.to_string());
        Ok(PresignedUrl {
            url: format!("{}?expires={}", self.get_url(key), expires_at.timestamp()),
            method: "PUT".to_string(),
            headers,
            expires_at,
        })
    }

    async fn presigned_download_url(&self, key: &str, expiry: Duration) -> PortResult<PresignedUrl> {
        if !self.contains(key) {
            return Err(PortError::NotFound(format!("object {}", key)));
        }
        let expires_at = Utc::now() + expiry;
        Ok(PresignedUrl {
            url: format!("{}?expires={}", self.get_url(key), expires_at.timestamp()),
            method: "GET".to_string(),
            headers: HashMap::new(),
            expires_at,
        })
    }

    async fn copy(&self, src: &str, dst: &str) -> PortResult<()> {
        let mut state = lock(&self.state);
        let object = state
            .objects
            .get(src)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("object {}", src)))?;
        state.objects.insert(dst.to_string(), object);
        Ok(())
    }
}

//=========================================================================================
// Payments
//=========================================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCharge {
    pub user_id: Uuid,
    pub amount: Money,
    pub currency: String,
}

/// A payment processor that replays queued outcomes and succeeds once the
/// script runs out.
#[derive(Default)]
pub struct ScriptedPayments {
    script: Mutex<VecDeque<Result<(), PaymentError>>>,
    calls: Mutex<Vec<RecordedCharge>>,
}

impl ScriptedPayments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_outcome(&self, outcome: Result<(), PaymentError>) {
        lock(&self.script).push_back(outcome);
    }

    pub fn calls(&self) -> Vec<RecordedCharge> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }
}

#[async_trait]
impl PaymentProcessor for ScriptedPayments {
    async fn charge_subscription(
        &self,
        user_id: Uuid,
        amount: Money,
        currency: &str,
        _payment_method: Option<&str>,
    ) -> Result<PaymentReceipt, PaymentError> {
        let call_number = {
            let mut calls = lock(&self.calls);
            calls.push(RecordedCharge {
                user_id,
                amount,
                currency: currency.to_string(),
            });
            calls.len()
        };
        let outcome = lock(&self.script).pop_front().unwrap_or(Ok(()));
        outcome.map(|()| PaymentReceipt {
            transaction_id: format!("txn_{}", call_number),
            amount,
            currency: currency.to_string(),
        })
    }
}

//=========================================================================================
// Clock
//=========================================================================================

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *lock(&self.now) = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = lock(&self.now);
        *now = *now + by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

//=========================================================================================
// OCR
//=========================================================================================

/// The `mock` OCR provider: returns a configured result, optionally failing a
/// number of times first.
pub struct MockOcrProcessor {
    result: OcrResult,
    failures_left: Mutex<u32>,
}

impl MockOcrProcessor {
    pub fn new(confidence: f64) -> Self {
        Self::with_result(OcrResult {
            raw_text: "MOCK OCR OUTPUT".to_string(),
            confidence,
            metadata: serde_json::json!({ "provider": "mock" }),
            ..OcrResult::default()
        })
    }

    pub fn with_result(result: OcrResult) -> Self {
        Self {
            result,
            failures_left: Mutex::new(0),
        }
    }

    /// Fails the next `times` calls with a transient error.
    pub fn failing(self, times: u32) -> Self {
        *lock(&self.failures_left) = times;
        self
    }
}

#[async_trait]
impl OcrProcessor for MockOcrProcessor {
    fn provider(&self) -> &str {
        "mock"
    }

    async fn process(
        &self,
        _image: &[u8],
        _mime: &str,
        _document_type_code: &str,
    ) -> PortResult<OcrResult> {
        {
            let mut failures = lock(&self.failures_left);
            if *failures > 0 {
                *failures -= 1;
                return Err(PortError::Unavailable("mock OCR provider failure".to_string()));
            }
        }
        Ok(self.result.clone())
    }
}
