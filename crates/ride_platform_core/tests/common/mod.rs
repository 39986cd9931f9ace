//! Shared wiring for the integration tests: every service and worker backed
//! by the in-memory adapters and a manual clock.
#![allow(dead_code)]

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use uuid::Uuid;

use ride_platform_core::domain::documents::{DocumentDetails, DocumentType, NewDocumentType};
use ride_platform_core::domain::subscriptions::{
    BillingPeriod, NewPlan, PlanBenefits, PlanPresentation, PlanType, SubscriptionPlan,
};
use ride_platform_core::domain::Money;
use ride_platform_core::memory::{
    InMemoryStore, ManualClock, MemoryStorage, MockOcrProcessor, ScriptedPayments,
};
use ride_platform_core::ports::{byte_stream_from, Clock, RandomIds};
use ride_platform_core::services::documents::UploadRequest;
use ride_platform_core::services::{
    DocumentPolicy, DocumentPorts, DocumentService, SubscriptionPolicy, SubscriptionPorts,
    SubscriptionService,
};
use ride_platform_core::workers::{
    OcrWorker, OcrWorkerConfig, OcrWorkerPorts, RenewalConfig, RenewalWorker,
};

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub storage: Arc<MemoryStorage>,
    pub payments: Arc<ScriptedPayments>,
    pub clock: Arc<ManualClock>,
    pub documents: DocumentService,
    pub subscriptions: Arc<SubscriptionService>,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let storage = Arc::new(MemoryStorage::new("https://files.test"));
        let payments = Arc::new(ScriptedPayments::new());
        let clock = Arc::new(ManualClock::new(start_time()));

        let documents = DocumentService::new(
            DocumentPorts {
                types: store.clone(),
                documents: store.clone(),
                drivers: store.clone(),
                storage: storage.clone(),
                clock: clock.clone(),
                ids: Arc::new(RandomIds),
            },
            DocumentPolicy::default(),
        );
        let subscriptions = Arc::new(SubscriptionService::new(
            SubscriptionPorts {
                plans: store.clone(),
                subscriptions: store.clone(),
                spend: store.clone(),
                payments: payments.clone(),
                clock: clock.clone(),
                ids: Arc::new(RandomIds),
            },
            SubscriptionPolicy::default(),
        ));

        Self {
            store,
            storage,
            payments,
            clock,
            documents,
            subscriptions,
        }
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn ocr_worker(&self, processor: MockOcrProcessor, config: OcrWorkerConfig) -> OcrWorker {
        OcrWorker::new(
            OcrWorkerPorts {
                jobs: self.store.clone(),
                documents: self.store.clone(),
                types: self.store.clone(),
                storage: self.storage.clone(),
                processor: Arc::new(processor),
                clock: self.clock.clone(),
                ids: Arc::new(RandomIds),
            },
            config,
        )
    }

    pub fn renewal_worker(&self) -> RenewalWorker {
        RenewalWorker::new(
            self.store.clone(),
            self.store.clone(),
            self.payments.clone(),
            self.clock.clone(),
            RenewalConfig::default(),
        )
    }

    pub async fn document_type(&self, code: &str, required: bool, auto_ocr: bool) -> DocumentType {
        self.documents
            .create_document_type(NewDocumentType {
                code: code.to_string(),
                name: code.replace('_', " "),
                description: None,
                is_required: required,
                requires_expiry: true,
                requires_front_back: code == "drivers_license",
                requires_manual_review: true,
                auto_ocr_enabled: auto_ocr,
                default_validity_months: Some(60),
                renewal_reminder_days: 30,
                display_order: 0,
            })
            .await
            .unwrap()
    }

    pub async fn plan(&self, slug: &str, plan_type: PlanType, price: i64, benefits: PlanBenefits) -> SubscriptionPlan {
        self.plan_with_trial(slug, plan_type, price, benefits, 0).await
    }

    pub async fn plan_with_trial(
        &self,
        slug: &str,
        plan_type: PlanType,
        price: i64,
        benefits: PlanBenefits,
        trial_days: i32,
    ) -> SubscriptionPlan {
        self.subscriptions
            .create_plan(NewPlan {
                slug: slug.to_string(),
                name: slug.to_uppercase(),
                description: None,
                plan_type,
                billing_period: BillingPeriod::Monthly,
                price: Money::from_minor(price),
                currency: "USD".to_string(),
                benefits,
                trial_days,
                trial_rides: 0,
                presentation: PlanPresentation::default(),
            })
            .await
            .unwrap()
    }
}

pub fn upload(driver_id: Uuid, type_code: &str, details: DocumentDetails) -> UploadRequest {
    let body = Bytes::from_static(b"\xff\xd8\xff\xe0 fake jpeg");
    UploadRequest {
        driver_id,
        type_code: type_code.to_string(),
        size: body.len() as i64,
        body: byte_stream_from(body),
        mime: "image/jpeg".to_string(),
        filename: "scan.jpg".to_string(),
        details,
    }
}
