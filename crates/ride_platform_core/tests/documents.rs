mod common;

use chrono::{Duration, NaiveDate};
use ride_platform_core::domain::documents::{
    DocumentDetails, DocumentStatus, HistoryEvent, Performer, ReviewAction, VerificationState,
};
use ride_platform_core::error::ErrorKind;
use ride_platform_core::ports::byte_stream_from;
use ride_platform_core::services::documents::{BackSideUpload, ReviewDecision};
use ride_platform_core::services::Viewer;
use uuid::Uuid;

use common::{upload, Harness};

fn decision(action: ReviewAction, reason: Option<&str>) -> ReviewDecision {
    ReviewDecision {
        action,
        notes: None,
        rejection_reason: reason.map(str::to_string),
    }
}

#[tokio::test]
async fn resubmission_supersedes_the_rejected_version() {
    let h = Harness::new();
    h.document_type("drivers_license", true, false).await;
    let driver = h.store.seed_driver(Uuid::new_v4());
    let admin = Uuid::new_v4();

    let v1 = h
        .documents
        .upload_document(upload(driver.id, "drivers_license", DocumentDetails::default()))
        .await
        .unwrap();
    assert_eq!(v1.status, DocumentStatus::Pending);
    assert_eq!(v1.version, 1);

    h.documents
        .review(v1.id, admin, decision(ReviewAction::Reject, Some("blurry")))
        .await
        .unwrap();

    let v2 = h
        .documents
        .upload_document(upload(driver.id, "drivers_license", DocumentDetails::default()))
        .await
        .unwrap();
    assert_eq!(v2.version, 2);
    assert_eq!(v2.previous_document_id, Some(v1.id));
    assert_eq!(v2.status, DocumentStatus::Pending);

    let v1_now = h.documents.get_document(v1.id, Viewer::Admin).await.unwrap();
    assert_eq!(v1_now.status, DocumentStatus::Superseded);
    assert_eq!(v1_now.review.rejection_reason.as_deref(), Some("blurry"));

    let v2_history = h.documents.document_history(v2.id, Viewer::Admin).await.unwrap();
    assert_eq!(v2_history.len(), 1);
    assert_eq!(v2_history[0].event, HistoryEvent::Submitted);

    let v1_history = h.documents.document_history(v1.id, Viewer::Admin).await.unwrap();
    let last = v1_history.last().unwrap();
    assert_eq!(last.event, HistoryEvent::Superseded);
    assert_eq!(last.previous_status, Some(DocumentStatus::Rejected));
    assert_eq!(last.new_status, DocumentStatus::Superseded);
}

#[tokio::test]
async fn exactly_one_current_document_per_type() {
    let h = Harness::new();
    h.document_type("insurance", true, false).await;
    let driver = h.store.seed_driver(Uuid::new_v4());

    for _ in 0..4 {
        h.documents
            .upload_document(upload(driver.id, "insurance", DocumentDetails::default()))
            .await
            .unwrap();
    }

    let all = h.store.all_documents(driver.id);
    assert_eq!(all.len(), 4);
    let current: Vec<_> = all
        .iter()
        .filter(|d| d.status != DocumentStatus::Superseded)
        .collect();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].version, 4);
    assert_eq!(
        h.documents.list_driver_documents(driver.id).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn upload_validation() {
    let h = Harness::new();
    h.document_type("insurance", true, false).await;
    let driver = h.store.seed_driver(Uuid::new_v4());

    let err = h
        .documents
        .upload_document(upload(driver.id, "passport", DocumentDetails::default()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let mut bad_mime = upload(driver.id, "insurance", DocumentDetails::default());
    bad_mime.mime = "text/html".to_string();
    let err = h.documents.upload_document(bad_mime).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let mut too_big = upload(driver.id, "insurance", DocumentDetails::default());
    too_big.size = h.documents.policy().max_upload_bytes + 1;
    let err = h.documents.upload_document(too_big).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let lapsed = DocumentDetails {
        expiry_date: NaiveDate::from_ymd_opt(2025, 12, 31),
        ..DocumentDetails::default()
    };
    let err = h
        .documents
        .upload_document(upload(driver.id, "insurance", lapsed))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    assert_eq!(h.storage.object_count(), 0);
}

#[tokio::test]
async fn storage_failure_stores_nothing() {
    let h = Harness::new();
    h.document_type("insurance", true, false).await;
    let driver = h.store.seed_driver(Uuid::new_v4());
    h.storage.fail_uploads(true);

    let err = h
        .documents
        .upload_document(upload(driver.id, "insurance", DocumentDetails::default()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageFailure);
    assert!(h.store.all_documents(driver.id).is_empty());
}

#[tokio::test]
async fn database_failure_deletes_the_stored_artifact() {
    let h = Harness::new();
    h.document_type("insurance", true, false).await;
    let driver = h.store.seed_driver(Uuid::new_v4());

    h.store.fail_next_document_insert();
    let err = h
        .documents
        .upload_document(upload(driver.id, "insurance", DocumentDetails::default()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DependencyUnavailable);
    assert_eq!(h.storage.object_count(), 0);

    // When the compensating delete also fails the artifact is left behind.
    h.store.fail_next_document_insert();
    h.storage.fail_deletes(true);
    h.documents
        .upload_document(upload(driver.id, "insurance", DocumentDetails::default()))
        .await
        .unwrap_err();
    assert_eq!(h.storage.object_count(), 1);
    assert!(h.store.all_documents(driver.id).is_empty());
}

#[tokio::test]
async fn ocr_job_enqueued_with_priority() {
    let h = Harness::new();
    h.document_type("drivers_license", true, true).await;
    h.document_type("profile_photo", false, true).await;
    h.document_type("insurance", true, false).await;
    let driver = h.store.seed_driver(Uuid::new_v4());

    for code in ["drivers_license", "profile_photo", "insurance"] {
        h.documents
            .upload_document(upload(driver.id, code, DocumentDetails::default()))
            .await
            .unwrap();
    }

    let mut priorities: Vec<_> = h.store.ocr_jobs().iter().map(|j| j.priority).collect();
    priorities.sort();
    assert_eq!(priorities, vec![5, 10]);
}

#[tokio::test]
async fn back_side_rules() {
    let h = Harness::new();
    h.document_type("drivers_license", true, false).await;
    h.document_type("insurance", true, false).await;
    let driver = h.store.seed_driver(Uuid::new_v4());
    let other = h.store.seed_driver(Uuid::new_v4());

    let license = h
        .documents
        .upload_document(upload(driver.id, "drivers_license", DocumentDetails::default()))
        .await
        .unwrap();
    let insurance = h
        .documents
        .upload_document(upload(driver.id, "insurance", DocumentDetails::default()))
        .await
        .unwrap();

    let back = |document_id, driver_id| BackSideUpload {
        document_id,
        driver_id,
        body: byte_stream_from(bytes::Bytes::from_static(b"back")),
        size: 4,
        mime: "image/png".to_string(),
        filename: "back.png".to_string(),
    };

    let err = h.documents.upload_back_side(back(license.id, other.id)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let err = h
        .documents
        .upload_back_side(back(insurance.id, driver.id))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let err = h
        .documents
        .upload_back_side(back(Uuid::new_v4(), driver.id))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let updated = h.documents.upload_back_side(back(license.id, driver.id)).await.unwrap();
    let back_key = updated.back.unwrap().key;
    assert!(back_key.ends_with("-back.png"));
    assert!(h.storage.contains(&back_key));

    h.documents
        .review(license.id, Uuid::new_v4(), decision(ReviewAction::Approve, None))
        .await
        .unwrap();
    let err = h.documents.upload_back_side(back(license.id, driver.id)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[tokio::test]
async fn direct_upload_is_idempotent_on_key() {
    let h = Harness::new();
    h.document_type("insurance", true, false).await;
    let driver = h.store.seed_driver(Uuid::new_v4());

    let presigned = h
        .documents
        .get_presigned_upload_url(driver.id, "insurance", "policy.pdf", "application/pdf", true)
        .await
        .unwrap();
    assert_eq!(presigned.method, "PUT");
    assert!(presigned
        .file_key
        .starts_with(&format!("documents/{}/insurance/", driver.id)));
    assert!(presigned.file_key.ends_with(".pdf"));
    assert!(presigned.expires_at > chrono::Utc::now() + Duration::minutes(14));

    let err = h
        .documents
        .complete_direct_upload(driver.id, &presigned.file_key, "insurance", true)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    h.storage.put_object(&presigned.file_key, &b"%PDF-1.7"[..], "application/pdf");
    let first = h
        .documents
        .complete_direct_upload(driver.id, &presigned.file_key, "insurance", true)
        .await
        .unwrap();
    let second = h
        .documents
        .complete_direct_upload(driver.id, &presigned.file_key, "insurance", true)
        .await
        .unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(first.front.mime, "application/pdf");
    assert_eq!(first.front.size, 8);
    assert_eq!(h.store.all_documents(driver.id).len(), 1);

    let intruder = h.store.seed_driver(Uuid::new_v4());
    let err = h
        .documents
        .complete_direct_upload(intruder.id, &presigned.file_key, "insurance", true)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

#[tokio::test]
async fn oversized_direct_upload_is_rejected_and_removed() {
    let h = Harness::new();
    h.document_type("insurance", true, false).await;
    let driver = h.store.seed_driver(Uuid::new_v4());
    let presigned = h
        .documents
        .get_presigned_upload_url(driver.id, "insurance", "policy.pdf", "application/pdf", true)
        .await
        .unwrap();

    let limit = h.documents.policy().max_upload_bytes as usize;
    h.storage
        .put_object(&presigned.file_key, vec![0u8; limit + 1], "application/pdf");
    let err = h
        .documents
        .complete_direct_upload(driver.id, &presigned.file_key, "insurance", true)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(!h.storage.contains(&presigned.file_key));
    assert!(h.store.all_documents(driver.id).is_empty());
}

#[tokio::test]
async fn direct_upload_uses_the_stored_content_type() {
    let h = Harness::new();
    h.document_type("insurance", true, false).await;
    let driver = h.store.seed_driver(Uuid::new_v4());
    let presigned = h
        .documents
        .get_presigned_upload_url(driver.id, "insurance", "policy.pdf", "application/pdf", true)
        .await
        .unwrap();

    h.storage
        .put_object(&presigned.file_key, &b"MZ\x90\x00"[..], "application/x-msdownload");
    let err = h
        .documents
        .complete_direct_upload(driver.id, &presigned.file_key, "insurance", true)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[tokio::test]
async fn review_state_machine_records_every_transition() {
    let h = Harness::new();
    h.document_type("insurance", true, false).await;
    let driver = h.store.seed_driver(Uuid::new_v4());
    let admin = Uuid::new_v4();
    let doc = h
        .documents
        .upload_document(upload(driver.id, "insurance", DocumentDetails::default()))
        .await
        .unwrap();

    let err = h
        .documents
        .review(doc.id, admin, decision(ReviewAction::Reject, Some("   ")))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let under_review = h.documents.start_review(doc.id, admin).await.unwrap();
    assert_eq!(under_review.status, DocumentStatus::UnderReview);

    let err = h.documents.start_review(doc.id, admin).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let approved = h
        .documents
        .review(doc.id, admin, decision(ReviewAction::Approve, None))
        .await
        .unwrap();
    assert_eq!(approved.status, DocumentStatus::Approved);
    assert_eq!(approved.review.reviewed_by, Some(admin));
    assert!(approved.review.reviewed_at.is_some());

    let err = h
        .documents
        .review(doc.id, admin, decision(ReviewAction::RequestResubmit, Some("again")))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let history = h.documents.document_history(doc.id, Viewer::Admin).await.unwrap();
    let events: Vec<_> = history.iter().map(|e| e.event).collect();
    assert_eq!(
        events,
        vec![HistoryEvent::Submitted, HistoryEvent::ReviewStarted, HistoryEvent::Approved]
    );
    for pair in history.windows(2) {
        assert_eq!(pair[1].previous_status, Some(pair[0].new_status));
    }
    assert_eq!(history[2].performed_by, Performer::User(admin));
}

#[tokio::test]
async fn owners_and_admins_only() {
    let h = Harness::new();
    h.document_type("insurance", true, false).await;
    let driver = h.store.seed_driver(Uuid::new_v4());
    let other = h.store.seed_driver(Uuid::new_v4());
    let doc = h
        .documents
        .upload_document(upload(driver.id, "insurance", DocumentDetails::default()))
        .await
        .unwrap();

    assert!(h.documents.get_document(doc.id, Viewer::Driver(driver.id)).await.is_ok());
    let err = h
        .documents
        .get_document(doc.id, Viewer::Driver(other.id))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let url = h
        .documents
        .get_download_url(doc.id, Viewer::Driver(driver.id))
        .await
        .unwrap();
    assert_eq!(url.method, "GET");

    let err = h.documents.resolve_driver(Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

#[tokio::test]
async fn expiry_sweep_and_verification_status() {
    let h = Harness::new();
    h.document_type("drivers_license", true, false).await;
    h.document_type("insurance", true, false).await;
    let driver = h.store.seed_driver(Uuid::new_v4());
    let admin = Uuid::new_v4();

    let status = h.documents.derive_verification_status(driver.id).await.unwrap();
    assert_eq!(status.state, VerificationState::Incomplete);
    assert_eq!(status.required_count, 2);

    let soon = NaiveDate::from_ymd_opt(2026, 3, 20).unwrap();
    let later = NaiveDate::from_ymd_opt(2027, 3, 1).unwrap();
    let license = h
        .documents
        .upload_document(upload(
            driver.id,
            "drivers_license",
            DocumentDetails {
                expiry_date: Some(soon),
                ..DocumentDetails::default()
            },
        ))
        .await
        .unwrap();
    let insurance = h
        .documents
        .upload_document(upload(
            driver.id,
            "insurance",
            DocumentDetails {
                expiry_date: Some(later),
                ..DocumentDetails::default()
            },
        ))
        .await
        .unwrap();

    let status = h.documents.derive_verification_status(driver.id).await.unwrap();
    assert_eq!(status.state, VerificationState::PendingReview);

    for id in [license.id, insurance.id] {
        h.documents
            .review(id, admin, decision(ReviewAction::Approve, None))
            .await
            .unwrap();
    }
    let status = h.documents.derive_verification_status(driver.id).await.unwrap();
    assert_eq!(status.state, VerificationState::Approved);
    assert_eq!(status.next_document_expiry, Some(soon));

    let expiring = h.documents.list_expiring_documents(30).await.unwrap();
    assert_eq!(expiring.len(), 1);
    assert_eq!(expiring[0].id, license.id);

    h.clock.advance(Duration::days(30));
    assert_eq!(h.documents.expire_documents().await.unwrap(), 1);
    assert_eq!(h.documents.expire_documents().await.unwrap(), 0);

    let expired = h.documents.get_document(license.id, Viewer::Admin).await.unwrap();
    assert_eq!(expired.status, DocumentStatus::Expired);
    let history = h.documents.document_history(license.id, Viewer::Admin).await.unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.event, HistoryEvent::Expired);
    assert_eq!(last.performed_by, Performer::System);

    let status = h.documents.derive_verification_status(driver.id).await.unwrap();
    assert_eq!(status.state, VerificationState::Incomplete);

    h.store.suspend_driver(driver.id);
    let status = h.documents.derive_verification_status(driver.id).await.unwrap();
    assert_eq!(status.state, VerificationState::Suspended);
}

#[tokio::test]
async fn pending_queue_is_paged() {
    let h = Harness::new();
    h.document_type("insurance", true, false).await;
    for _ in 0..3 {
        let driver = h.store.seed_driver(Uuid::new_v4());
        h.documents
            .upload_document(upload(driver.id, "insurance", DocumentDetails::default()))
            .await
            .unwrap();
    }

    let page = h.documents.list_pending_documents(2, 0).await.unwrap();
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.total, 3);
    let page = h.documents.list_pending_documents(2, 2).await.unwrap();
    assert_eq!(page.items.len(), 1);
}

#[tokio::test]
async fn duplicate_document_type_code_conflicts() {
    let h = Harness::new();
    h.document_type("insurance", true, false).await;
    let err = h
        .documents
        .create_document_type(ride_platform_core::domain::documents::NewDocumentType {
            code: "insurance".to_string(),
            name: "Insurance again".to_string(),
            description: None,
            is_required: false,
            requires_expiry: false,
            requires_front_back: false,
            requires_manual_review: true,
            auto_ocr_enabled: false,
            default_validity_months: None,
            renewal_reminder_days: 0,
            display_order: 1,
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(h.documents.list_document_types().await.unwrap().len(), 1);
}
