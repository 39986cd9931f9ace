//! crates/ride_platform_core/src/services/verification.rs
//!
//! Derives a driver's verification snapshot from the required document types
//! and the driver's non-superseded documents. Pure; no I/O.

use chrono::NaiveDate;
use uuid::Uuid;

use crate::domain::documents::{
    DocumentStatus, DocumentType, DriverDocument, DriverVerificationStatus, RequiredDocumentState,
    VerificationState,
};

/// The status that counts for verification: an approved document whose expiry
/// date has passed is expired even before the sweep has flipped it.
fn effective_status(doc: &DriverDocument, today: NaiveDate) -> DocumentStatus {
    if doc.status == DocumentStatus::Approved && doc.is_expired_at(today) {
        DocumentStatus::Expired
    } else {
        doc.status
    }
}

/// Classifies the driver. When several rules match, precedence is
/// suspended, rejected, approved, incomplete, pending_review.
pub fn aggregate(
    driver_id: Uuid,
    document_types: &[DocumentType],
    documents: &[DriverDocument],
    suspended: bool,
    today: NaiveDate,
) -> DriverVerificationStatus {
    let required: Vec<&DocumentType> = document_types.iter().filter(|t| t.is_required).collect();

    let mut submitted_count = 0;
    let mut approved_count = 0;
    let mut any_rejected = false;
    let mut any_expired = false;
    let mut breakdown = Vec::with_capacity(required.len());

    for doc_type in &required {
        let current = documents.iter().find(|d| {
            d.document_type_id == doc_type.id && d.status != DocumentStatus::Superseded
        });
        let status = current.map(|d| effective_status(d, today));

        match status {
            Some(DocumentStatus::Approved) => {
                submitted_count += 1;
                approved_count += 1;
            }
            Some(DocumentStatus::Rejected) => any_rejected = true,
            Some(DocumentStatus::Expired) => any_expired = true,
            Some(s) if s.counts_as_submitted() => submitted_count += 1,
            _ => {}
        }

        breakdown.push(RequiredDocumentState {
            document_type_id: doc_type.id,
            code: doc_type.code.clone(),
            name: doc_type.name.clone(),
            status,
            expiry_date: current.and_then(|d| d.details.expiry_date),
        });
    }

    let required_count = required.len();
    let state = if suspended {
        VerificationState::Suspended
    } else if any_rejected {
        VerificationState::Rejected
    } else if approved_count == required_count && !any_expired {
        VerificationState::Approved
    } else if submitted_count < required_count {
        VerificationState::Incomplete
    } else {
        VerificationState::PendingReview
    };

    let next_document_expiry = documents
        .iter()
        .filter(|d| effective_status(d, today) == DocumentStatus::Approved)
        .filter_map(|d| d.details.expiry_date)
        .min();

    DriverVerificationStatus {
        driver_id,
        required_count,
        submitted_count,
        approved_count,
        next_document_expiry,
        state,
        documents: breakdown,
    }
}
