//! Nostr protocol types for the DVM job exchange.
//!
//! This crate provides:
//! - NIP-01: events, canonical serialization, Schnorr signing and verification
//! - NIP-89: handler announcements, so DVMs can be discovered
//! - NIP-90: job requests, results and feedback
//!
//! # Features
//!
//! - `full` (default): key generation, hashing and signing
//! - without `full`: only the event types and serialization, e.g. for a relay

mod nip01;
mod nip89;
mod nip90;

pub use nip01::{
    Event, EventTemplate, Nip01Error, UnsignedEvent, serialize_event, unix_now, validate_event,
};

#[cfg(feature = "full")]
pub use nip01::{
    Keys, finalize_event, generate_secret_key, get_event_hash, get_public_key_hex, verify_event,
};

pub use nip89::{
    HandlerInfo, HandlerMetadata, HandlerPricing, KIND_HANDLER_INFORMATION, Nip89Error,
};

pub use nip90::{
    InputType, JOB_REQUEST_KIND_MAX, JOB_REQUEST_KIND_MIN, JOB_RESULT_KIND_MAX,
    JOB_RESULT_KIND_MIN, JobFeedback, JobInput, JobParam, JobRequest, JobResult, JobStatus,
    KIND_JOB_FEEDBACK, KIND_JOB_MEMORY_CURATION, Nip90Error, get_request_kind, get_result_kind,
    is_job_feedback_kind, is_job_request_kind, is_job_result_kind, request_reference,
};
