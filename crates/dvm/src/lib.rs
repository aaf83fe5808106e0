//! NIP-90 job exchange over Nostr relays.
//!
//! This crate provides both sides of a Data Vending Machine exchange:
//! - **Service**: [`JobIntake`] admits each job exactly once however many
//!   relays deliver it, a [`JobProcessor`] computes the result, and the
//!   [`ResponsePublisher`] answers with signed status and result events
//! - **Requester**: [`JobClient`] submits a request and polls for the
//!   result, an error status, or a timeout
//!
//! The shipped job type is the memory curator (kind 5700), which suggests
//! additions to an agent's long-term memory from its daily log.
//!
//! # Example
//!
//! ```rust,no_run
//! use dvm::{ClientConfig, JobClient, JobOutcome};
//! use nostr_client::RelayPool;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> dvm::Result<()> {
//!     let config = ClientConfig::default();
//!     let pool = Arc::new(RelayPool::new());
//!     pool.connect(&config.relays).await;
//!
//!     let client = JobClient::from_config(&config, config.keys()?, pool);
//!     let request = client.curation_request("- [09:00] Built a relay tool", None, "concise")?;
//!     let (_event, outcome) = client.run(&request).await?;
//!     if let JobOutcome::Success(response) = outcome {
//!         println!("{}", response.content);
//!     }
//!     Ok(())
//! }
//! ```

pub mod announce;
pub mod client;
pub mod config;
pub mod dedup;
pub mod error;
pub mod inputs;
pub mod intake;
pub mod job;
pub mod logging;
pub mod processor;
pub mod publisher;
pub mod relay_api;
pub mod service;

pub use announce::{HANDLER_IDENTIFIER, announce, handler_info, list_handlers};
pub use client::{JobClient, JobOutcome, JobProgress, JobResponse, ProgressCallback};
pub use config::{ClientConfig, DvmConfig};
pub use dedup::ProcessedJobSet;
pub use error::{DvmError, ReasonCode, Result, ValidationError};
pub use inputs::{JobInputs, attach_inputs};
pub use intake::{Admission, AdmittedJob, IntakeStats, JobIntake};
pub use job::{JobRecord, JobState};
pub use processor::{JobProcessor, MemoryCurator, ProcessorOutput, ProcessorRegistry};
pub use publisher::ResponsePublisher;
pub use relay_api::RelayApi;
pub use service::{DvmService, ServiceStats};
