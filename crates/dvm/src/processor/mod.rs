//! Job processors
//!
//! A processor owns everything specific to one job kind: which inputs it
//! needs and how it turns them into a result. Intake only talks to the
//! [`JobProcessor`] trait, so adding a job type means registering one more
//! processor in the [`ProcessorRegistry`].

mod curator;

pub use curator::{CurationStyle, Extraction, MemoryCurator, Suggestion};

use crate::error::{DvmError, Result, ValidationError};
use crate::inputs::JobInputs;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// What a processor hands back to the publisher.
#[derive(Debug, Clone)]
pub struct ProcessorOutput {
    /// Structured view of what was extracted, for logs and local runs
    pub extraction: Value,
    /// Result event content
    pub content: String,
}

/// Handler for one job request kind.
///
/// `process` must be deterministic and free of I/O: the same inputs always
/// give the same output.
pub trait JobProcessor: Send + Sync {
    fn kind(&self) -> u16;

    fn name(&self) -> &str;

    /// Reject inputs that can never produce a result.
    fn validate(&self, inputs: &JobInputs) -> std::result::Result<(), ValidationError>;

    fn process(&self, inputs: &JobInputs) -> Result<ProcessorOutput>;

    /// Extra text for the `processing` status.
    fn status_message(&self) -> &str {
        "Processing job..."
    }

    /// Parameter descriptions for the NIP-89 announcement.
    fn nip90_params(&self) -> Option<Value> {
        None
    }
}

/// Processors keyed by request kind.
#[derive(Default, Clone)]
pub struct ProcessorRegistry {
    processors: HashMap<u16, Arc<dyn JobProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in processor.
    pub fn with_defaults() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(MemoryCurator::new()?));
        Ok(registry)
    }

    /// Register a processor, replacing any previous one for its kind.
    pub fn register(&mut self, processor: Arc<dyn JobProcessor>) {
        self.processors.insert(processor.kind(), processor);
    }

    pub fn get(&self, kind: u16) -> Option<Arc<dyn JobProcessor>> {
        self.processors.get(&kind).cloned()
    }

    pub fn require(&self, kind: u16) -> Result<Arc<dyn JobProcessor>> {
        self.get(kind).ok_or(DvmError::UnsupportedKind(kind))
    }

    /// Registered kinds, ascending.
    pub fn kinds(&self) -> Vec<u16> {
        let mut kinds: Vec<u16> = self.processors.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
