//! NIP-90: Data Vending Machine
//!
//! Customers publish job requests, service providers answer with feedback and
//! results. Money in, data out.
//!
//! ## Kinds
//! - 5000-5999: Job request kinds
//! - 6000-6999: Job result kinds (request kind + 1000)
//! - 7000: Job feedback
//!
//! ## Tags
//! - `["i", <data>, <type>, <relay?>, <marker?>]` input
//! - `["param", <key>, <value>]` processing option
//! - `["e", <job id>]` back-reference from feedback/result to the request
//! - `["p", <pubkey>]` on a request: the only provider allowed to handle it;
//!   on a response: the customer
//! - `["status", <status>, <extra?>]` feedback status
//! - `["amount", <msats>, <bolt11?>]` payment request

use crate::nip01::{Event, EventTemplate};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Kind range for job requests
pub const JOB_REQUEST_KIND_MIN: u16 = 5000;
pub const JOB_REQUEST_KIND_MAX: u16 = 5999;

/// Kind range for job results (request kind + 1000)
pub const JOB_RESULT_KIND_MIN: u16 = 6000;
pub const JOB_RESULT_KIND_MAX: u16 = 6999;

/// Kind for job feedback
pub const KIND_JOB_FEEDBACK: u16 = 7000;

/// Memory curation: daily log + memory file in, suggested memory edits out
pub const KIND_JOB_MEMORY_CURATION: u16 = 5700;

/// Errors that can occur during NIP-90 operations.
#[derive(Debug, Error)]
pub enum Nip90Error {
    #[error("invalid kind: {0} (expected {1})")]
    InvalidKind(u16, String),

    #[error("missing required tag: {0}")]
    MissingTag(String),

    #[error("invalid input type: {0}")]
    InvalidInputType(String),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}

/// Input type for job request `i` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    /// A URL to fetch data from
    Url,
    /// A Nostr event ID
    Event,
    /// Output of a previous job
    Job,
    /// Direct text input
    Text,
    /// Payload carried in the request content instead of the tag
    Data,
}

impl InputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::Url => "url",
            InputType::Event => "event",
            InputType::Job => "job",
            InputType::Text => "text",
            InputType::Data => "data",
        }
    }
}

impl FromStr for InputType {
    type Err = Nip90Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "url" => Ok(InputType::Url),
            "event" => Ok(InputType::Event),
            "job" => Ok(InputType::Job),
            "text" => Ok(InputType::Text),
            "data" => Ok(InputType::Data),
            _ => Err(Nip90Error::InvalidInputType(s.to_string())),
        }
    }
}

/// Job feedback status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    /// Service Provider requires payment before continuing
    PaymentRequired,
    /// Service Provider is processing the job
    Processing,
    /// Service Provider was unable to process the job
    Error,
    /// Service Provider successfully processed the job
    Success,
    /// Service Provider partially processed the job
    Partial,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::PaymentRequired => "payment-required",
            JobStatus::Processing => "processing",
            JobStatus::Error => "error",
            JobStatus::Success => "success",
            JobStatus::Partial => "partial",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, JobStatus::Error)
    }
}

impl FromStr for JobStatus {
    type Err = Nip90Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "payment-required" => Ok(JobStatus::PaymentRequired),
            "processing" => Ok(JobStatus::Processing),
            "error" => Ok(JobStatus::Error),
            "success" => Ok(JobStatus::Success),
            "partial" => Ok(JobStatus::Partial),
            _ => Err(Nip90Error::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An input for a job request (`i` tag).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInput {
    /// The input data/argument
    pub data: String,
    /// How to interpret the input
    pub input_type: InputType,
    /// Relay hint (for event/job types)
    pub relay: Option<String>,
    /// Optional marker for how input should be used
    pub marker: Option<String>,
}

impl JobInput {
    fn new(data: impl Into<String>, input_type: InputType) -> Self {
        Self {
            data: data.into(),
            input_type,
            relay: None,
            marker: None,
        }
    }

    pub fn text(data: impl Into<String>) -> Self {
        Self::new(data, InputType::Text)
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self::new(url, InputType::Url)
    }

    pub fn event(event_id: impl Into<String>, relay: Option<String>) -> Self {
        Self {
            relay,
            ..Self::new(event_id, InputType::Event)
        }
    }

    pub fn job(job_id: impl Into<String>, relay: Option<String>) -> Self {
        Self {
            relay,
            ..Self::new(job_id, InputType::Job)
        }
    }

    /// Placeholder input announcing that the payload lives in the content.
    pub fn data(data: impl Into<String>) -> Self {
        Self::new(data, InputType::Data)
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = Some(marker.into());
        self
    }

    /// Convert to tag array.
    pub fn to_tag(&self) -> Vec<String> {
        let mut tag = vec![
            "i".to_string(),
            self.data.clone(),
            self.input_type.as_str().to_string(),
        ];

        // The relay slot is kept (possibly empty) whenever a marker follows.
        if self.relay.is_some() || self.marker.is_some() {
            tag.push(self.relay.clone().unwrap_or_default());
        }
        if let Some(marker) = &self.marker {
            tag.push(marker.clone());
        }

        tag
    }

    /// Parse from tag array.
    ///
    /// Some clients put the marker directly in the relay slot
    /// (`["i", data, "text", "daily_log"]`). A fourth element that is not a
    /// websocket URL and has no fifth element after it is read as the marker.
    pub fn from_tag(tag: &[String]) -> Result<Self, Nip90Error> {
        if tag.len() < 3 || tag[0] != "i" {
            return Err(Nip90Error::MissingTag(
                "i tag requires at least 3 elements".to_string(),
            ));
        }

        let non_empty = |s: Option<&String>| s.filter(|s| !s.is_empty()).cloned();
        let third = non_empty(tag.get(3));
        let fourth = non_empty(tag.get(4));

        let (relay, marker) = match (third, fourth) {
            (relay, Some(marker)) => (relay, Some(marker)),
            (Some(slot), None) if !is_relay_url(&slot) => (None, Some(slot)),
            (relay, None) => (relay, None),
        };

        Ok(Self {
            data: tag[1].clone(),
            input_type: tag[2].parse()?,
            relay,
            marker,
        })
    }
}

fn is_relay_url(value: &str) -> bool {
    value.starts_with("wss://") || value.starts_with("ws://")
}

/// A parameter for a job request (`param` tag).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobParam {
    pub key: String,
    pub value: String,
}

impl JobParam {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn to_tag(&self) -> Vec<String> {
        vec!["param".to_string(), self.key.clone(), self.value.clone()]
    }

    pub fn from_tag(tag: &[String]) -> Result<Self, Nip90Error> {
        if tag.len() < 3 || tag[0] != "param" {
            return Err(Nip90Error::MissingTag(
                "param tag requires 3 elements".to_string(),
            ));
        }

        Ok(Self::new(tag[1].clone(), tag[2].clone()))
    }
}

/// A job request (kind 5000-5999).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub kind: u16,
    pub inputs: Vec<JobInput>,
    /// Expected output format (MIME type)
    pub output: Option<String>,
    pub params: Vec<JobParam>,
    /// Maximum bid in millisats
    pub bid: Option<u64>,
    /// Relays where service providers should publish responses
    pub relays: Vec<String>,
    /// Providers allowed to handle the job; empty means anyone
    pub service_providers: Vec<String>,
    /// Opaque payload, used for inputs too large for a tag
    pub content: String,
}

impl JobRequest {
    pub fn new(kind: u16) -> Result<Self, Nip90Error> {
        if !is_job_request_kind(kind) {
            return Err(Nip90Error::InvalidKind(kind, "5000-5999".to_string()));
        }

        Ok(Self {
            kind,
            inputs: Vec::new(),
            output: None,
            params: Vec::new(),
            bid: None,
            relays: Vec::new(),
            service_providers: Vec::new(),
            content: String::new(),
        })
    }

    pub fn add_input(mut self, input: JobInput) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn with_output(mut self, mime_type: impl Into<String>) -> Self {
        self.output = Some(mime_type.into());
        self
    }

    pub fn add_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push(JobParam::new(key, value));
        self
    }

    pub fn with_bid(mut self, millisats: u64) -> Self {
        self.bid = Some(millisats);
        self
    }

    pub fn add_relay(mut self, relay: impl Into<String>) -> Self {
        self.relays.push(relay.into());
        self
    }

    pub fn add_service_provider(mut self, pubkey: impl Into<String>) -> Self {
        self.service_providers.push(pubkey.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    /// Value of the last `param` with this key.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .rev()
            .find(|p| p.key == key)
            .map(|p| p.value.as_str())
    }

    /// Convert to tags for event creation.
    pub fn to_tags(&self) -> Vec<Vec<String>> {
        let mut tags: Vec<Vec<String>> = self.inputs.iter().map(JobInput::to_tag).collect();

        if let Some(output) = &self.output {
            tags.push(vec!["output".to_string(), output.clone()]);
        }

        tags.extend(self.params.iter().map(JobParam::to_tag));

        if let Some(bid) = self.bid {
            tags.push(vec!["bid".to_string(), bid.to_string()]);
        }

        if !self.relays.is_empty() {
            let mut relay_tag = vec!["relays".to_string()];
            relay_tag.extend(self.relays.iter().cloned());
            tags.push(relay_tag);
        }

        for sp in &self.service_providers {
            tags.push(vec!["p".to_string(), sp.clone()]);
        }

        tags
    }

    pub fn to_template(&self) -> EventTemplate {
        EventTemplate::new(self.kind, self.content.clone()).with_tags(self.to_tags())
    }

    /// Read a request back out of a signed event.
    ///
    /// Malformed `i` and `param` tags are skipped rather than failing the
    /// whole request; what is missing surfaces later as a missing input.
    pub fn from_event(event: &Event) -> Result<Self, Nip90Error> {
        let mut request = Self::new(event.kind)?;
        request.content = event.content.clone();

        for tag in &event.tags {
            match tag.first().map(String::as_str) {
                Some("i") => {
                    if let Ok(input) = JobInput::from_tag(tag) {
                        request.inputs.push(input);
                    }
                }
                Some("param") => {
                    if let Ok(param) = JobParam::from_tag(tag) {
                        request.params.push(param);
                    }
                }
                Some("output") => request.output = tag.get(1).cloned(),
                Some("bid") => request.bid = tag.get(1).and_then(|b| b.parse().ok()),
                Some("relays") => request.relays.extend(tag.iter().skip(1).cloned()),
                Some("p") => {
                    if let Some(pubkey) = tag.get(1) {
                        request.service_providers.push(pubkey.clone());
                    }
                }
                _ => {}
            }
        }

        Ok(request)
    }

    /// The corresponding result kind for this request.
    pub fn result_kind(&self) -> u16 {
        self.kind + 1000
    }

    /// Whether a provider with this pubkey may handle the request.
    pub fn is_addressed_to(&self, pubkey: &str) -> bool {
        self.service_providers.is_empty() || self.service_providers.iter().any(|p| p == pubkey)
    }
}

/// A job result (kind 6000-6999).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    /// The result kind (request kind + 1000)
    pub kind: u16,
    pub content: String,
    /// The original job request (stringified JSON)
    pub request: Option<String>,
    pub request_id: String,
    pub request_relay: Option<String>,
    pub customer_pubkey: String,
    /// Amount requested in millisats
    pub amount: Option<u64>,
    pub bolt11: Option<String>,
}

impl JobResult {
    pub fn new(
        request_kind: u16,
        request_id: impl Into<String>,
        customer_pubkey: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<Self, Nip90Error> {
        let kind = get_result_kind(request_kind)
            .ok_or_else(|| Nip90Error::InvalidKind(request_kind, "5000-5999".to_string()))?;

        Ok(Self {
            kind,
            content: content.into(),
            request: None,
            request_id: request_id.into(),
            request_relay: None,
            customer_pubkey: customer_pubkey.into(),
            amount: None,
            bolt11: None,
        })
    }

    pub fn with_request(mut self, request_json: impl Into<String>) -> Self {
        self.request = Some(request_json.into());
        self
    }

    pub fn with_request_relay(mut self, relay: impl Into<String>) -> Self {
        self.request_relay = Some(relay.into());
        self
    }

    pub fn with_amount(mut self, millisats: u64, bolt11: Option<String>) -> Self {
        self.amount = Some(millisats);
        self.bolt11 = bolt11;
        self
    }

    pub fn to_tags(&self) -> Vec<Vec<String>> {
        let mut tags = Vec::new();

        if let Some(request) = &self.request {
            tags.push(vec!["request".to_string(), request.clone()]);
        }

        let mut e_tag = vec!["e".to_string(), self.request_id.clone()];
        if let Some(relay) = &self.request_relay {
            e_tag.push(relay.clone());
        }
        tags.push(e_tag);

        tags.push(vec!["p".to_string(), self.customer_pubkey.clone()]);

        if let Some(amount) = self.amount {
            tags.push(amount_tag(amount, self.bolt11.as_deref()));
        }

        tags
    }

    pub fn to_template(&self) -> EventTemplate {
        EventTemplate::new(self.kind, self.content.clone()).with_tags(self.to_tags())
    }

    pub fn from_event(event: &Event) -> Result<Self, Nip90Error> {
        if !is_job_result_kind(event.kind) {
            return Err(Nip90Error::InvalidKind(event.kind, "6000-6999".to_string()));
        }
        let (amount, bolt11) = parse_amount(event)?;

        Ok(Self {
            kind: event.kind,
            content: event.content.clone(),
            request: event.tag_value("request").map(str::to_string),
            request_id: request_reference(event)
                .ok_or_else(|| Nip90Error::MissingTag("e".to_string()))?
                .to_string(),
            request_relay: event.tag("e").and_then(|t| t.get(2)).cloned(),
            customer_pubkey: event.tag_value("p").unwrap_or_default().to_string(),
            amount,
            bolt11,
        })
    }
}

/// Job feedback (kind 7000).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFeedback {
    pub status: JobStatus,
    /// Extra info about the status
    pub status_extra: Option<String>,
    pub request_id: String,
    pub request_relay: Option<String>,
    pub customer_pubkey: String,
    /// Optional content (partial results, etc.)
    pub content: String,
    pub amount: Option<u64>,
    pub bolt11: Option<String>,
}

impl JobFeedback {
    pub fn new(
        status: JobStatus,
        request_id: impl Into<String>,
        customer_pubkey: impl Into<String>,
    ) -> Self {
        Self {
            status,
            status_extra: None,
            request_id: request_id.into(),
            request_relay: None,
            customer_pubkey: customer_pubkey.into(),
            content: String::new(),
            amount: None,
            bolt11: None,
        }
    }

    pub fn with_status_extra(mut self, extra: impl Into<String>) -> Self {
        self.status_extra = Some(extra.into());
        self
    }

    pub fn with_request_relay(mut self, relay: impl Into<String>) -> Self {
        self.request_relay = Some(relay.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_amount(mut self, millisats: u64, bolt11: Option<String>) -> Self {
        self.amount = Some(millisats);
        self.bolt11 = bolt11;
        self
    }

    pub fn to_tags(&self) -> Vec<Vec<String>> {
        let mut tags = Vec::new();

        let mut status_tag = vec!["status".to_string(), self.status.as_str().to_string()];
        status_tag.push(self.status_extra.clone().unwrap_or_default());
        tags.push(status_tag);

        let mut e_tag = vec!["e".to_string(), self.request_id.clone()];
        if let Some(relay) = &self.request_relay {
            e_tag.push(relay.clone());
        }
        tags.push(e_tag);

        tags.push(vec!["p".to_string(), self.customer_pubkey.clone()]);

        if let Some(amount) = self.amount {
            tags.push(amount_tag(amount, self.bolt11.as_deref()));
        }

        tags
    }

    pub fn to_template(&self) -> EventTemplate {
        EventTemplate::new(KIND_JOB_FEEDBACK, self.content.clone()).with_tags(self.to_tags())
    }

    pub fn from_event(event: &Event) -> Result<Self, Nip90Error> {
        if !is_job_feedback_kind(event.kind) {
            return Err(Nip90Error::InvalidKind(event.kind, "7000".to_string()));
        }
        let status_tag = event
            .tag("status")
            .ok_or_else(|| Nip90Error::MissingTag("status".to_string()))?;
        let status = status_tag
            .get(1)
            .ok_or_else(|| Nip90Error::MissingTag("status value".to_string()))?
            .parse()?;
        let (amount, bolt11) = parse_amount(event)?;

        Ok(Self {
            status,
            status_extra: status_tag.get(2).filter(|s| !s.is_empty()).cloned(),
            request_id: request_reference(event)
                .ok_or_else(|| Nip90Error::MissingTag("e".to_string()))?
                .to_string(),
            request_relay: event.tag("e").and_then(|t| t.get(2)).cloned(),
            customer_pubkey: event.tag_value("p").unwrap_or_default().to_string(),
            content: event.content.clone(),
            amount,
            bolt11,
        })
    }
}

fn amount_tag(millisats: u64, bolt11: Option<&str>) -> Vec<String> {
    let mut tag = vec!["amount".to_string(), millisats.to_string()];
    if let Some(bolt11) = bolt11 {
        tag.push(bolt11.to_string());
    }
    tag
}

fn parse_amount(event: &Event) -> Result<(Option<u64>, Option<String>), Nip90Error> {
    let Some(tag) = event.tag("amount") else {
        return Ok((None, None));
    };
    let raw = tag
        .get(1)
        .ok_or_else(|| Nip90Error::MissingTag("amount value".to_string()))?;
    let millisats = raw
        .parse()
        .map_err(|_| Nip90Error::InvalidAmount(raw.clone()))?;
    Ok((Some(millisats), tag.get(2).cloned()))
}

/// The job id a feedback or result event answers (its first `e` tag).
pub fn request_reference(event: &Event) -> Option<&str> {
    event.tag_value("e")
}

/// Check if a kind is a job request kind (5000-5999).
pub fn is_job_request_kind(kind: u16) -> bool {
    (JOB_REQUEST_KIND_MIN..=JOB_REQUEST_KIND_MAX).contains(&kind)
}

/// Check if a kind is a job result kind (6000-6999).
pub fn is_job_result_kind(kind: u16) -> bool {
    (JOB_RESULT_KIND_MIN..=JOB_RESULT_KIND_MAX).contains(&kind)
}

/// Check if a kind is a job feedback kind (7000).
pub fn is_job_feedback_kind(kind: u16) -> bool {
    kind == KIND_JOB_FEEDBACK
}

/// Get the result kind for a given request kind.
pub fn get_result_kind(request_kind: u16) -> Option<u16> {
    is_job_request_kind(request_kind).then(|| request_kind + 1000)
}

/// Get the request kind for a given result kind.
pub fn get_request_kind(result_kind: u16) -> Option<u16> {
    is_job_result_kind(result_kind).then(|| result_kind - 1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    fn sample_event(kind: u16, tags: Vec<Vec<String>>, content: &str) -> Event {
        Event {
            id: "a".repeat(64),
            pubkey: "b".repeat(64),
            created_at: 1_700_000_000,
            kind,
            tags,
            content: content.to_string(),
            sig: "c".repeat(128),
        }
    }

    // =========================================================================
    // Kind tests
    // =========================================================================

    #[test]
    fn test_kind_ranges() {
        assert!(is_job_request_kind(KIND_JOB_MEMORY_CURATION));
        assert!(!is_job_request_kind(6700));
        assert!(is_job_result_kind(6700));
        assert!(is_job_feedback_kind(7000));
        assert_eq!(get_result_kind(5700), Some(6700));
        assert_eq!(get_result_kind(7000), None);
        assert_eq!(get_request_kind(6700), Some(5700));
    }

    // =========================================================================
    // JobInput tests
    // =========================================================================

    #[test]
    fn test_input_to_tag_with_marker_keeps_relay_slot() {
        let input = JobInput::text("log").with_marker("daily");
        assert_eq!(input.to_tag(), tag(&["i", "log", "text", "", "daily"]));
    }

    #[test]
    fn test_input_from_tag_marker_in_fifth_slot() {
        let input = JobInput::from_tag(&tag(&["i", "log", "text", "", "memory"])).unwrap();
        assert_eq!(input.marker.as_deref(), Some("memory"));
        assert!(input.relay.is_none());
    }

    #[test]
    fn test_input_from_tag_marker_in_relay_slot() {
        let input = JobInput::from_tag(&tag(&["i", "log", "text", "daily_log"])).unwrap();
        assert_eq!(input.marker.as_deref(), Some("daily_log"));
        assert!(input.relay.is_none());
    }

    #[test]
    fn test_input_from_tag_relay_hint() {
        let input =
            JobInput::from_tag(&tag(&["i", "abc", "event", "wss://relay.example"])).unwrap();
        assert_eq!(input.relay.as_deref(), Some("wss://relay.example"));
        assert!(input.marker.is_none());
    }

    #[test]
    fn test_input_from_tag_rejects_short_or_unknown() {
        assert!(JobInput::from_tag(&tag(&["i", "x"])).is_err());
        assert!(JobInput::from_tag(&tag(&["i", "x", "blob"])).is_err());
    }

    // =========================================================================
    // JobRequest tests
    // =========================================================================

    #[test]
    fn test_request_invalid_kind() {
        assert!(JobRequest::new(7000).is_err());
    }

    #[test]
    fn test_request_tags_and_parse_back() {
        let request = JobRequest::new(5700)
            .unwrap()
            .add_input(JobInput::text("log").with_marker("daily_log"))
            .add_param("style", "detailed")
            .with_bid(1000)
            .add_relay("wss://a")
            .add_service_provider("f".repeat(64));

        let event = sample_event(5700, request.to_tags(), "");
        let parsed = JobRequest::from_event(&event).unwrap();

        assert_eq!(parsed, request);
        assert_eq!(parsed.param("style"), Some("detailed"));
        assert_eq!(parsed.result_kind(), 6700);
    }

    #[test]
    fn test_request_from_event_skips_malformed_tags() {
        let event = sample_event(
            5700,
            vec![tag(&["i"]), tag(&["param", "style"]), tag(&["i", "ok", "text"])],
            "",
        );
        let parsed = JobRequest::from_event(&event).unwrap();
        assert_eq!(parsed.inputs.len(), 1);
        assert!(parsed.params.is_empty());
    }

    #[test]
    fn test_request_addressing() {
        let open = JobRequest::new(5700).unwrap();
        assert!(open.is_addressed_to("anyone"));

        let routed = JobRequest::new(5700).unwrap().add_service_provider("me");
        assert!(routed.is_addressed_to("me"));
        assert!(!routed.is_addressed_to("you"));
    }

    // =========================================================================
    // Feedback and result tests
    // =========================================================================

    #[test]
    fn test_feedback_tags() {
        let feedback = JobFeedback::new(JobStatus::Error, "job1", "cust")
            .with_status_extra("No daily log input provided");
        let tags = feedback.to_tags();
        assert_eq!(
            tags[0],
            tag(&["status", "error", "No daily log input provided"])
        );
        assert_eq!(tags[1], tag(&["e", "job1"]));
        assert_eq!(tags[2], tag(&["p", "cust"]));
    }

    #[test]
    fn test_feedback_from_event() {
        let event = sample_event(
            KIND_JOB_FEEDBACK,
            vec![
                tag(&["status", "payment-required", ""]),
                tag(&["e", "job1"]),
                tag(&["p", "cust"]),
                tag(&["amount", "5000", "lnbc1"]),
            ],
            "",
        );
        let feedback = JobFeedback::from_event(&event).unwrap();
        assert_eq!(feedback.status, JobStatus::PaymentRequired);
        assert!(feedback.status_extra.is_none());
        assert_eq!(feedback.amount, Some(5000));
        assert_eq!(feedback.bolt11.as_deref(), Some("lnbc1"));
    }

    #[test]
    fn test_feedback_from_event_requires_status() {
        let event = sample_event(KIND_JOB_FEEDBACK, vec![tag(&["e", "job1"])], "");
        assert!(JobFeedback::from_event(&event).is_err());
    }

    #[test]
    fn test_result_from_event() {
        let result = JobResult::new(5700, "job1", "cust", "## Summary")
            .unwrap()
            .with_request("{}")
            .with_amount(2100, None);
        let event = sample_event(6700, result.to_tags(), "## Summary");

        let parsed = JobResult::from_event(&event).unwrap();
        assert_eq!(parsed, result);
        assert_eq!(request_reference(&event), Some("job1"));
    }

    #[test]
    fn test_result_rejects_bad_amount() {
        let event = sample_event(
            6700,
            vec![tag(&["e", "job1"]), tag(&["amount", "lots"])],
            "",
        );
        assert!(matches!(
            JobResult::from_event(&event),
            Err(Nip90Error::InvalidAmount(_))
        ));
    }
}
