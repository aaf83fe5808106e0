//! Job input extraction and packing.
//!
//! A request carries its inputs either in `i` tags or, when they are too
//! large for a tag, as a JSON object in the event content with a `data`
//! placeholder tag. Both encodings are read here and both are produced by
//! [`attach_inputs`].

use crate::error::Result;
use nostr::{InputType, JobInput, JobRequest};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Largest input, in bytes, that still travels in an `i` tag.
pub const MAX_TAG_INPUT_BYTES: usize = 1000;

/// Marker on the placeholder tag of a content-carried request.
pub const CONTENT_INPUT_MARKER: &str = "inputs_in_content";

/// Markers naming the daily log input.
pub const DAILY_LOG_MARKERS: &[&str] = &["daily", "daily_log"];
/// Markers naming the memory file input.
pub const MEMORY_FILE_MARKERS: &[&str] = &["memory", "memory_file"];

/// Inputs and params of one request, independent of how they were encoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobInputs {
    /// Inputs keyed by marker (or content JSON key)
    pub named: BTreeMap<String, String>,
    /// Text inputs without a marker, in tag order
    pub unnamed: Vec<String>,
    /// Last value of each `param`
    pub params: BTreeMap<String, String>,
}

impl JobInputs {
    /// Collect inputs from a parsed request.
    ///
    /// Content JSON is read first. Typed `text` tags then fill any name the
    /// content did not provide, so neither source can drop the other.
    pub fn from_request(request: &JobRequest) -> Self {
        let mut inputs = Self::default();

        if let Some(object) = content_object(&request.content) {
            for (key, value) in object {
                if let Value::String(text) = value
                    && !text.is_empty()
                {
                    inputs.named.insert(key, text);
                }
            }
        }

        for input in &request.inputs {
            if input.input_type != InputType::Text {
                continue;
            }
            match &input.marker {
                Some(marker) => {
                    inputs
                        .named
                        .entry(marker.clone())
                        .or_insert_with(|| input.data.clone());
                }
                None => inputs.unnamed.push(input.data.clone()),
            }
        }

        for param in &request.params {
            inputs.params.insert(param.key.clone(), param.value.clone());
        }

        inputs
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.named.get(name).map(String::as_str)
    }

    /// First input present under any of `names`, in order.
    pub fn first_of(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|name| self.get(name))
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// The daily log: a marked input, else the first unmarked text input.
    pub fn daily_log(&self) -> Option<&str> {
        self.first_of(DAILY_LOG_MARKERS)
            .or_else(|| self.unnamed.first().map(String::as_str))
            .filter(|log| !log.trim().is_empty())
    }

    pub fn memory_file(&self) -> Option<&str> {
        self.first_of(MEMORY_FILE_MARKERS)
    }

    /// Builder used by tests and local runs.
    pub fn with_named(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.named.insert(name.into(), value.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

fn content_object(content: &str) -> Option<Map<String, Value>> {
    if content.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(content) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

/// Attach named inputs to a request.
///
/// When every input fits [`MAX_TAG_INPUT_BYTES`] each becomes
/// `["i", data, "text", "", marker]`. Otherwise all of them move into the
/// content as a JSON object keyed by marker, announced by
/// `["i", "json_content", "data", "", "inputs_in_content"]`.
pub fn attach_inputs(request: JobRequest, inputs: &[(&str, &str)]) -> Result<JobRequest> {
    if inputs
        .iter()
        .all(|(_, data)| data.len() <= MAX_TAG_INPUT_BYTES)
    {
        return Ok(inputs.iter().fold(request, |request, (marker, data)| {
            request.add_input(JobInput::text(*data).with_marker(*marker))
        }));
    }

    let content: Map<String, Value> = inputs
        .iter()
        .map(|(marker, data)| (marker.to_string(), Value::String(data.to_string())))
        .collect();
    Ok(request
        .with_content(serde_json::to_string(&content)?)
        .add_input(JobInput::data("json_content").with_marker(CONTENT_INPUT_MARKER)))
}
