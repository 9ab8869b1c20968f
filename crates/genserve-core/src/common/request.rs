//! Request descriptor building.
//!
//! Turns a decoded `/generate` body into a [`GenerationRequest`]: `prompt` and
//! `stream` are pulled out of the mapping, and everything left over is handed
//! to [`SamplingParams::from_options`].

use crate::{Error, Result, sampling::SamplingParams};
use serde_json::{Map, Value};

/// A validated generation request.
///
/// Immutable once built; use [`GenerationRequest::into_parts`] to take
/// ownership of the fields.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    prompt: String,
    stream: bool,
    sampling: SamplingParams,
}

impl GenerationRequest {
    /// Parses a raw request body.
    ///
    /// # Errors
    ///
    /// - [`Error::MalformedRequest`] if the body is not a JSON object, or if
    ///   `prompt`/`stream` are missing or ill-typed.
    /// - [`Error::InvalidSamplingConfig`] if the remaining options are rejected.
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(body).map_err(|e| Error::MalformedRequest {
            reason: format!("body is not valid JSON: {e}"),
        })?;
        match value {
            Value::Object(options) => Self::from_options(options),
            _ => Err(Error::MalformedRequest {
                reason: "body must be a JSON object".to_string(),
            }),
        }
    }

    /// Builds a request from an already decoded option mapping.
    ///
    /// # Errors
    ///
    /// See [`GenerationRequest::from_slice`].
    pub fn from_options(mut options: Map<String, Value>) -> Result<Self> {
        let prompt = match options.remove("prompt") {
            Some(Value::String(prompt)) if !prompt.is_empty() => prompt,
            Some(Value::String(_)) => {
                return Err(Error::MalformedRequest {
                    reason: "`prompt` must not be empty".to_string(),
                });
            }
            Some(_) => {
                return Err(Error::MalformedRequest {
                    reason: "`prompt` must be a string".to_string(),
                });
            }
            None => {
                return Err(Error::MalformedRequest {
                    reason: "missing required field `prompt`".to_string(),
                });
            }
        };

        let stream = match options.remove("stream") {
            None | Some(Value::Null) => false,
            Some(value) => coerce_bool(&value).ok_or_else(|| Error::MalformedRequest {
                reason: format!("`stream` must be a boolean, got {value}"),
            })?,
        };

        let sampling = SamplingParams::from_options(options)?;

        Ok(Self {
            prompt,
            stream,
            sampling,
        })
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn stream(&self) -> bool {
        self.stream
    }

    pub fn sampling(&self) -> &SamplingParams {
        &self.sampling
    }

    pub fn into_parts(self) -> (String, bool, SamplingParams) {
        (self.prompt, self.stream, self.sampling)
    }
}

fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_u64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
