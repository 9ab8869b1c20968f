//! # Request and Output Types
//!
//! Shared types flowing between the HTTP layer and the generation engine.
//!
//! ## Overview
//!
//! - [`RequestId`] - process-unique correlation and cancellation token
//! - [`RequestOutput`] / [`CompletionOutput`] - one element of the engine's
//!   result sequence; candidate texts are cumulative, not deltas
//! - [`ResponsePayload`] - the wire shape of both streamed chunks and the final
//!   blocking response
//!
//! ## Constants
//!
//! - [`CHUNK_DELIMITER`] - terminator appended to every streamed chunk

use crate::Error;
use core::fmt;
use ferroid::generator::{IdGenStatus, LockMonoUlidGenerator};
use ferroid::id::ULID;
use ferroid::rand::ThreadRandom;
use ferroid::time::{MonotonicClock, UNIX_EPOCH};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Byte appended after every serialized chunk on a streaming response.
///
/// JSON values may contain newlines but never a raw NUL, so the delimiter is
/// unambiguous against payload content.
pub const CHUNK_DELIMITER: u8 = b'\0';

/// Process-wide ULID source. Within one millisecond the random component is
/// incremented rather than redrawn, so ids are strictly increasing.
static REQUEST_IDS: LazyLock<LockMonoUlidGenerator<ULID, MonotonicClock, ThreadRandom>> =
    LazyLock::new(|| {
        LockMonoUlidGenerator::new(MonotonicClock::with_epoch(UNIX_EPOCH), ThreadRandom)
    });

/// Opaque identifier assigned to a request at admission time.
///
/// Backed by a ULID: 48 bits of millisecond timestamp followed by 80 random
/// bits, rendered as 26 Crockford Base32 characters. Ids handed out by
/// [`RequestId::generate`] are never reused within a process.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(ULID);

impl RequestId {
    /// Allocates a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        loop {
            match REQUEST_IDS.next_id() {
                IdGenStatus::Ready { id } => break Self(id),
                // The random component is exhausted for this millisecond.
                IdGenStatus::Pending { .. } => std::thread::yield_now(),
            }
        }
    }

    /// Returns the underlying ULID.
    pub const fn as_ulid(&self) -> ULID {
        self.0
    }
}

impl From<ULID> for RequestId {
    fn from(id: ULID) -> Self {
        Self(id)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({})", self.0)
    }
}

/// Why a candidate stopped producing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    /// A stop string was reached.
    Stop,
    /// `max_tokens` was reached.
    Length,
    /// The request was aborted.
    Abort,
}

/// One candidate continuation within a [`RequestOutput`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionOutput {
    /// Position of this candidate among the request's `n` candidates.
    pub index: usize,
    /// Generated text so far (cumulative).
    pub text: String,
    pub finish_reason: Option<FinishReason>,
}

impl CompletionOutput {
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
            finish_reason: None,
        }
    }

    pub fn finished(&self) -> bool {
        self.finish_reason.is_some()
    }
}

/// One element of the engine's result sequence for a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestOutput {
    /// String rendering of the owning [`RequestId`].
    pub request_id: String,
    pub prompt: String,
    pub outputs: Vec<CompletionOutput>,
    /// Set on the last element the engine produces for the request.
    pub finished: bool,
}

impl RequestOutput {
    pub fn new(id: RequestId, prompt: impl Into<String>, outputs: Vec<CompletionOutput>) -> Self {
        let finished = !outputs.is_empty() && outputs.iter().all(CompletionOutput::finished);
        Self {
            request_id: id.to_string(),
            prompt: prompt.into(),
            outputs,
            finished,
        }
    }

    /// Checks that every candidate in `self` extends the matching candidate in
    /// `prev`.
    ///
    /// Candidate sets must line up one-to-one; a candidate whose text is not a
    /// prefix-extension of its predecessor is a retraction.
    pub fn extends(&self, prev: &RequestOutput) -> bool {
        self.outputs.len() == prev.outputs.len()
            && self
                .outputs
                .iter()
                .zip(&prev.outputs)
                .all(|(next, prev)| next.index == prev.index && next.text.starts_with(&prev.text))
    }
}

/// Wire shape of a generation response: `{"text": [...]}`.
///
/// Each entry is the prompt concatenated with one candidate's cumulative text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsePayload {
    pub text: Vec<String>,
}

impl From<&RequestOutput> for ResponsePayload {
    fn from(output: &RequestOutput) -> Self {
        Self {
            text: output
                .outputs
                .iter()
                .map(|candidate| {
                    let mut text = String::with_capacity(output.prompt.len() + candidate.text.len());
                    text.push_str(&output.prompt);
                    text.push_str(&candidate.text);
                    text
                })
                .collect(),
        }
    }
}

impl ResponsePayload {
    /// Serializes the payload as one streamed chunk: JSON followed by
    /// [`CHUNK_DELIMITER`].
    pub fn to_chunk(&self) -> crate::Result<Vec<u8>> {
        let mut buf = serde_json::to_vec(self).map_err(|e| Error::EngineFailure {
            context: format!("Failed to serialize chunk: {e}"),
        })?;
        buf.push(CHUNK_DELIMITER);
        Ok(buf)
    }
}
