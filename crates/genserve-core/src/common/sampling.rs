//! Sampling parameters accepted by the generation engine.
//!
//! [`SamplingParams`] is the engine's side of the request contract. The HTTP
//! layer never interprets individual options; it hands the leftover key/value
//! mapping to [`SamplingParams::from_options`] and surfaces whatever validation
//! message comes back.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Temperatures below this are treated as greedy sampling.
const SAMPLING_EPS: f64 = 1e-5;

/// Upper bound on `n` and `best_of`. Every candidate is materialized for
/// every step, so this bounds the per-request memory.
pub const MAX_CANDIDATES: usize = 128;

/// Stop sequences, accepted either as a single string or a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum StopSequences {
    One(String),
    Many(Vec<String>),
}

impl From<StopSequences> for Vec<String> {
    fn from(value: StopSequences) -> Self {
        match value {
            StopSequences::One(s) => vec![s],
            StopSequences::Many(v) => v,
        }
    }
}

/// Raw option mapping as it arrives from the request body.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSamplingParams {
    #[serde(default = "default_n")]
    n: usize,
    best_of: Option<usize>,
    #[serde(default)]
    presence_penalty: f64,
    #[serde(default)]
    frequency_penalty: f64,
    #[serde(default = "default_temperature")]
    temperature: f64,
    #[serde(default = "default_top_p")]
    top_p: f64,
    #[serde(default = "default_top_k")]
    top_k: i64,
    #[serde(default)]
    use_beam_search: bool,
    stop: Option<StopSequences>,
    #[serde(default)]
    ignore_eos: bool,
    #[serde(default = "default_max_tokens")]
    max_tokens: usize,
    logprobs: Option<usize>,
}

const fn default_n() -> usize {
    1
}
const fn default_temperature() -> f64 {
    1.0
}
const fn default_top_p() -> f64 {
    1.0
}
const fn default_top_k() -> i64 {
    -1
}
const fn default_max_tokens() -> usize {
    16
}

/// Validated sampling configuration for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplingParams {
    /// Number of candidates returned.
    pub n: usize,
    /// Number of candidates generated before the best `n` are kept.
    pub best_of: usize,
    pub presence_penalty: f64,
    pub frequency_penalty: f64,
    pub temperature: f64,
    pub top_p: f64,
    /// `-1` disables top-k filtering.
    pub top_k: i64,
    pub use_beam_search: bool,
    /// Generation stops once any of these appears in a candidate's text. The
    /// stop string itself is not returned.
    pub stop: Vec<String>,
    pub ignore_eos: bool,
    pub max_tokens: usize,
    pub logprobs: Option<usize>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            n: default_n(),
            best_of: default_n(),
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            use_beam_search: false,
            stop: Vec::new(),
            ignore_eos: false,
            max_tokens: default_max_tokens(),
            logprobs: None,
        }
    }
}

impl SamplingParams {
    /// Builds sampling parameters from the request's remaining options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSamplingConfig`] when an option is unknown,
    /// ill-typed, out of range, or conflicts with another option.
    pub fn from_options(options: Map<String, Value>) -> Result<Self> {
        let raw: RawSamplingParams =
            serde_json::from_value(Value::Object(options)).map_err(|e| invalid(e.to_string()))?;

        let params = Self {
            n: raw.n,
            best_of: raw.best_of.unwrap_or(raw.n),
            presence_penalty: raw.presence_penalty,
            frequency_penalty: raw.frequency_penalty,
            temperature: raw.temperature,
            top_p: raw.top_p,
            top_k: raw.top_k,
            use_beam_search: raw.use_beam_search,
            stop: raw.stop.map(Into::into).unwrap_or_default(),
            ignore_eos: raw.ignore_eos,
            max_tokens: raw.max_tokens,
            logprobs: raw.logprobs,
        };
        params.verify()?;
        Ok(params)
    }

    /// True when sampling degenerates to always taking the most likely token.
    pub fn is_greedy(&self) -> bool {
        !self.use_beam_search && self.temperature < SAMPLING_EPS
    }

    fn verify(&self) -> Result<()> {
        self.verify_args()?;
        if self.use_beam_search {
            self.verify_beam_search()
        } else if self.temperature < SAMPLING_EPS {
            self.verify_greedy_sampling()
        } else {
            Ok(())
        }
    }

    fn verify_args(&self) -> Result<()> {
        if self.n < 1 {
            return Err(invalid(format!("n must be at least 1, got {}.", self.n)));
        }
        if self.n > MAX_CANDIDATES {
            return Err(invalid(format!(
                "n must be at most {MAX_CANDIDATES}, got {}.",
                self.n
            )));
        }
        if self.best_of > MAX_CANDIDATES {
            return Err(invalid(format!(
                "best_of must be at most {MAX_CANDIDATES}, got {}.",
                self.best_of
            )));
        }
        if self.best_of < self.n {
            return Err(invalid(format!(
                "best_of must be greater than or equal to n, got n={} and best_of={}.",
                self.n, self.best_of
            )));
        }
        if !(-2.0..=2.0).contains(&self.presence_penalty) {
            return Err(invalid(format!(
                "presence_penalty must be in [-2, 2], got {}.",
                self.presence_penalty
            )));
        }
        if !(-2.0..=2.0).contains(&self.frequency_penalty) {
            return Err(invalid(format!(
                "frequency_penalty must be in [-2, 2], got {}.",
                self.frequency_penalty
            )));
        }
        if self.temperature < 0.0 {
            return Err(invalid(format!(
                "temperature must be non-negative, got {}.",
                self.temperature
            )));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(invalid(format!(
                "top_p must be in (0, 1], got {}.",
                self.top_p
            )));
        }
        if self.top_k < -1 || self.top_k == 0 {
            return Err(invalid(format!(
                "top_k must be -1 (disable), or at least 1, got {}.",
                self.top_k
            )));
        }
        if self.max_tokens < 1 {
            return Err(invalid(format!(
                "max_tokens must be at least 1, got {}.",
                self.max_tokens
            )));
        }
        Ok(())
    }

    fn verify_beam_search(&self) -> Result<()> {
        if self.best_of == 1 {
            return Err(invalid(format!(
                "best_of must be greater than 1 when using beam search. Got {}.",
                self.best_of
            )));
        }
        if self.temperature > SAMPLING_EPS {
            return Err(invalid("temperature must be 0 when using beam search."));
        }
        if self.top_p < 1.0 - SAMPLING_EPS {
            return Err(invalid("top_p must be 1 when using beam search."));
        }
        if self.top_k != -1 {
            return Err(invalid("top_k must be -1 when using beam search."));
        }
        Ok(())
    }

    fn verify_greedy_sampling(&self) -> Result<()> {
        if self.best_of > 1 {
            return Err(invalid(format!(
                "best_of must be 1 when using greedy sampling. Got {}.",
                self.best_of
            )));
        }
        if self.top_p < 1.0 - SAMPLING_EPS {
            return Err(invalid("top_p must be 1 when using greedy sampling."));
        }
        if self.top_k != -1 {
            return Err(invalid("top_k must be -1 when using greedy sampling."));
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> Error {
    Error::InvalidSamplingConfig {
        reason: reason.into(),
    }
}
