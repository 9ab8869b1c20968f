use super::request::GenerateJob;
use core::time::Duration;
use genserve_core::{
    sampling::SamplingParams,
    types::{CompletionOutput, FinishReason, RequestOutput},
};
use tokio::time::sleep;

/// Word-replay generator for one request.
///
/// Candidate `i` "generates" by replaying the prompt's whitespace-separated
/// words starting at offset `i`, one word per step. All candidates advance in
/// lockstep. Text only ever grows: when a stop string appears it is cut off,
/// but never below the text already emitted.
#[derive(Debug)]
pub struct Replay<'a> {
    words: Vec<&'a str>,
    params: &'a SamplingParams,
    outputs: Vec<CompletionOutput>,
    steps: usize,
}

impl<'a> Replay<'a> {
    pub fn new(prompt: &'a str, params: &'a SamplingParams) -> Self {
        Self {
            words: prompt.split_whitespace().collect(),
            params,
            outputs: (0..params.n).map(|i| CompletionOutput::new(i, "")).collect(),
            steps: 0,
        }
    }

    /// Advances every unfinished candidate by one word.
    pub fn step(&mut self) -> &[CompletionOutput] {
        let step = self.steps;
        self.steps += 1;

        for candidate in self.outputs.iter_mut().filter(|c| !c.finished()) {
            if self.words.is_empty() {
                candidate.finish_reason = Some(FinishReason::Stop);
                continue;
            }

            let word = self.words[(candidate.index + step) % self.words.len()];
            let emitted = candidate.text.len();
            candidate.text.push(' ');
            candidate.text.push_str(word);

            if let Some(pos) = find_stop(&candidate.text, &self.params.stop) {
                candidate.text.truncate(pos.max(emitted));
                candidate.finish_reason = Some(FinishReason::Stop);
            } else if self.steps >= self.params.max_tokens {
                candidate.finish_reason = Some(FinishReason::Length);
            }
        }

        &self.outputs
    }

    pub fn is_finished(&self) -> bool {
        self.outputs.iter().all(CompletionOutput::finished)
    }
}

fn find_stop(text: &str, stop: &[String]) -> Option<usize> {
    stop.iter()
        .filter(|s| !s.is_empty())
        .filter_map(|s| text.find(s.as_str()))
        .min()
}

/// Runs a single generation job within a worker.
///
/// One cumulative [`RequestOutput`] is sent per step. The task exits early,
/// without a final output, if the job is cancelled or the output channel is
/// closed.
pub async fn handle_generate_request(worker_id: usize, job: GenerateJob, step_delay: Duration) {
    let GenerateJob {
        id,
        prompt,
        params,
        tx,
        cancelled,
        registration: _registration,
    } = job;

    if cancelled.is_cancelled() {
        tracing::debug!("Worker {worker_id} skipping {id}: aborted before start");
        return;
    }

    let mut replay = Replay::new(&prompt, &params);
    let mut steps = 0_usize;

    loop {
        let output = RequestOutput::new(id, prompt.as_str(), replay.step().to_vec());
        steps += 1;

        tokio::select! {
            biased;
            () = cancelled.cancelled() => {
                tracing::debug!("Worker {worker_id} aborted {id} after {steps} steps");
                return;
            }
            sent = tx.send(Ok(output)) => {
                if sent.is_err() {
                    tracing::debug!("Worker {worker_id} dropping {id}: receiver closed");
                    return;
                }
            }
        }

        if replay.is_finished() {
            tracing::trace!("Worker {worker_id} finished {id} in {steps} steps");
            return;
        }

        if step_delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::select! {
                biased;
                () = cancelled.cancelled() => {
                    tracing::debug!("Worker {worker_id} aborted {id} after {steps} steps");
                    return;
                }
                () = sleep(step_delay) => {}
            }
        }
    }
}
