//! Bounded polling of the asynchronous analysis job.
//!
//! The loop is an explicit state machine, `Polling -> Succeeded | Exhausted`, whose
//! only state is the attempt number and the elapsed wait. Fetch errors and
//! incomplete payloads both count as "not ready yet".

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::cascade::CompiledTables;
use crate::error::{AcquireError, FetchError};
use crate::pipeline::reconcile;
use crate::report::CanonicalDatasetReport;

/// Anything that can report the status payload of an analysis job.
#[async_trait::async_trait]
pub trait JobSource: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch_status(&self, job_id: &str) -> Result<Value, FetchError>;
}

/// What to do when the poll budget runs out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Return the synthetic fallback report.
    #[default]
    Synthesize,
    /// Return [`AcquireError::Exhausted`].
    Fail,
}

impl FromStr for FallbackPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "synthesize" | "synthetic" => Ok(Self::Synthesize),
            "fail" | "error" => Ok(Self::Fail),
            other => Err(format!("expected 'synthesize' or 'fail', got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    pub fallback: FallbackPolicy,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 12,
            fallback: FallbackPolicy::Synthesize,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Processing,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Polling { attempt: u32, elapsed: Duration },
    Succeeded { attempts: u32, elapsed: Duration },
    Exhausted { attempts: u32, elapsed: Duration },
}

impl PollState {
    pub fn start() -> Self {
        PollState::Polling {
            attempt: 1,
            elapsed: Duration::ZERO,
        }
    }

    pub fn succeed(self) -> Self {
        match self {
            PollState::Polling { attempt, elapsed } => PollState::Succeeded {
                attempts: attempt,
                elapsed,
            },
            done => done,
        }
    }

    /// The current attempt came back empty. Either schedule another one (after
    /// `policy.interval`) or give up.
    pub fn retry(self, policy: &PollPolicy) -> Self {
        match self {
            PollState::Polling { attempt, elapsed } if attempt >= policy.max_attempts => {
                PollState::Exhausted {
                    attempts: attempt,
                    elapsed,
                }
            }
            PollState::Polling { attempt, elapsed } => PollState::Polling {
                attempt: attempt + 1,
                elapsed: elapsed + policy.interval,
            },
            done => done,
        }
    }

    /// Progress shown while this state is current, 0-100.
    pub fn progress(&self, policy: &PollPolicy) -> f64 {
        match self {
            PollState::Polling { attempt, .. } => {
                let pct = *attempt as f64 / policy.max_attempts.max(1) as f64 * 100.0;
                pct.min(90.0)
            }
            PollState::Succeeded { .. } => 100.0,
            PollState::Exhausted { .. } => 90.0,
        }
    }
}

/// True when the payload carries at least one non-empty results block.
pub fn has_real_data(payload: &Value) -> bool {
    ["results", "analysis", "dataset_info", "file_health"]
        .iter()
        .any(|key| {
            payload
                .get(key)
                .and_then(Value::as_object)
                .map(|o| !o.is_empty())
                .unwrap_or(false)
        })
}

pub struct ResultAcquirer {
    source: Arc<dyn JobSource>,
    policy: PollPolicy,
    tables: Arc<CompiledTables>,
}

impl ResultAcquirer {
    pub fn new(source: Arc<dyn JobSource>, policy: PollPolicy, tables: Arc<CompiledTables>) -> Self {
        Self {
            source,
            policy,
            tables,
        }
    }

    /// Poll until the job yields real data, then reconcile it.
    ///
    /// Errors only for a non-retryable failure on the first attempt, or on
    /// exhaustion under [`FallbackPolicy::Fail`].
    pub async fn acquire<F>(&self, job_id: &str, progress: F) -> Result<CanonicalDatasetReport, AcquireError>
    where
        F: Fn(ProgressStatus, f64) + Send + Sync,
    {
        let run_id = uuid::Uuid::new_v4();
        let span = info_span!("acquire", job_id = %job_id, run_id = %run_id);
        self.poll(job_id, &progress).instrument(span).await
    }

    async fn poll<F>(&self, job_id: &str, progress: &F) -> Result<CanonicalDatasetReport, AcquireError>
    where
        F: Fn(ProgressStatus, f64) + Send + Sync,
    {
        info!(
            "Polling {} for analysis {} (every {:?}, up to {} attempts)",
            self.source.name(),
            job_id,
            self.policy.interval,
            self.policy.max_attempts
        );

        let mut state = PollState::start();
        let mut last_error: Option<String> = None;

        let (attempts, elapsed) = loop {
            let attempt = match state {
                PollState::Polling { attempt, .. } => attempt,
                PollState::Succeeded { attempts, elapsed } | PollState::Exhausted { attempts, elapsed } => {
                    break (attempts, elapsed);
                }
            };
            progress(ProgressStatus::Processing, state.progress(&self.policy));

            match self.source.fetch_status(job_id).await {
                Ok(payload) if has_real_data(&payload) => {
                    state = state.succeed();
                    info!("Analysis {} ready after {} attempt(s)", job_id, attempt);
                    progress(ProgressStatus::Completed, state.progress(&self.policy));
                    return Ok(reconcile(&self.tables, &payload));
                }
                Ok(_) => {
                    debug!("Attempt {}: analysis {} still processing", attempt, job_id);
                }
                Err(e) if attempt == 1 && !e.is_retryable() => {
                    warn!("Analysis {} request rejected: {}", job_id, e);
                    return Err(AcquireError::Request(e));
                }
                Err(e) => {
                    warn!("Attempt {}: fetching analysis {} failed: {}", attempt, job_id, e);
                    last_error = Some(e.to_string());
                }
            }

            state = state.retry(&self.policy);
            if matches!(state, PollState::Polling { .. }) {
                tokio::time::sleep(self.policy.interval).await;
            }
        };

        match self.policy.fallback {
            FallbackPolicy::Synthesize => {
                warn!(
                    "Analysis {} not ready after {} attempts ({:?}); returning synthetic report",
                    job_id, attempts, elapsed
                );
                progress(ProgressStatus::Completed, 100.0);
                Ok(CanonicalDatasetReport::synthetic_fallback())
            }
            FallbackPolicy::Fail => Err(AcquireError::Exhausted {
                job_id: job_id.to_string(),
                attempts,
                last_error,
            }),
        }
    }
}
