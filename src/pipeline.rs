//! Reconciliation entry points.
//!
//! [`reconcile`] is the pure core: classify, extract, assemble. [`Reconciler`] is the
//! context object a caller builds once (tables, sources, poll policy) and passes
//! around; it owns no global state.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::acquirer::{JobSource, PollPolicy, ProgressStatus, ResultAcquirer};
use crate::assembler::CanonicalAssembler;
use crate::cascade::{CompiledTables, FieldExtractionCascade};
use crate::error::{AcquireError, FetchError};
use crate::payload::PayloadView;
use crate::report::CanonicalDatasetReport;

/// Anything that serves dataset JSON by content identifier.
#[async_trait::async_trait]
pub trait ContentSource: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch(&self, cid: &str) -> Result<Value, FetchError>;
}

/// Turn one raw payload into a canonical report. Deterministic and side-effect free.
pub fn reconcile(tables: &CompiledTables, payload: &Value) -> CanonicalDatasetReport {
    let view = PayloadView::new(payload);
    debug!("Classified payload as {:?}", view.kind());

    let fields = FieldExtractionCascade::new(tables).extract_all(&view);
    CanonicalAssembler::new().assemble(&view, &fields)
}

/// One explorer entry.
#[derive(Debug, Clone, Serialize)]
pub struct ExploredDataset {
    pub cid: String,
    pub report: CanonicalDatasetReport,
}

pub struct Reconciler {
    tables: Arc<CompiledTables>,
    acquirer: ResultAcquirer,
    content: Arc<dyn ContentSource>,
}

impl Reconciler {
    pub fn new(
        tables: Arc<CompiledTables>,
        jobs: Arc<dyn JobSource>,
        content: Arc<dyn ContentSource>,
        policy: PollPolicy,
    ) -> Self {
        Self {
            acquirer: ResultAcquirer::new(jobs, policy, tables.clone()),
            tables,
            content,
        }
    }

    pub fn reconcile(&self, payload: &Value) -> CanonicalDatasetReport {
        reconcile(&self.tables, payload)
    }

    /// Poll an analysis job and reconcile its result.
    pub async fn report_for_job<F>(&self, job_id: &str, progress: F) -> Result<CanonicalDatasetReport, AcquireError>
    where
        F: Fn(ProgressStatus, f64) + Send + Sync,
    {
        self.acquirer.acquire(job_id, progress).await
    }

    /// Fetch one stored dataset and reconcile it. No polling; the content is immutable.
    pub async fn report_for_content(&self, cid: &str) -> Result<CanonicalDatasetReport, FetchError> {
        let payload = self.content.fetch(cid).await?;
        Ok(self.reconcile(&payload))
    }

    /// Reconcile a list of stored datasets one after another. Entries that fail to
    /// fetch are skipped.
    pub async fn explore(&self, cids: &[String]) -> Vec<ExploredDataset> {
        let mut explored = Vec::with_capacity(cids.len());

        for cid in cids {
            match self.report_for_content(cid).await {
                Ok(report) => explored.push(ExploredDataset {
                    cid: cid.clone(),
                    report,
                }),
                Err(e) => warn!("Skipping dataset {} from {}: {}", cid, self.content.name(), e),
            }
        }

        info!("Explored {} of {} datasets", explored.len(), cids.len());
        explored
    }
}
