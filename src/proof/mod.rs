//! Receipt/log proof oracles.
//!
//! A proof is produced asynchronously by the backend: [`ProofClient::request_proof`] submits a
//! job and [`ProofClient::poll_proof`] reports its progress. Jobs move
//! `Pending -> Complete | Error`; both outcomes are terminal and a terminal job is answered
//! from memory on re-poll without another backend round trip.
//!
//! Nothing here retries or sleeps. Poll cadence and give-up policy belong to the caller.

pub mod hashi;
pub mod log_oracle;
pub mod receipt_oracle;
pub mod rpc;

use crate::error::{Error, Result};
use async_trait::async_trait;
use ethers::types::Bytes;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::Mutex;

pub use log_oracle::LogProofOracle;
pub use receipt_oracle::ReceiptProofOracle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl JobId {
    pub(crate) fn from_json(v: &serde_json::Value) -> Result<Self> {
        rpc::as_u64(v)
            .map(JobId)
            .ok_or_else(|| Error::ResponseFormat(format!("invalid job id: {v}")))
    }
}

/// Where the event to prove lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainContext {
    pub src_chain_id: u64,
    /// Only the receipt oracle needs it.
    pub dst_chain_id: Option<u64>,
    pub src_block_number: u64,
    pub tx_index: u64,
    pub log_index: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofStatus {
    Pending,
    Complete,
    Error,
}

impl ProofStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ProofStatus::Pending)
    }
}

/// A job snapshot, normalized across backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofJob {
    pub job_id: JobId,
    pub status: ProofStatus,
    pub chain_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst_chain_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    pub receipt_index: u64,
    pub log_index: u64,
    pub created_at: u64,
    pub updated_at: u64,
    /// Decoded proof bytes; present exactly when `status` is `Complete`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof: Option<Bytes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// One oracle's wire protocol.
#[async_trait]
pub trait ProofBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn request_proof(&self, ctx: &ChainContext) -> Result<JobId>;

    async fn query_proof(&self, job_id: JobId) -> Result<ProofJob>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofOracleKind {
    /// Oracle A: log proofs, base64 proof payloads.
    Log,
    /// Oracle B: receipt proofs with a destination chain, hex proof payloads.
    Receipt,
}

pub struct ProofClient {
    backend: Box<dyn ProofBackend>,
    terminal: Mutex<HashMap<JobId, ProofJob>>,
}

impl fmt::Debug for ProofClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProofClient")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl ProofClient {
    pub fn new<B: ProofBackend + 'static>(backend: B) -> Self {
        Self {
            backend: Box::new(backend),
            terminal: Mutex::new(HashMap::new()),
        }
    }

    pub fn for_oracle(kind: ProofOracleKind, endpoint: &str, api_key: Option<String>) -> Self {
        match kind {
            ProofOracleKind::Log => Self::new(LogProofOracle::new(endpoint, api_key)),
            ProofOracleKind::Receipt => Self::new(ReceiptProofOracle::new(endpoint, api_key)),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn request_proof(&self, ctx: &ChainContext) -> Result<JobId> {
        let job_id = self.backend.request_proof(ctx).await?;
        tracing::info!(
            oracle = self.backend.name(),
            job_id = %job_id,
            src_chain_id = ctx.src_chain_id,
            block = ctx.src_block_number,
            tx_index = ctx.tx_index,
            log_index = ctx.log_index,
            "proof requested"
        );
        Ok(job_id)
    }

    pub async fn poll_proof(&self, job_id: JobId) -> Result<ProofJob> {
        if let Some(job) = self.terminal.lock().await.get(&job_id) {
            return Ok(job.clone());
        }

        let job = validate(job_id, self.backend.query_proof(job_id).await?)?;
        tracing::debug!(
            oracle = self.backend.name(),
            job_id = %job_id,
            status = ?job.status,
            "proof polled"
        );

        if job.status.is_terminal() {
            // A concurrent poll may have landed first; keep the first terminal snapshot.
            let mut terminal = self.terminal.lock().await;
            return Ok(terminal.entry(job_id).or_insert(job).clone());
        }
        Ok(job)
    }

    /// Polls every job once, at most `concurrency` at a time. Results come back in input
    /// order.
    pub async fn poll_many(
        &self,
        job_ids: &[JobId],
        concurrency: usize,
    ) -> Vec<(JobId, Result<ProofJob>)> {
        let mut results: Vec<(usize, JobId, Result<ProofJob>)> =
            stream::iter(job_ids.iter().copied().enumerate())
                .map(|(i, id)| async move { (i, id, self.poll_proof(id).await) })
                .buffer_unordered(concurrency.max(1))
                .collect()
                .await;
        results.sort_by_key(|(i, _, _)| *i);
        results.into_iter().map(|(_, id, r)| (id, r)).collect()
    }
}

fn validate(asked: JobId, mut job: ProofJob) -> Result<ProofJob> {
    if job.job_id != asked {
        return Err(Error::ResponseFormat(format!(
            "asked for job {asked}, backend answered job {}",
            job.job_id
        )));
    }
    match job.status {
        ProofStatus::Complete => {
            if job.proof.as_ref().map_or(true, |p| p.is_empty()) {
                return Err(Error::ResponseFormat(format!(
                    "job {asked} is complete but carries no proof"
                )));
            }
        }
        ProofStatus::Error => {
            job.proof = None;
            if job.failure_reason.is_none() {
                job.failure_reason = Some("backend reported failure without a reason".to_string());
            }
        }
        ProofStatus::Pending => job.proof = None,
    }
    Ok(job)
}
