//! Oracle A: log proofs addressed by `(chain, block, tx index, log index)`.

use super::rpc::{opt_str_field, opt_u64_field, result_field, u64_field, RpcEndpoint};
use super::{ChainContext, JobId, ProofBackend, ProofJob, ProofStatus};
use crate::error::{Error, Result};
use async_trait::async_trait;
use base64::Engine as _;
use ethers::types::Bytes;
use serde_json::{json, Value};

pub const REQUEST_METHOD: &str = "log_requestProof";
pub const QUERY_METHOD: &str = "log_queryProof";

#[derive(Debug, Clone)]
pub struct LogProofOracle {
    rpc: RpcEndpoint,
}

impl LogProofOracle {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            rpc: RpcEndpoint::new(endpoint, api_key),
        }
    }
}

#[async_trait]
impl ProofBackend for LogProofOracle {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn request_proof(&self, ctx: &ChainContext) -> Result<JobId> {
        let body = self.rpc.call(REQUEST_METHOD, request_params(ctx)).await?;
        JobId::from_json(result_field(&body)?)
    }

    async fn query_proof(&self, job_id: JobId) -> Result<ProofJob> {
        let body = self.rpc.call(QUERY_METHOD, json!([job_id.0])).await?;
        parse_job(&body)
    }
}

pub fn request_params(ctx: &ChainContext) -> Value {
    json!([
        ctx.src_chain_id,
        ctx.src_block_number,
        ctx.tx_index,
        ctx.log_index
    ])
}

fn parse_status(s: &str) -> Result<ProofStatus> {
    match s {
        "pending" => Ok(ProofStatus::Pending),
        "complete" => Ok(ProofStatus::Complete),
        "error" => Ok(ProofStatus::Error),
        other => Err(Error::ResponseFormat(format!("unknown proof status {other:?}"))),
    }
}

/// Base64 on the wire; an empty string means "no proof yet".
fn decode_proof(s: &str) -> Result<Option<Bytes>> {
    if s.is_empty() {
        return Ok(None);
    }
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map(|b| Some(Bytes::from(b)))
        .map_err(|e| Error::ResponseFormat(format!("proof is not base64: {e}")))
}

/// Parses a `log_queryProof` envelope. `failureReason` is read from `result` or, failing
/// that, from the envelope itself, where some deployments put it.
pub fn parse_job(body: &Value) -> Result<ProofJob> {
    let result = result_field(body)?;
    if !result.is_object() {
        return Err(Error::ResponseFormat(format!(
            "{QUERY_METHOD} result is not an object: {result}"
        )));
    }

    let status = opt_str_field(result, "status")
        .ok_or_else(|| Error::ResponseFormat("missing status".to_string()))
        .and_then(parse_status)?;
    let job_id = result
        .get("jobID")
        .or_else(|| result.get("jobId"))
        .ok_or_else(|| Error::ResponseFormat("missing jobID".to_string()))
        .and_then(JobId::from_json)?;
    let proof = opt_str_field(result, "proof")
        .map(decode_proof)
        .transpose()?
        .flatten();
    let failure_reason = opt_str_field(result, "failureReason")
        .or_else(|| opt_str_field(body, "failureReason"))
        .map(str::to_string);

    Ok(ProofJob {
        job_id,
        status,
        chain_id: u64_field(result, "chainId")?,
        dst_chain_id: None,
        block_number: opt_u64_field(result, "blockNumber")?,
        receipt_index: u64_field(result, "receiptIndex")?,
        log_index: u64_field(result, "logIndex")?,
        created_at: u64_field(result, "createdAt")?,
        updated_at: u64_field(result, "updatedAt")?,
        proof,
        failure_reason,
    })
}
