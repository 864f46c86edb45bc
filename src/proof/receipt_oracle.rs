//! Oracle B: receipt proofs bound to a destination chain. Same transport as oracle A, but
//! with its own method names, a `dstChainId` on both legs, a wider status vocabulary and
//! proofs that are already hex.

use super::rpc::{opt_str_field, opt_u64_field, result_field, u64_field, RpcEndpoint};
use super::{ChainContext, JobId, ProofBackend, ProofJob, ProofStatus};
use crate::encoding::parse_bytes;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

pub const REQUEST_METHOD: &str = "receipt_requestProof";
pub const QUERY_METHOD: &str = "receipt_queryProof";

#[derive(Debug, Clone)]
pub struct ReceiptProofOracle {
    rpc: RpcEndpoint,
}

impl ReceiptProofOracle {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            rpc: RpcEndpoint::new(endpoint, api_key),
        }
    }
}

#[async_trait]
impl ProofBackend for ReceiptProofOracle {
    fn name(&self) -> &'static str {
        "receipt"
    }

    async fn request_proof(&self, ctx: &ChainContext) -> Result<JobId> {
        let body = self.rpc.call(REQUEST_METHOD, request_params(ctx)?).await?;
        JobId::from_json(result_field(&body)?)
    }

    async fn query_proof(&self, job_id: JobId) -> Result<ProofJob> {
        let body = self.rpc.call(QUERY_METHOD, json!([job_id.0])).await?;
        parse_job(&body)
    }
}

pub fn request_params(ctx: &ChainContext) -> Result<Value> {
    let dst = ctx.dst_chain_id.ok_or_else(|| {
        Error::Encoding("the receipt oracle needs a destination chain id".to_string())
    })?;
    Ok(json!([
        ctx.src_chain_id,
        dst,
        ctx.src_block_number,
        ctx.tx_index,
        ctx.log_index
    ]))
}

fn parse_status(s: &str) -> Result<ProofStatus> {
    match s.to_ascii_lowercase().as_str() {
        "initialized" | "generating" | "pending" => Ok(ProofStatus::Pending),
        "complete" | "ready" => Ok(ProofStatus::Complete),
        "error" | "failed" => Ok(ProofStatus::Error),
        _ => Err(Error::ResponseFormat(format!("unknown proof status {s:?}"))),
    }
}

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
    let proof = match opt_str_field(result, "proof") {
        None | Some("") | Some("0x") => None,
        Some(s) => Some(parse_bytes(s).map_err(|e| {
            Error::ResponseFormat(format!("proof is not hex: {e}"))
        })?),
    };
    let failure_reason = opt_str_field(result, "failureReason")
        .or_else(|| opt_str_field(body, "failureReason"))
        .map(str::to_string);

    Ok(ProofJob {
        job_id,
        status,
        chain_id: u64_field(result, "srcChainId")
            .or_else(|_| u64_field(result, "chainId"))?,
        dst_chain_id: Some(u64_field(result, "dstChainId")?),
        block_number: opt_u64_field(result, "blockNumber")?,
        receipt_index: u64_field(result, "receiptIndex")?,
        log_index: u64_field(result, "logIndex")?,
        created_at: u64_field(result, "createdAt")?,
        updated_at: u64_field(result, "updatedAt")?,
        proof,
        failure_reason,
    })
}
