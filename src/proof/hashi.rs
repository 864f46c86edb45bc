//! Hashi receipt proofs. Unlike the job-based oracles this is a single synchronous call, and
//! the prover can be self-hosted.

use super::rpc::{as_u64, result_field, RpcEndpoint};
use crate::encoding::{fmt_h256, parse_bytes};
use crate::error::{Error, Result};
use ethers::abi::{self, Token};
use ethers::types::{Bytes, H256, U256};
use serde_json::{json, Value};

pub const METHOD: &str = "hashi_getReceiptProof";
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:80/v1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptProof {
    pub chain_id: U256,
    pub block_number: U256,
    pub block_header: Bytes,
    pub ancestral_block_number: U256,
    pub ancestral_block_headers: Vec<Bytes>,
    pub receipt_proof: Vec<Bytes>,
    pub transaction_index: Bytes,
    pub log_index: U256,
}

#[derive(Debug, Clone)]
pub struct HashiClient {
    rpc: RpcEndpoint,
}

impl HashiClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            rpc: RpcEndpoint::new(endpoint, None),
        }
    }

    pub async fn get_receipt_proof(
        &self,
        chain_id: u64,
        log_index: u64,
        transaction_hash: H256,
    ) -> Result<ReceiptProof> {
        let params = json!({
            "chainId": chain_id,
            "logIndex": log_index,
            "transactionHash": fmt_h256(transaction_hash),
        });
        let body = self.rpc.call(METHOD, params).await?;
        let proof = parse_receipt_proof(result_field(&body)?)?;
        tracing::info!(
            chain_id,
            log_index,
            tx = %fmt_h256(transaction_hash),
            block = %proof.block_number,
            "hashi receipt proof fetched"
        );
        Ok(proof)
    }
}

/// Parses `result.proof`, the positional 8-tuple the prover returns.
pub fn parse_receipt_proof(result: &Value) -> Result<ReceiptProof> {
    let fields = result
        .get("proof")
        .and_then(|p| p.as_array())
        .ok_or_else(|| Error::ResponseFormat(format!("missing proof tuple: {result}")))?;
    if fields.len() != 8 {
        return Err(Error::ResponseFormat(format!(
            "proof tuple has {} fields, expected 8",
            fields.len()
        )));
    }

    let uint = |i: usize, name: &str| -> Result<U256> {
        as_u64(&fields[i])
            .map(U256::from)
            .ok_or_else(|| Error::ResponseFormat(format!("{name} is not an integer: {}", fields[i])))
    };
    let hex = |v: &Value, name: &str| -> Result<Bytes> {
        v.as_str()
            .ok_or_else(|| Error::ResponseFormat(format!("{name} is not a string: {v}")))
            .and_then(|s| {
                parse_bytes(s).map_err(|e| Error::ResponseFormat(format!("{name}: {e}")))
            })
    };
    let hex_list = |i: usize, name: &str| -> Result<Vec<Bytes>> {
        fields[i]
            .as_array()
            .ok_or_else(|| Error::ResponseFormat(format!("{name} is not an array")))?
            .iter()
            .map(|v| hex(v, name))
            .collect()
    };

    Ok(ReceiptProof {
        chain_id: uint(0, "chainId")?,
        block_number: uint(1, "blockNumber")?,
        block_header: hex(&fields[2], "blockHeader")?,
        ancestral_block_number: uint(3, "ancestralBlockNumber")?,
        ancestral_block_headers: hex_list(4, "ancestralBlockHeaders")?,
        receipt_proof: hex_list(5, "receiptProof")?,
        transaction_index: hex(&fields[6], "transactionIndex")?,
        log_index: uint(7, "logIndex")?,
    })
}

/// `abi.encode(ReceiptProof)` as the on-chain prover consumes it.
pub fn encode_receipt_proof(proof: &ReceiptProof) -> Bytes {
    let bytes_list = |list: &[Bytes]| {
        Token::Array(list.iter().map(|b| Token::Bytes(b.to_vec())).collect())
    };
    Bytes::from(abi::encode(&[Token::Tuple(vec![
        Token::Uint(proof.chain_id),
        Token::Uint(proof.block_number),
        Token::Bytes(proof.block_header.to_vec()),
        Token::Uint(proof.ancestral_block_number),
        bytes_list(&proof.ancestral_block_headers),
        bytes_list(&proof.receipt_proof),
        Token::Bytes(proof.transaction_index.to_vec()),
        Token::Uint(proof.log_index),
    ])]))
}
