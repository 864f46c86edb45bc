//! Calldata for the invoice manager's `repay` entry point, the on-chain half of a refund.

use crate::error::Result;
use crate::invoice::{Invoice, InvoiceId};
use ethers::abi::{self, Token};
use ethers::types::{Bytes, U256};
use ethers::utils::keccak256;

pub const REPAY_SIGNATURE: &str =
    "repay(bytes32,(address,address,uint256,uint256,(address,uint256,uint256)[]),bytes)";

/// The proof argument of `repay`. Which form a deployment expects is part of its verifier
/// version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepayProof {
    /// Receipt-proof bytes exactly as the oracle returned them.
    Raw(Bytes),
    /// `abi.encode(uint256 logIndex, bytes rawProof)`.
    Indexed { log_index: U256, proof: Bytes },
}

impl RepayProof {
    pub fn encode(&self) -> Bytes {
        match self {
            RepayProof::Raw(proof) => proof.clone(),
            RepayProof::Indexed { log_index, proof } => Bytes::from(abi::encode(&[
                Token::Uint(*log_index),
                Token::Bytes(proof.to_vec()),
            ])),
        }
    }
}

pub fn repay_selector() -> [u8; 4] {
    let hash = keccak256(REPAY_SIGNATURE.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// The invoice as the contract's `InvoiceWithRepayTokens` struct.
pub fn invoice_token(invoice: &Invoice) -> Token {
    let repay = invoice
        .repay_token_infos
        .iter()
        .map(|t| {
            Token::Tuple(vec![
                Token::Address(t.vault),
                Token::Uint(t.amount),
                Token::Uint(t.chain_id),
            ])
        })
        .collect();
    Token::Tuple(vec![
        Token::Address(invoice.account),
        Token::Address(invoice.paymaster),
        Token::Uint(invoice.nonce),
        Token::Uint(invoice.sponsor_chain_id),
        Token::Array(repay),
    ])
}

/// Full calldata for `repay(invoiceId, invoice, proof)`; the id is recomputed from the invoice.
pub fn encode_repay_call(invoice: &Invoice, proof: &RepayProof) -> Result<Bytes> {
    let id: InvoiceId = invoice.id()?;
    let args = abi::encode(&[
        Token::FixedBytes(id.0.as_bytes().to_vec()),
        invoice_token(invoice),
        Token::Bytes(proof.encode().to_vec()),
    ]);
    let mut out = repay_selector().to_vec();
    out.extend_from_slice(&args);
    Ok(Bytes::from(out))
}
