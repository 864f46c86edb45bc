//! Error taxonomy shared by every component of the crate.
//!
//! Nothing is swallowed: encoding, signing, transport and store failures are all surfaced to
//! the caller as one of these variants and the caller decides on retries.

use crate::invoice::InvoiceId;
use ethers::types::Address;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A value does not fit its declared width, or a blob is malformed.
    /// Retrying with the same input always fails the same way.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The signer is unreachable, timed out, or rejected the digest.
    #[error("signing error: {0}")]
    Signing(String),

    /// HTTP/RPC failure talking to a proof oracle or a node.
    #[error("transport error: {0}")]
    Transport(String),

    /// An oracle response did not match the expected schema.
    #[error("response format error: {0}")]
    ResponseFormat(String),

    #[error("invoice {0} not found")]
    NotFound(InvoiceId),

    /// The sender-address simulation did not return an address.
    #[error(
        "the entry point address ({entry_point:?}) is not a valid entry point: {reason}"
    )]
    InvalidEntryPoint { entry_point: Address, reason: String },

    /// Persistence failure in the invoice store (I/O, unparsable store file).
    #[error("invoice store error: {0}")]
    Store(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
