//! Cross-chain paymaster sponsorship.
//!
//! A paymaster on one chain sponsors an ERC-4337 user operation and records an invoice; the
//! user's funds locked in a vault on another chain repay it once a receipt proof of the
//! sponsorship is available. This crate covers the off-chain half: sponsorship hashing and
//! signing, invoice identity and storage, proof-oracle clients and the settlement calldata.

pub mod config;
pub mod encoding;
pub mod error;
pub mod invoice;
pub mod paymaster;
pub mod proof;
pub mod sender;
pub mod settlement;
pub mod sponsorship;
pub mod store;
pub mod tokens;
pub mod types;

pub use error::{Error, Result};
pub use invoice::{compute_invoice_id, Invoice, InvoiceId};
pub use paymaster::{authorize, DigestSigner, Paymaster, PaymasterData};
pub use proof::{ChainContext, JobId, ProofClient, ProofJob, ProofStatus};
pub use sender::resolve_sender_address;
pub use sponsorship::{compute_hash, SponsorshipLayout};
pub use store::{InvoiceStore, JsonFileStore, MemoryStore};
pub use tokens::{RepayTokenInfo, SponsorTokenInfo, TokenBlobs};
pub use types::{PendingOperation, UserOperation, ValidityWindow};
