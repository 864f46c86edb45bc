use crate::encoding::{concat, fixed_width_be, fmt_address, fmt_bytes, fmt_u256};
use crate::error::{Error, Result};
use crate::sponsorship::{compute_hash, SponsorshipLayout, SponsorshipScope};
use crate::tokens::{RepayTokenInfo, SponsorTokenInfo, TokenBlobs};
use crate::types::{PaymasterGasLimits, UserOperation, ValidityWindow};
use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, H256, U256};
use serde_json::Value;
use std::time::Duration;

/// Width of each `uint48` timestamp at the head of paymaster data.
const TIMESTAMP_LEN: usize = 6;

/// Gas limits reported with stub data, used only for estimation.
pub const STUB_GAS_LIMIT: u64 = 1_000_000;

pub const DEFAULT_SIGNING_TIMEOUT: Duration = Duration::from_secs(10);

/// Signs a raw 32-byte digest.
///
/// Implementations may block on a remote signing service or hardware; callers bound the call
/// with a timeout (see [`authorize`]).
#[async_trait]
pub trait DigestSigner: Send + Sync {
    async fn sign_digest(&self, digest: H256) -> Result<Bytes>;
}

/// EIP-191 personal-sign over the 32 digest bytes, which is what the verifier recovers.
#[async_trait]
impl DigestSigner for LocalWallet {
    async fn sign_digest(&self, digest: H256) -> Result<Bytes> {
        let sig = self
            .sign_message(digest.as_bytes())
            .await
            .map_err(|e| Error::Signing(e.to_string()))?;
        Ok(Bytes::from(sig.to_vec()))
    }
}

/// Signs `hash`, mapping a timeout or an empty signature to [`Error::Signing`].
///
/// Never retried here: a failed attempt is fatal to this sponsorship.
pub async fn authorize<S: DigestSigner + ?Sized>(
    signer: &S,
    hash: H256,
    timeout: Duration,
) -> Result<Bytes> {
    let sig = tokio::time::timeout(timeout, signer.sign_digest(hash))
        .await
        .map_err(|_| Error::Signing(format!("signer did not answer within {timeout:?}")))??;
    if sig.is_empty() {
        return Err(Error::Signing("signer returned an empty signature".to_string()));
    }
    Ok(sig)
}

/// `validUntil(6) ‖ validAfter(6) ‖ repayBlob ‖ sponsorBlob ‖ signature`.
///
/// The verifier slices this field by field, so the order is part of the contract.
pub fn build_paymaster_data(
    window: ValidityWindow,
    tokens: &TokenBlobs,
    signature: &[u8],
) -> Result<Bytes> {
    let valid_until = fixed_width_be(U256::from(window.valid_until()), TIMESTAMP_LEN)?;
    let valid_after = fixed_width_be(U256::from(window.valid_after()), TIMESTAMP_LEN)?;
    Ok(Bytes::from(concat(&[
        &valid_until,
        &valid_after,
        &tokens.repay,
        &tokens.sponsor,
        signature,
    ])))
}

/// Splits paymaster data back into its parts, walking the layout the verifier walks.
pub fn split_paymaster_data(data: &[u8]) -> Result<(ValidityWindow, TokenBlobs, Bytes)> {
    let truncated = || Error::Encoding(format!("paymaster data truncated ({} bytes)", data.len()));
    let read_u48 = |at: usize| -> Result<u64> {
        let bytes = data.get(at..at + TIMESTAMP_LEN).ok_or_else(truncated)?;
        Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    };
    let valid_until = read_u48(0)?;
    let valid_after = read_u48(TIMESTAMP_LEN)?;

    let repay_start = 2 * TIMESTAMP_LEN;
    let repay_count = *data.get(repay_start).ok_or_else(truncated)? as usize;
    let sponsor_start = repay_start + 1 + repay_count * (20 + 32 + 32);
    let sponsor_count = *data.get(sponsor_start).ok_or_else(truncated)? as usize;
    let sig_start = sponsor_start + 1 + sponsor_count * (20 + 20 + 32);
    if data.len() < sig_start {
        return Err(truncated());
    }

    let tokens = TokenBlobs {
        repay: Bytes::from(data[repay_start..sponsor_start].to_vec()),
        sponsor: Bytes::from(data[sponsor_start..sig_start].to_vec()),
    };
    let window = ValidityWindow::new(valid_after, valid_until)?;
    Ok((window, tokens, Bytes::from(data[sig_start..].to_vec())))
}

/// ERC-7677 style result handed back to the relay layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymasterData {
    pub paymaster: Address,
    pub paymaster_data: Bytes,
    pub paymaster_verification_gas_limit: U256,
    pub paymaster_post_op_gas_limit: U256,
}

impl PaymasterData {
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "paymaster": ethers::utils::to_checksum(&self.paymaster, None),
            "paymasterData": fmt_bytes(&self.paymaster_data),
            "paymasterVerificationGasLimit": fmt_u256(self.paymaster_verification_gas_limit),
            "paymasterPostOpGasLimit": fmt_u256(self.paymaster_post_op_gas_limit),
        })
    }
}

/// A paymaster deployment on one chain plus the key that authorizes sponsorships for it.
#[derive(Debug, Clone)]
pub struct Paymaster<S> {
    signer: S,
    address: Address,
    chain_id: U256,
    layout: SponsorshipLayout,
    signing_timeout: Duration,
}

impl<S: DigestSigner> Paymaster<S> {
    pub fn new(signer: S, address: Address, chain_id: u64, layout: SponsorshipLayout) -> Self {
        Self {
            signer,
            address,
            chain_id: U256::from(chain_id),
            layout,
            signing_timeout: DEFAULT_SIGNING_TIMEOUT,
        }
    }

    pub fn with_signing_timeout(mut self, timeout: Duration) -> Self {
        self.signing_timeout = timeout;
        self
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Hashes, signs and packs a sponsorship for `op`.
    pub async fn sponsor(
        &self,
        op: &UserOperation,
        repay: &[RepayTokenInfo],
        sponsor: &[SponsorTokenInfo],
        window: ValidityWindow,
    ) -> Result<PaymasterData> {
        self.sponsor_with_gas(op, repay, sponsor, window, PaymasterGasLimits::for_op(op))
            .await
    }

    /// Same payload shape with fixed, generous gas limits for `eth_estimateUserOperationGas`.
    pub async fn stub_data(
        &self,
        op: &UserOperation,
        repay: &[RepayTokenInfo],
        sponsor: &[SponsorTokenInfo],
        window: ValidityWindow,
    ) -> Result<PaymasterData> {
        let gas = PaymasterGasLimits {
            verification_gas_limit: U256::from(STUB_GAS_LIMIT),
            post_op_gas_limit: U256::from(STUB_GAS_LIMIT),
        };
        self.sponsor_with_gas(op, repay, sponsor, window, gas).await
    }

    async fn sponsor_with_gas(
        &self,
        op: &UserOperation,
        repay: &[RepayTokenInfo],
        sponsor: &[SponsorTokenInfo],
        window: ValidityWindow,
        gas: PaymasterGasLimits,
    ) -> Result<PaymasterData> {
        let pending = op.pending()?;
        let tokens = TokenBlobs::encode(repay, sponsor)?;
        let scope = SponsorshipScope {
            tokens: &tokens,
            chain_id: self.chain_id,
            paymaster: self.address,
            window,
            gas,
        };
        let hash = compute_hash(self.layout, &pending, &scope)?;
        tracing::debug!(
            sender = %fmt_address(op.sender),
            nonce = %op.nonce,
            layout = ?self.layout,
            hash = ?hash,
            "signing sponsorship"
        );

        let signature = authorize(&self.signer, hash, self.signing_timeout).await?;
        let paymaster_data = build_paymaster_data(window, &tokens, &signature)?;

        tracing::info!(
            sender = %fmt_address(op.sender),
            paymaster = %fmt_address(self.address),
            valid_until = window.valid_until(),
            "sponsorship authorized"
        );

        Ok(PaymasterData {
            paymaster: self.address,
            paymaster_data,
            paymaster_verification_gas_limit: gas.verification_gas_limit,
            paymaster_post_op_gas_limit: gas.post_op_gas_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::parse_address;
    use crate::sponsorship::tests::{fixture_op, fixture_window, PAYMASTER, SENDER};
    use crate::tokens::{decode_repay_tokens, decode_sponsor_tokens, repay_token};
    use ethers::types::Signature;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // anvil account #0
    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    struct FixedSigner {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DigestSigner for FixedSigner {
        async fn sign_digest(&self, _digest: H256) -> Result<Bytes> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(Bytes::from(vec![0x5a; 65]))
        }
    }

    struct RejectingSigner;

    #[async_trait]
    impl DigestSigner for RejectingSigner {
        async fn sign_digest(&self, _digest: H256) -> Result<Bytes> {
            Err(Error::Signing("digest rejected by policy".to_string()))
        }
    }

    struct StalledSigner;

    #[async_trait]
    impl DigestSigner for StalledSigner {
        async fn sign_digest(&self, _digest: H256) -> Result<Bytes> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Bytes::from(vec![1u8; 65]))
        }
    }

    fn repay() -> Vec<RepayTokenInfo> {
        vec![repay_token("0x8e2048c85Eae2a4443408C284221B33e61906463", 500, 11155420).unwrap()]
    }

    fn sponsor() -> Vec<SponsorTokenInfo> {
        vec![SponsorTokenInfo {
            token: parse_address("0xfF3311cd15aB091B00421B23BcB60df02EFD8db7").unwrap(),
            spender: parse_address(SENDER).unwrap(),
            amount: U256::from(500u64),
        }]
    }

    #[test]
    fn paymaster_data_layout() {
        let tokens = TokenBlobs::encode(&repay(), &sponsor()).unwrap();
        let sig = vec![0xee; 65];
        let data = build_paymaster_data(fixture_window(), &tokens, &sig).unwrap();

        assert_eq!(hex::encode(&data[..6]), "000065633340"); // 1_701_000_000
        assert_eq!(hex::encode(&data[6..12]), "00006544aec0"); // 1_699_000_000
        assert_eq!(data.len(), 12 + tokens.repay.len() + tokens.sponsor.len() + 65);

        let (window, blobs, signature) = split_paymaster_data(&data).unwrap();
        assert_eq!(window, fixture_window());
        assert_eq!(decode_repay_tokens(&blobs.repay).unwrap(), repay());
        assert_eq!(decode_sponsor_tokens(&blobs.sponsor).unwrap(), sponsor());
        assert_eq!(signature.to_vec(), sig);
    }

    #[test]
    fn split_rejects_truncated_data() {
        let tokens = TokenBlobs::encode(&repay(), &sponsor()).unwrap();
        let data = build_paymaster_data(fixture_window(), &tokens, &[]).unwrap();
        assert!(split_paymaster_data(&data[..data.len() - 1]).is_err());
        assert!(split_paymaster_data(&data[..5]).is_err());
    }

    #[tokio::test]
    async fn sponsor_signs_once_and_reports_gas() {
        let signer = FixedSigner {
            calls: AtomicUsize::new(0),
        };
        let pm = Paymaster::new(
            signer,
            parse_address(PAYMASTER).unwrap(),
            84532,
            SponsorshipLayout::V3,
        );
        let out = pm
            .sponsor(&fixture_op(), &repay(), &sponsor(), fixture_window())
            .await
            .unwrap();

        assert_eq!(pm.signer.calls.load(Ordering::Relaxed), 1);
        assert_eq!(out.paymaster, pm.address());
        assert_eq!(out.paymaster_post_op_gas_limit, U256::from(100_000u64));
        assert!(out.paymaster_data.ends_with(&[0x5a; 65]));

        let json = out.to_json();
        assert_eq!(json["paymaster"], "0xA1D5C22d20C41998026e32dEE0eaF9cbC56f7d6E");
        assert_eq!(json["paymasterVerificationGasLimit"], "0x186a0");
    }

    #[tokio::test]
    async fn stub_data_uses_fixed_gas() {
        let pm = Paymaster::new(
            FixedSigner {
                calls: AtomicUsize::new(0),
            },
            parse_address(PAYMASTER).unwrap(),
            84532,
            SponsorshipLayout::V3,
        );
        let out = pm
            .stub_data(&fixture_op(), &repay(), &sponsor(), fixture_window())
            .await
            .unwrap();
        assert_eq!(
            out.paymaster_verification_gas_limit,
            U256::from(STUB_GAS_LIMIT)
        );
    }

    #[tokio::test]
    async fn signer_rejection_is_fatal() {
        let pm = Paymaster::new(
            RejectingSigner,
            parse_address(PAYMASTER).unwrap(),
            84532,
            SponsorshipLayout::V3,
        );
        let err = pm
            .sponsor(&fixture_op(), &repay(), &sponsor(), fixture_window())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Signing(_)));
    }

    #[tokio::test]
    async fn signer_timeout_maps_to_signing_error() {
        let err = authorize(&StalledSigner, H256::zero(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Signing(_)));
    }

    #[tokio::test]
    async fn local_wallet_signature_recovers_to_signer() {
        let wallet: LocalWallet = KEY.parse().unwrap();
        let digest = H256::repeat_byte(0x42);
        let sig = authorize(&wallet, digest, DEFAULT_SIGNING_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(sig.len(), 65);

        let sig = Signature::try_from(sig.as_ref()).unwrap();
        assert_eq!(sig.recover(digest.as_bytes()).unwrap(), wallet.address());
    }
}
