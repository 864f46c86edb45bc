//! Canonical sponsorship hash: what the paymaster signer authorizes and what the on-chain
//! verifier recomputes.
//!
//! Field order and widths are a compatibility contract with a deployed verifier. Any drift
//! does not fail loudly: the signature simply never validates on-chain. Each deployed
//! verifier therefore pins one [`SponsorshipLayout`] through configuration.

use crate::error::Result;
use crate::tokens::TokenBlobs;
use crate::types::{PaymasterGasLimits, PendingOperation, ValidityWindow};
use ethers::abi::{self, Token};
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};

/// Tuple layout of the sponsorship preimage, one per verifier generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SponsorshipLayout {
    /// 11 fields: no paymaster gas word, token hash over `abi.encode(bytes,bytes)`.
    V1,
    /// 12 fields: paymaster gas word, token hash over `abi.encode(bytes,bytes)`.
    V2,
    /// 12 fields: paymaster gas word, token hash over `repay ‖ sponsor`.
    #[default]
    V3,
}

impl SponsorshipLayout {
    fn includes_gas_word(self) -> bool {
        !matches!(self, SponsorshipLayout::V1)
    }

    pub fn tokens_hash(self, tokens: &TokenBlobs) -> H256 {
        let preimage = match self {
            SponsorshipLayout::V1 | SponsorshipLayout::V2 => abi::encode(&[
                Token::Bytes(tokens.repay.to_vec()),
                Token::Bytes(tokens.sponsor.to_vec()),
            ]),
            SponsorshipLayout::V3 => [tokens.repay.as_ref(), tokens.sponsor.as_ref()].concat(),
        };
        H256(keccak256(preimage))
    }
}

/// Everything the hash binds besides the operation itself.
#[derive(Debug, Clone, Copy)]
pub struct SponsorshipScope<'a> {
    pub tokens: &'a TokenBlobs,
    pub chain_id: U256,
    pub paymaster: Address,
    pub window: ValidityWindow,
    pub gas: PaymasterGasLimits,
}

/// ABI-tuple-encodes the preimage in the layout's field order.
///
/// sender, nonce, initCodeHash, callDataHash, tokensHash, [paymasterGas], preVerificationGas,
/// gasFees, chainId, paymaster, validUntil, validAfter
pub fn encode_preimage(
    layout: SponsorshipLayout,
    op: &PendingOperation,
    scope: &SponsorshipScope<'_>,
) -> Result<Vec<u8>> {
    let mut fields = vec![
        Token::Address(op.sender),
        Token::Uint(op.nonce),
        Token::FixedBytes(op.init_code_hash.as_bytes().to_vec()),
        Token::FixedBytes(op.call_data_hash.as_bytes().to_vec()),
        Token::FixedBytes(layout.tokens_hash(scope.tokens).as_bytes().to_vec()),
    ];
    if layout.includes_gas_word() {
        fields.push(Token::FixedBytes(scope.gas.packed()?.as_bytes().to_vec()));
    }
    fields.extend([
        Token::Uint(op.pre_verification_gas),
        Token::FixedBytes(op.gas_fees.as_bytes().to_vec()),
        Token::Uint(scope.chain_id),
        Token::Address(scope.paymaster),
        Token::Uint(U256::from(scope.window.valid_until())),
        Token::Uint(U256::from(scope.window.valid_after())),
    ]);
    Ok(abi::encode(&fields))
}

/// keccak256 of [`encode_preimage`]. Pure and deterministic.
pub fn compute_hash(
    layout: SponsorshipLayout,
    op: &PendingOperation,
    scope: &SponsorshipScope<'_>,
) -> Result<H256> {
    Ok(H256(keccak256(encode_preimage(layout, op, scope)?)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::encoding::{parse_address, parse_h256};
    use crate::tokens::{repay_token, SponsorTokenInfo};
    use crate::types::UserOperation;
    use ethers::types::Bytes;

    pub(crate) const SENDER: &str = "0x499E26E7A97cB8F89bE5668770Fb022fdDbCa40d";
    pub(crate) const PAYMASTER: &str = "0xA1D5C22d20C41998026e32dEE0eaF9cbC56f7d6E";

    pub(crate) fn fixture_op() -> UserOperation {
        UserOperation {
            sender: parse_address(SENDER).unwrap(),
            nonce: U256::from_dec_str("32006186547098020862214455427072").unwrap(),
            call_data: Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]),
            call_gas_limit: U256::from(1_000_000u64),
            verification_gas_limit: U256::from(1_000_000u64),
            pre_verification_gas: U256::from(1_000_000u64),
            max_fee_per_gas: U256::from(2_000_000_000u64),
            max_priority_fee_per_gas: U256::from(1_000_000_000u64),
            ..Default::default()
        }
    }

    pub(crate) fn fixture_tokens() -> TokenBlobs {
        TokenBlobs::encode(
            &[repay_token("0x8e2048c85Eae2a4443408C284221B33e61906463", 500, 11155420).unwrap()],
            &[SponsorTokenInfo {
                token: parse_address("0xfF3311cd15aB091B00421B23BcB60df02EFD8db7").unwrap(),
                spender: parse_address(SENDER).unwrap(),
                amount: U256::from(500u64),
            }],
        )
        .unwrap()
    }

    pub(crate) fn fixture_window() -> ValidityWindow {
        ValidityWindow::new(1_699_000_000, 1_701_000_000).unwrap()
    }

    pub(crate) fn fixture_gas() -> PaymasterGasLimits {
        PaymasterGasLimits {
            verification_gas_limit: U256::from(100_000u64),
            post_op_gas_limit: U256::from(100_000u64),
        }
    }

    fn hash_with(layout: SponsorshipLayout, tokens: &TokenBlobs) -> H256 {
        let scope = SponsorshipScope {
            tokens,
            chain_id: U256::from(84532u64),
            paymaster: parse_address(PAYMASTER).unwrap(),
            window: fixture_window(),
            gas: fixture_gas(),
        };
        compute_hash(layout, &fixture_op().pending().unwrap(), &scope).unwrap()
    }

    #[test]
    fn pinned_vectors_per_layout() {
        let tokens = fixture_tokens();
        assert_eq!(
            hash_with(SponsorshipLayout::V1, &tokens),
            parse_h256("0xbdd89b84471670e330acdc0532d7b687c4008f8ce8926155a3ff2e0a32b406ce")
                .unwrap()
        );
        assert_eq!(
            hash_with(SponsorshipLayout::V2, &tokens),
            parse_h256("0xad2277569d80f779cb7aea3d14962105a048d35534b17abf49303d9276adb011")
                .unwrap()
        );
        assert_eq!(
            hash_with(SponsorshipLayout::V3, &tokens),
            parse_h256("0x90de14f8896dcb36ae69421fb8959698d0ddbf3d9b4ac39638418c13d12b58da")
                .unwrap()
        );
    }

    #[test]
    fn hash_is_deterministic() {
        let tokens = fixture_tokens();
        assert_eq!(
            hash_with(SponsorshipLayout::V3, &tokens),
            hash_with(SponsorshipLayout::V3, &tokens)
        );
    }

    #[test]
    fn preimage_word_count_follows_layout() {
        let tokens = fixture_tokens();
        let scope = SponsorshipScope {
            tokens: &tokens,
            chain_id: U256::from(84532u64),
            paymaster: parse_address(PAYMASTER).unwrap(),
            window: fixture_window(),
            gas: fixture_gas(),
        };
        let op = fixture_op().pending().unwrap();
        let v1 = encode_preimage(SponsorshipLayout::V1, &op, &scope).unwrap();
        let v3 = encode_preimage(SponsorshipLayout::V3, &op, &scope).unwrap();
        assert_eq!(v1.len(), 11 * 32);
        assert_eq!(v3.len(), 12 * 32);
        // validAfter is the last word.
        assert_eq!(
            U256::from_big_endian(&v3[11 * 32..]),
            U256::from(1_699_000_000u64)
        );
    }

    #[test]
    fn changing_the_operation_changes_the_hash() {
        let tokens = fixture_tokens();
        let scope = SponsorshipScope {
            tokens: &tokens,
            chain_id: U256::from(84532u64),
            paymaster: parse_address(PAYMASTER).unwrap(),
            window: fixture_window(),
            gas: fixture_gas(),
        };
        let base = fixture_op();
        let mut bumped = base.clone();
        bumped.nonce += U256::one();
        let a = compute_hash(SponsorshipLayout::V3, &base.pending().unwrap(), &scope).unwrap();
        let b = compute_hash(SponsorshipLayout::V3, &bumped.pending().unwrap(), &scope).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn layout_is_selected_by_version_tag() {
        let layout: SponsorshipLayout = serde_json::from_str("\"v2\"").unwrap();
        assert_eq!(layout, SponsorshipLayout::V2);
        assert_eq!(SponsorshipLayout::default(), SponsorshipLayout::V3);
    }
}
