//! Invoices: the record of a sponsorship debt, refunded once a receipt proof exists.
//!
//! The identifier is keccak256 over the *packed* encoding
//! `account(20) ‖ paymaster(20) ‖ nonce(32) ‖ sponsorChainId(32) ‖ repayTokenBlob`, which is
//! how the invoice manager contract computes it. This deliberately differs from the ABI tuple
//! encoding of the sponsorship hash.

use crate::encoding::{concat, fmt_h256, parse_h256, u256_word};
use crate::error::{Error, Result};
use crate::tokens::{encode_repay_tokens, RepayTokenInfo};
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    #[serde(with = "serde_checksum")]
    pub account: Address,
    #[serde(with = "serde_checksum")]
    pub paymaster: Address,
    #[serde(with = "serde_dec")]
    pub nonce: U256,
    #[serde(with = "serde_dec")]
    pub sponsor_chain_id: U256,
    pub repay_token_infos: Vec<RepayTokenInfo>,
}

impl Invoice {
    /// The packed preimage of [`Invoice::id`].
    pub fn packed(&self) -> Result<Vec<u8>> {
        let repay = encode_repay_tokens(&self.repay_token_infos)?;
        Ok(concat(&[
            self.account.as_bytes(),
            self.paymaster.as_bytes(),
            &u256_word(self.nonce),
            &u256_word(self.sponsor_chain_id),
            &repay,
        ]))
    }

    pub fn id(&self) -> Result<InvoiceId> {
        compute_invoice_id(self)
    }
}

pub fn compute_invoice_id(invoice: &Invoice) -> Result<InvoiceId> {
    Ok(InvoiceId(H256(keccak256(invoice.packed()?))))
}

/// 32-byte invoice key, rendered as `0x` + 64 lowercase hex chars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InvoiceId(pub H256);

impl fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&fmt_h256(self.0))
    }
}

impl FromStr for InvoiceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let digits = s
            .strip_prefix("0x")
            .ok_or_else(|| Error::Encoding(format!("invoice id {s} must start with 0x")))?;
        if digits.len() != 64 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::Encoding(format!(
                "invoice id {s} must be a 32-byte hex string"
            )));
        }
        Ok(InvoiceId(parse_h256(s)?))
    }
}

impl Serialize for InvoiceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for InvoiceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// 256-bit integers as decimal strings, lossless through JSON.
pub mod serde_dec {
    use ethers::types::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
            return Err(serde::de::Error::custom(format!(
                "expected a decimal integer string, got {s:?}"
            )));
        }
        U256::from_dec_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Addresses written EIP-55 checksummed; any hex casing is accepted on read.
pub mod serde_checksum {
    use ethers::types::Address;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Address, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ethers::utils::to_checksum(v, None))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Address, D::Error> {
        let s = String::deserialize(deserializer)?;
        crate::encoding::parse_address(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::encoding::parse_address;
    use crate::tokens::repay_token;
    use serde_json::json;

    pub(crate) fn reference_invoice() -> Invoice {
        Invoice {
            account: parse_address("0x499E26E7A97cB8F89bE5668770Fb022fdDbCa40d").unwrap(),
            paymaster: parse_address("0x3B03425198341CD6469Ba3e05e215a458CF021E6").unwrap(),
            nonce: U256::from_dec_str("32006186547098020862214455427072").unwrap(),
            sponsor_chain_id: U256::from(84532u64),
            repay_token_infos: vec![repay_token(
                "0x8e2048c85Eae2a4443408C284221B33e61906463",
                500,
                11155420,
            )
            .unwrap()],
        }
    }

    #[test]
    fn reference_vector() {
        let id = compute_invoice_id(&reference_invoice()).unwrap();
        assert_eq!(
            id.to_string(),
            "0x454dc426cea4e57e4557e945492209e00a834df9bce1bfc17045a987eca98126"
        );
        assert_eq!(id, compute_invoice_id(&reference_invoice()).unwrap());
    }

    #[test]
    fn packed_preimage_has_natural_widths() {
        let packed = reference_invoice().packed().unwrap();
        assert_eq!(packed.len(), 20 + 20 + 32 + 32 + (1 + 20 + 32 + 32));
        assert_eq!(&packed[..20], reference_invoice().account.as_bytes());
        assert_eq!(packed[104], 1);
    }

    #[test]
    fn every_field_changes_the_id() {
        let base = reference_invoice();
        let base_id = base.id().unwrap();

        let mut variants = Vec::new();
        let mut v = base.clone();
        v.account = Address::repeat_byte(1);
        variants.push(v);
        let mut v = base.clone();
        v.paymaster = Address::repeat_byte(2);
        variants.push(v);
        let mut v = base.clone();
        v.nonce += U256::one();
        variants.push(v);
        let mut v = base.clone();
        v.sponsor_chain_id = U256::from(11155420u64);
        variants.push(v);
        let mut v = base.clone();
        v.repay_token_infos[0].vault = Address::repeat_byte(3);
        variants.push(v);
        let mut v = base.clone();
        v.repay_token_infos[0].amount = U256::from(501u64);
        variants.push(v);
        let mut v = base.clone();
        v.repay_token_infos[0].chain_id = U256::from(10u64);
        variants.push(v);
        let mut v = base.clone();
        v.repay_token_infos.clear();
        variants.push(v);

        for variant in variants {
            assert_ne!(variant.id().unwrap(), base_id, "{variant:?}");
        }
    }

    #[test]
    fn json_shape_uses_decimal_strings_and_checksums() {
        let value = serde_json::to_value(reference_invoice()).unwrap();
        assert_eq!(
            value,
            json!({
                "account": "0x499E26E7A97cB8F89bE5668770Fb022fdDbCa40d",
                "paymaster": "0x3B03425198341CD6469Ba3e05e215a458CF021E6",
                "nonce": "32006186547098020862214455427072",
                "sponsorChainId": "84532",
                "repayTokenInfos": [{
                    "vault": "0x8e2048c85Eae2a4443408C284221B33e61906463",
                    "amount": "500",
                    "chainId": "11155420"
                }]
            })
        );
        let back: Invoice = serde_json::from_value(value).unwrap();
        assert_eq!(back, reference_invoice());
    }

    #[test]
    fn json_rejects_non_decimal_integers() {
        let mut value = serde_json::to_value(reference_invoice()).unwrap();
        value["nonce"] = json!("0x10");
        assert!(serde_json::from_value::<Invoice>(value).is_err());

        let mut value = serde_json::to_value(reference_invoice()).unwrap();
        value["account"] = json!("0x1234");
        assert!(serde_json::from_value::<Invoice>(value).is_err());
    }

    #[test]
    fn invoice_id_parsing() {
        let id = reference_invoice().id().unwrap();
        assert_eq!(id.to_string().parse::<InvoiceId>().unwrap(), id);
        assert!("0x1234".parse::<InvoiceId>().is_err());
        assert!("454dc426cea4e57e4557e945492209e00a834df9bce1bfc17045a987eca98126"
            .parse::<InvoiceId>()
            .is_err());
    }
}
