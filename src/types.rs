use crate::encoding::{
    concat, fmt_address, fmt_bytes, fmt_u256, pack_u128_pair, parse_address, parse_bytes,
    parse_u256_quantity,
};
use crate::error::{Error, Result};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;
use serde_json::Value;

/// Gas limit used when the relay leaves a limit unset.
pub const DEFAULT_GAS_LIMIT: u64 = 100_000;

/// Largest value representable as a `uint48` timestamp.
pub const MAX_UINT48: u64 = (1 << 48) - 1;

/// Unsigned ERC-4337 UserOperation (EntryPoint v0.7 fields, unpacked).
///
/// This is the shape the relay hands to the paymaster before sponsorship; `signature` and
/// the paymaster fields are filled in later.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub factory: Option<Address>,
    pub factory_data: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster_verification_gas_limit: Option<U256>,
    pub paymaster_post_op_gas_limit: Option<U256>,
}

impl UserOperation {
    /// `factory ‖ factoryData`, or empty when the account is already deployed.
    pub fn init_code(&self) -> Bytes {
        init_code(self.factory, &self.factory_data)
    }

    /// Hashes the variable-length fields and packs the gas words.
    pub fn pending(&self) -> Result<PendingOperation> {
        Ok(PendingOperation {
            sender: self.sender,
            nonce: self.nonce,
            init_code_hash: H256(keccak256(self.init_code())),
            call_data_hash: H256(keccak256(&self.call_data)),
            account_gas_limits: pack_u128_pair(self.verification_gas_limit, self.call_gas_limit)?,
            pre_verification_gas: self.pre_verification_gas,
            gas_fees: pack_u128_pair(self.max_priority_fee_per_gas, self.max_fee_per_gas)?,
        })
    }

    /// Parses the relay's JSON-RPC shape (hex quantities, optional factory fields).
    ///
    /// Missing gas limits fall back to [`DEFAULT_GAS_LIMIT`]; missing fees and
    /// `preVerificationGas` fall back to zero.
    pub fn from_rpc_json(v: &Value) -> Result<Self> {
        let str_field = |key: &str| v.get(key).and_then(|x| x.as_str());
        let quantity = |key: &str| -> Result<Option<U256>> {
            str_field(key).map(parse_u256_quantity).transpose()
        };

        let sender = str_field("sender")
            .ok_or_else(|| Error::Encoding("missing sender".to_string()))
            .and_then(parse_address)?;
        let factory = str_field("factory").map(parse_address).transpose()?;
        let factory_data = str_field("factoryData")
            .map(parse_bytes)
            .transpose()?
            .unwrap_or_default();
        let call_data = str_field("callData")
            .map(parse_bytes)
            .transpose()?
            .unwrap_or_default();
        let default_gas = U256::from(DEFAULT_GAS_LIMIT);

        Ok(Self {
            sender,
            nonce: quantity("nonce")?.unwrap_or_default(),
            factory,
            factory_data,
            call_data,
            call_gas_limit: quantity("callGasLimit")?.unwrap_or(default_gas),
            verification_gas_limit: quantity("verificationGasLimit")?.unwrap_or(default_gas),
            pre_verification_gas: quantity("preVerificationGas")?.unwrap_or_default(),
            max_fee_per_gas: quantity("maxFeePerGas")?.unwrap_or_default(),
            max_priority_fee_per_gas: quantity("maxPriorityFeePerGas")?.unwrap_or_default(),
            paymaster_verification_gas_limit: quantity("paymasterVerificationGasLimit")?,
            paymaster_post_op_gas_limit: quantity("paymasterPostOpGasLimit")?,
        })
    }

    pub fn to_rpc_json(&self) -> Value {
        let mut out = serde_json::json!({
            "sender": fmt_address(self.sender),
            "nonce": fmt_u256(self.nonce),
            "callData": fmt_bytes(&self.call_data),
            "callGasLimit": fmt_u256(self.call_gas_limit),
            "verificationGasLimit": fmt_u256(self.verification_gas_limit),
            "preVerificationGas": fmt_u256(self.pre_verification_gas),
            "maxFeePerGas": fmt_u256(self.max_fee_per_gas),
            "maxPriorityFeePerGas": fmt_u256(self.max_priority_fee_per_gas),
        });
        if let (Some(factory), Some(obj)) = (self.factory, out.as_object_mut()) {
            obj.insert("factory".to_string(), Value::String(fmt_address(factory)));
            obj.insert(
                "factoryData".to_string(),
                Value::String(fmt_bytes(&self.factory_data)),
            );
        }
        out
    }
}

pub fn init_code(factory: Option<Address>, factory_data: &[u8]) -> Bytes {
    match factory {
        Some(factory) => Bytes::from(concat(&[factory.as_bytes(), factory_data])),
        None => Bytes::default(),
    }
}

/// The unsigned sponsorship request as it enters the hash preimage.
///
/// Variable-length fields are carried only as their hashes to bound the preimage size.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code_hash: H256,
    pub call_data_hash: H256,
    /// verificationGasLimit ‖ callGasLimit
    pub account_gas_limits: H256,
    pub pre_verification_gas: U256,
    /// maxPriorityFeePerGas ‖ maxFeePerGas
    pub gas_fees: H256,
}

/// `[valid_after, valid_until)` in unix seconds, both `uint48`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValidityWindow {
    valid_after: u64,
    valid_until: u64,
}

impl ValidityWindow {
    pub fn new(valid_after: u64, valid_until: u64) -> Result<Self> {
        if valid_until > MAX_UINT48 {
            return Err(Error::Encoding(format!(
                "validUntil {valid_until} exceeds uint48"
            )));
        }
        if valid_after >= valid_until {
            return Err(Error::Encoding(format!(
                "validAfter {valid_after} must be before validUntil {valid_until}"
            )));
        }
        Ok(Self {
            valid_after,
            valid_until,
        })
    }

    /// `timestamp ± margin`, saturating at zero.
    pub fn around(timestamp: u64, margin: u64) -> Result<Self> {
        Self::new(
            timestamp.saturating_sub(margin),
            timestamp.saturating_add(margin),
        )
    }

    pub fn valid_after(&self) -> u64 {
        self.valid_after
    }

    pub fn valid_until(&self) -> u64 {
        self.valid_until
    }
}

/// Gas limits the paymaster itself asks for (verification ‖ postOp word).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PaymasterGasLimits {
    pub verification_gas_limit: U256,
    pub post_op_gas_limit: U256,
}

impl PaymasterGasLimits {
    pub fn for_op(op: &UserOperation) -> Self {
        let default_gas = U256::from(DEFAULT_GAS_LIMIT);
        Self {
            verification_gas_limit: op.paymaster_verification_gas_limit.unwrap_or(default_gas),
            post_op_gas_limit: op.paymaster_post_op_gas_limit.unwrap_or(default_gas),
        }
    }

    pub fn packed(&self) -> Result<H256> {
        pack_u128_pair(self.verification_gas_limit, self.post_op_gas_limit)
    }
}
