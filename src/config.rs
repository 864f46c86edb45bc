//! Deployment configuration: contract addresses and endpoints per chain.
//!
//! Secrets never live in this file. RPC URLs with provider keys and the oracle API key are
//! read from the environment variables the file names.

use crate::encoding::parse_address;
use crate::proof::{ProofClient, ProofOracleKind};
use crate::sponsorship::SponsorshipLayout;
use crate::tokens::RepayTokenInfo;
use anyhow::{anyhow, Context, Result};
use ethers::types::{Address, U256};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::{env, fs, path::Path, path::PathBuf};

pub const DEFAULT_INVOICES_FILE: &str = "invoices.json";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentFileRaw {
    pub chains: BTreeMap<String, ChainRaw>,
    #[serde(default)]
    pub proof_oracle: Option<ProofOracleConfig>,
    #[serde(default)]
    pub invoices: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainRaw {
    pub chain_id: u64,
    pub rpc: String,
    #[serde(default)]
    pub rpc_env_var: Option<String>,
    pub entry_point: String,
    pub paymaster: String,
    #[serde(default)]
    pub invoice_manager: Option<String>,
    #[serde(default)]
    pub vault_manager: Option<String>,
    /// token address -> vault address
    #[serde(default)]
    pub vaults: BTreeMap<String, String>,
    #[serde(default)]
    pub verifier: VerifierConfig,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct VerifierConfig {
    #[serde(default)]
    pub version: SponsorshipLayout,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofOracleConfig {
    pub kind: ProofOracleKind,
    pub endpoint: String,
    /// Environment variable holding the bearer key, if the oracle wants one.
    #[serde(default)]
    pub api_key_env_var: Option<String>,
}

impl ProofOracleConfig {
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env_var
            .as_deref()
            .and_then(|name| env::var(name).ok())
            .filter(|key| !key.is_empty())
    }

    pub fn client(&self) -> ProofClient {
        if self.api_key_env_var.is_some() && self.api_key().is_none() {
            tracing::warn!(
                env_var = self.api_key_env_var.as_deref().unwrap_or_default(),
                "proof oracle api key env var is not set; requests will be unauthenticated"
            );
        }
        ProofClient::for_oracle(self.kind, &self.endpoint, self.api_key())
    }
}

#[derive(Debug, Clone)]
pub struct ChainDeployment {
    pub name: String,
    pub chain_id: u64,
    pub rpc_url: String,
    pub entry_point: Address,
    pub paymaster: Address,
    pub invoice_manager: Option<Address>,
    pub vault_manager: Option<Address>,
    pub vaults: BTreeMap<Address, Address>,
    pub layout: SponsorshipLayout,
}

impl ChainDeployment {
    pub fn vault_for(&self, token: Address) -> Result<Address> {
        self.vaults
            .get(&token)
            .copied()
            .ok_or_else(|| anyhow!("no vault configured for token {token:?} on {}", self.name))
    }

    /// A repay entry drawing `amount` of `token` from this chain's vault.
    pub fn repay_token(&self, token: Address, amount: U256) -> Result<RepayTokenInfo> {
        Ok(RepayTokenInfo {
            vault: self.vault_for(token)?,
            amount,
            chain_id: U256::from(self.chain_id),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Deployments {
    pub chains: BTreeMap<String, ChainDeployment>,
    pub proof_oracle: Option<ProofOracleConfig>,
    /// Invoice store file, resolved against the deployment file's directory.
    pub invoices: PathBuf,
}

impl Deployments {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read deployment json at {}", path.display()))?;
        let raw: DeploymentFileRaw = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse deployment json at {}", path.display()))?;

        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Self::from_raw(raw, base)
    }

    pub fn from_raw(raw: DeploymentFileRaw, base: &Path) -> Result<Self> {
        let mut chains = BTreeMap::new();
        for (name, chain) in raw.chains {
            let resolved =
                resolve_chain(&name, chain).with_context(|| format!("invalid chain {name}"))?;
            chains.insert(name, resolved);
        }

        let invoices = raw
            .invoices
            .unwrap_or_else(|| PathBuf::from(DEFAULT_INVOICES_FILE));
        let invoices = if invoices.is_absolute() {
            invoices
        } else {
            base.join(invoices)
        };

        Ok(Self {
            chains,
            proof_oracle: raw.proof_oracle,
            invoices,
        })
    }

    pub fn chain(&self, name: &str) -> Result<&ChainDeployment> {
        self.chains.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.chains.keys().map(String::as_str).collect();
            anyhow!("unknown chain {name} (configured: {})", known.join(", "))
        })
    }

    pub fn chain_by_id(&self, chain_id: u64) -> Option<&ChainDeployment> {
        self.chains.values().find(|c| c.chain_id == chain_id)
    }

    pub fn proof_oracle(&self) -> Result<&ProofOracleConfig> {
        self.proof_oracle
            .as_ref()
            .ok_or_else(|| anyhow!("deployment json has no proofOracle section"))
    }
}

fn resolve_chain(name: &str, raw: ChainRaw) -> Result<ChainDeployment> {
    let rpc_url = match raw.rpc_env_var.as_deref() {
        Some(var) => env::var(var).unwrap_or(raw.rpc.clone()),
        None => raw.rpc.clone(),
    };

    let optional = |v: &Option<String>, what: &str| -> Result<Option<Address>> {
        v.as_deref()
            .map(|s| parse_address(s).with_context(|| format!("invalid {what} address")))
            .transpose()
    };

    let mut vaults = BTreeMap::new();
    for (token, vault) in &raw.vaults {
        let token = parse_address(token).with_context(|| format!("invalid token {token}"))?;
        let vault = parse_address(vault).with_context(|| format!("invalid vault {vault}"))?;
        vaults.insert(token, vault);
    }

    Ok(ChainDeployment {
        name: name.to_string(),
        chain_id: raw.chain_id,
        rpc_url,
        entry_point: parse_address(&raw.entry_point).context("invalid entryPoint address")?,
        paymaster: parse_address(&raw.paymaster).context("invalid paymaster address")?,
        invoice_manager: optional(&raw.invoice_manager, "invoiceManager")?,
        vault_manager: optional(&raw.vault_manager, "vaultManager")?,
        vaults,
        layout: raw.verifier.version,
    })
}
