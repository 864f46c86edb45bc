use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{BlockNumber, U256};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};
use xchain_paymaster::config::{ChainDeployment, Deployments};
use xchain_paymaster::encoding::{fmt_bytes, parse_address, parse_bytes, parse_h256};
use xchain_paymaster::proof::hashi::{self, HashiClient};
use xchain_paymaster::settlement::{encode_repay_call, RepayProof};
use xchain_paymaster::{
    resolve_sender_address, ChainContext, Error, Invoice, InvoiceId, InvoiceStore, JobId,
    JsonFileStore, Paymaster, SponsorTokenInfo, UserOperation, ValidityWindow,
};

#[derive(Parser, Debug)]
#[command(name = "xchain-paymaster", version)]
struct Cli {
    /// Deployment json: per-chain contracts, proof oracle and invoice store location.
    #[arg(
        long,
        global = true,
        env = "XCHAIN_PAYMASTER_DEPLOYMENT",
        default_value = "deployments/testnet.json"
    )]
    deployment: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the identifier of an invoice file.
    InvoiceId(InvoiceFileArgs),

    /// Read or write the invoice store.
    #[command(subcommand)]
    Invoice(InvoiceCommand),

    /// Sign a sponsorship and print the ERC-7677 paymaster fields.
    Sponsor(SponsorArgs),

    /// Resolve the counterfactual sender of an account that is not deployed yet.
    SenderAddress(SenderArgs),

    /// Request or poll receipt proofs from the configured oracle.
    #[command(subcommand)]
    Proof(ProofCommand),

    /// Fetch a Hashi receipt proof and print its ABI encoding.
    HashiProof(HashiArgs),

    /// Build calldata for the invoice manager's `repay`.
    RepayCalldata(RepayArgs),
}

#[derive(Args, Debug)]
struct InvoiceFileArgs {
    /// Invoice json (addresses as hex, integers as decimal strings).
    #[arg(long)]
    file: PathBuf,
}

#[derive(Args, Debug)]
struct StoreArgs {
    /// Invoice store file. Defaults to the deployment json's `invoices`.
    #[arg(long, env = "XCHAIN_PAYMASTER_INVOICES")]
    invoices: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum InvoiceCommand {
    /// Insert or overwrite an invoice, keyed by its identifier.
    Put {
        #[command(flatten)]
        store: StoreArgs,
        #[command(flatten)]
        invoice: InvoiceFileArgs,
    },
    /// Print a stored invoice.
    Get {
        #[command(flatten)]
        store: StoreArgs,
        #[arg(long)]
        id: InvoiceId,
    },
}

#[derive(Args, Debug)]
struct SponsorArgs {
    /// Chain the paymaster sponsors on (a key of `chains` in the deployment json).
    #[arg(long)]
    chain: String,

    /// Unsigned user operation in the relay's JSON-RPC shape (hex quantities).
    #[arg(long)]
    user_op: PathBuf,

    /// Chain whose vault repays the sponsor.
    #[arg(long)]
    repay_chain: String,

    /// Token locked on the repay chain; its vault comes from the deployment json.
    #[arg(long)]
    repay_token: String,

    /// Raw base units, decimal.
    #[arg(long)]
    repay_amount: String,

    /// Token the paymaster lends the sender on the sponsoring chain.
    #[arg(long)]
    sponsor_token: String,

    /// Raw base units, decimal.
    #[arg(long)]
    sponsor_amount: String,

    /// Paymaster signer private key.
    #[arg(long, env = "XCHAIN_PAYMASTER_SIGNER_KEY", hide_env_values = true)]
    signer_key: String,

    /// Seconds on each side of the latest block timestamp.
    #[arg(long, default_value_t = 1_000_000)]
    validity_margin: u64,

    #[arg(long, default_value_t = 10)]
    signing_timeout_secs: u64,

    /// Return stub data with fixed gas limits, for gas estimation.
    #[arg(long, default_value_t = false)]
    stub: bool,

    /// Also record the invoice this sponsorship creates in the store.
    #[arg(long, default_value_t = false)]
    record_invoice: bool,

    #[command(flatten)]
    store: StoreArgs,
}

#[derive(Args, Debug)]
struct SenderArgs {
    /// Chain to simulate on.
    #[arg(long)]
    chain: String,

    /// Full init code (factory ‖ factoryData).
    #[arg(long, conflicts_with_all = ["factory", "factory_data"])]
    init_code: Option<String>,

    #[arg(long, requires = "factory_data")]
    factory: Option<String>,

    #[arg(long, requires = "factory")]
    factory_data: Option<String>,
}

#[derive(Subcommand, Debug)]
enum ProofCommand {
    /// Submit a proof job and print its id.
    Request(ProofRequestArgs),
    /// Poll proof jobs, optionally until every one is terminal.
    Poll(ProofPollArgs),
}

#[derive(Args, Debug)]
struct ProofRequestArgs {
    #[arg(long)]
    src_chain_id: u64,

    /// Required by the receipt oracle.
    #[arg(long)]
    dst_chain_id: Option<u64>,

    #[arg(long)]
    block: u64,

    #[arg(long)]
    tx_index: u64,

    #[arg(long)]
    log_index: u64,
}

#[derive(Args, Debug)]
struct ProofPollArgs {
    #[arg(long = "job-id", required = true, num_args = 1..)]
    job_ids: Vec<u64>,

    /// Keep polling until every job is complete or failed.
    #[arg(long, default_value_t = false)]
    wait: bool,

    #[arg(long, default_value_t = 5)]
    interval_secs: u64,

    /// Give up after this many seconds. Use 0 to disable timeout.
    #[arg(long, default_value_t = 600)]
    timeout_secs: u64,

    #[arg(long, default_value_t = 4)]
    concurrency: usize,
}

#[derive(Args, Debug)]
struct HashiArgs {
    #[arg(long, env = "HASHI_PROVER_API_ENDPOINT", default_value = hashi::DEFAULT_ENDPOINT)]
    endpoint: String,

    #[arg(long)]
    chain_id: u64,

    #[arg(long)]
    log_index: u64,

    #[arg(long)]
    tx_hash: String,
}

#[derive(Args, Debug)]
struct RepayArgs {
    #[command(flatten)]
    store: StoreArgs,

    /// Invoice to repay, looked up in the store.
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    id: Option<InvoiceId>,

    /// Invoice json to repay instead of a stored one.
    #[arg(long)]
    file: Option<PathBuf>,

    /// Receipt proof bytes, hex.
    #[arg(long)]
    proof: String,

    /// Wrap the proof as `abi.encode(logIndex, proof)` for verifiers that expect it.
    #[arg(long)]
    log_index: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        // stdout carries json results only.
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let deployment = cli.deployment.as_path();

    match cli.cmd {
        Command::InvoiceId(args) => cmd_invoice_id(args),
        Command::Invoice(InvoiceCommand::Put { store, invoice }) => {
            cmd_invoice_put(deployment, store, invoice)
        }
        Command::Invoice(InvoiceCommand::Get { store, id }) => {
            cmd_invoice_get(deployment, store, id)
        }
        Command::Sponsor(args) => cmd_sponsor(deployment, args).await,
        Command::SenderAddress(args) => cmd_sender_address(deployment, args).await,
        Command::Proof(ProofCommand::Request(args)) => cmd_proof_request(deployment, args).await,
        Command::Proof(ProofCommand::Poll(args)) => cmd_proof_poll(deployment, args).await,
        Command::HashiProof(args) => cmd_hashi_proof(args).await,
        Command::RepayCalldata(args) => cmd_repay_calldata(deployment, args),
    }
}

fn print_json(v: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(v)?);
    Ok(())
}

fn read_invoice(path: &Path) -> Result<Invoice> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read invoice json at {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse invoice json at {}", path.display()))
}

fn open_store(deployment: &Path, args: &StoreArgs) -> Result<JsonFileStore> {
    let path = match &args.invoices {
        Some(path) => path.clone(),
        None => Deployments::load(deployment)?.invoices,
    };
    Ok(JsonFileStore::new(path))
}

fn parse_amount(s: &str) -> Result<U256> {
    U256::from_dec_str(s).map_err(|e| anyhow!("invalid decimal amount {s}: {e}"))
}

async fn connect(chain: &ChainDeployment) -> Result<Provider<Http>> {
    let provider = Provider::<Http>::try_from(chain.rpc_url.as_str())
        .with_context(|| format!("invalid rpc url for {}", chain.name))?;
    let chain_id = provider.get_chainid().await?.as_u64();
    if chain_id != chain.chain_id {
        return Err(anyhow!(
            "chainId mismatch on {}: deployment has {}, RPC returned {}",
            chain.name,
            chain.chain_id,
            chain_id
        ));
    }
    Ok(provider)
}

fn cmd_invoice_id(args: InvoiceFileArgs) -> Result<()> {
    let invoice = read_invoice(&args.file)?;
    println!("{}", invoice.id()?);
    Ok(())
}

fn cmd_invoice_put(deployment: &Path, store: StoreArgs, args: InvoiceFileArgs) -> Result<()> {
    let invoice = read_invoice(&args.file)?;
    let id = open_store(deployment, &store)?.write(&invoice)?;
    println!("{id}");
    Ok(())
}

fn cmd_invoice_get(deployment: &Path, store: StoreArgs, id: InvoiceId) -> Result<()> {
    let invoice = open_store(deployment, &store)?.read(&id)?;
    print_json(&serde_json::to_value(invoice)?)
}

async fn cmd_sponsor(deployment: &Path, args: SponsorArgs) -> Result<()> {
    let deps = Deployments::load(deployment)?;
    let chain = deps.chain(&args.chain)?;
    let repay_chain = deps.chain(&args.repay_chain)?;

    let raw = fs::read_to_string(&args.user_op)
        .with_context(|| format!("failed to read user operation at {}", args.user_op.display()))?;
    let op_json: Value = serde_json::from_str(&raw).context("user operation is not json")?;
    let op = UserOperation::from_rpc_json(&op_json).context("invalid user operation")?;

    let repay = repay_chain.repay_token(
        parse_address(&args.repay_token).context("invalid --repay-token")?,
        parse_amount(&args.repay_amount)?,
    )?;
    let sponsor = SponsorTokenInfo {
        token: parse_address(&args.sponsor_token).context("invalid --sponsor-token")?,
        spender: op.sender,
        amount: parse_amount(&args.sponsor_amount)?,
    };

    let provider = connect(chain).await?;
    let block = provider
        .get_block(BlockNumber::Latest)
        .await?
        .ok_or_else(|| anyhow!("node returned no latest block"))?;
    let window = ValidityWindow::around(block.timestamp.as_u64(), args.validity_margin)?;

    let wallet = LocalWallet::from_str(&args.signer_key)
        .context("invalid signer private key")?
        .with_chain_id(chain.chain_id);
    tracing::info!(
        chain = %chain.name,
        signer = ?wallet.address(),
        paymaster = ?chain.paymaster,
        layout = ?chain.layout,
        "sponsoring user operation"
    );
    let paymaster = Paymaster::new(wallet, chain.paymaster, chain.chain_id, chain.layout)
        .with_signing_timeout(Duration::from_secs(args.signing_timeout_secs));

    let data = if args.stub {
        paymaster.stub_data(&op, &[repay], &[sponsor], window).await?
    } else {
        paymaster.sponsor(&op, &[repay], &[sponsor], window).await?
    };

    if args.record_invoice && !args.stub {
        let invoice = Invoice {
            account: op.sender,
            paymaster: chain.paymaster,
            nonce: op.nonce,
            sponsor_chain_id: U256::from(chain.chain_id),
            repay_token_infos: vec![repay],
        };
        let id = open_store(deployment, &args.store)?.write(&invoice)?;
        tracing::info!(invoice_id = %id, "invoice recorded");
    }

    print_json(&data.to_json())
}

async fn cmd_sender_address(deployment: &Path, args: SenderArgs) -> Result<()> {
    let deps = Deployments::load(deployment)?;
    let chain = deps.chain(&args.chain)?;

    let init_code = match (&args.init_code, &args.factory, &args.factory_data) {
        (Some(code), _, _) => parse_bytes(code).context("invalid --init-code")?,
        (None, Some(factory), Some(data)) => xchain_paymaster::types::init_code(
            Some(parse_address(factory).context("invalid --factory")?),
            &parse_bytes(data).context("invalid --factory-data")?,
        ),
        _ => {
            return Err(anyhow!(
                "either --init-code or --factory and --factory-data must be provided"
            ))
        }
    };

    let provider = connect(chain).await?;
    let sender = resolve_sender_address(&provider, chain.entry_point, &init_code).await?;
    println!("{}", ethers::utils::to_checksum(&sender, None));
    Ok(())
}

async fn cmd_proof_request(deployment: &Path, args: ProofRequestArgs) -> Result<()> {
    let deps = Deployments::load(deployment)?;
    let client = deps.proof_oracle()?.client();
    let ctx = ChainContext {
        src_chain_id: args.src_chain_id,
        dst_chain_id: args.dst_chain_id,
        src_block_number: args.block,
        tx_index: args.tx_index,
        log_index: args.log_index,
    };
    let job_id = client.request_proof(&ctx).await?;
    print_json(&json!({ "jobId": job_id, "oracle": client.backend_name() }))
}

fn job_error_json(id: JobId, err: &Error) -> Value {
    json!({ "jobId": id, "error": err.to_string() })
}

async fn cmd_proof_poll(deployment: &Path, args: ProofPollArgs) -> Result<()> {
    let deps = Deployments::load(deployment)?;
    let client = deps.proof_oracle()?.client();
    let ids: Vec<JobId> = args.job_ids.iter().copied().map(JobId).collect();

    if !args.wait {
        let mut out = Vec::with_capacity(ids.len());
        for (id, res) in client.poll_many(&ids, args.concurrency).await {
            out.push(match res {
                Ok(job) => serde_json::to_value(job)?,
                Err(e) => job_error_json(id, &e),
            });
        }
        return print_json(&Value::Array(out));
    }

    let start = Instant::now();
    let timeout = Duration::from_secs(args.timeout_secs);
    let interval = Duration::from_secs(args.interval_secs);
    let mut done: BTreeMap<JobId, Value> = BTreeMap::new();

    loop {
        let pending: Vec<JobId> = ids
            .iter()
            .copied()
            .filter(|id| !done.contains_key(id))
            .collect();
        if pending.is_empty() {
            break;
        }
        if args.timeout_secs > 0 && start.elapsed() > timeout {
            let pending: Vec<String> = pending.iter().map(JobId::to_string).collect();
            return Err(anyhow!(
                "timed out after {:?} waiting for proof jobs {}",
                timeout,
                pending.join(", ")
            ));
        }

        for (id, res) in client.poll_many(&pending, args.concurrency).await {
            match res {
                Ok(job) if job.status.is_terminal() => {
                    done.insert(id, serde_json::to_value(job)?);
                }
                Ok(job) => {
                    tracing::info!(job_id = %id, updated_at = job.updated_at, "proof pending");
                }
                // transient oracle errors are common; keep polling
                Err(Error::Transport(e)) => {
                    tracing::warn!(job_id = %id, error = %e, "proof poll error");
                }
                Err(e) => {
                    done.insert(id, job_error_json(id, &e));
                }
            }
        }

        if ids.iter().any(|id| !done.contains_key(id)) {
            tokio::time::sleep(interval).await;
        }
    }

    let out = ids
        .iter()
        .filter_map(|id| done.get(id).cloned())
        .collect::<Vec<_>>();
    print_json(&Value::Array(out))
}

async fn cmd_hashi_proof(args: HashiArgs) -> Result<()> {
    let tx_hash = parse_h256(&args.tx_hash).context("invalid --tx-hash")?;
    let proof = HashiClient::new(args.endpoint)
        .get_receipt_proof(args.chain_id, args.log_index, tx_hash)
        .await?;
    print_json(&json!({
        "chainId": proof.chain_id.to_string(),
        "blockNumber": proof.block_number.to_string(),
        "logIndex": proof.log_index.to_string(),
        "proof": fmt_bytes(&hashi::encode_receipt_proof(&proof)),
    }))
}

fn cmd_repay_calldata(deployment: &Path, args: RepayArgs) -> Result<()> {
    let invoice = match (&args.id, &args.file) {
        (_, Some(file)) => read_invoice(file)?,
        (Some(id), None) => open_store(deployment, &args.store)?.read(id)?,
        (None, None) => return Err(anyhow!("either --id or --file must be provided")),
    };

    let raw = parse_bytes(&args.proof).context("invalid --proof")?;
    let proof = match args.log_index {
        Some(log_index) => RepayProof::Indexed {
            log_index: U256::from(log_index),
            proof: raw,
        },
        None => RepayProof::Raw(raw),
    };

    print_json(&json!({
        "invoiceId": invoice.id()?.to_string(),
        "data": fmt_bytes(&encode_repay_call(&invoice, &proof)?),
    }))
}
