//! Escrow CLI - drives the escrow client against an in-process devnet
//!
//!   escrow-client status         → connect, refresh, print session and escrows
//!   escrow-client demo           → full lifecycle between two accounts
//!   escrow-client repl           → interactive session
//!
//! Configuration (flags > env > config file):
//!   --contract <addr>            ESCROW_CONTRACT (defaults to the devnet contract)
//!   --provider <kind>            ESCROW_PROVIDER
//!   --chain-id <id>              ESCROW_CHAIN_ID
//!   --config <path>              config file location
//!
//! Output format:
//!   --json     Output raw JSON (default for non-tty)
//!   --pretty   Pretty-print JSON (default for tty)

use anyhow::{anyhow, bail, Context};
use escrow_client::devnet::{Devnet, DevnetWallet};
use escrow_client::escrow::ChannelNotifier;
use escrow_client::logging::{init_logging_with, ENV_LOG_JSON};
use escrow_client::wallet::WalletProvider;
use escrow_client::{
    format_ether, install_signal_handlers, parse_ether, Address, ClientConfig, EscrowClient, EscrowDraft,
    InjectedProviders, Notification, ProviderKind, Shutdown, WalletSession,
};
use serde_json::{json, Value};
use std::env;
use std::future::Future;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

fn main() {
    let args: Vec<String> = env::args().collect();
    let opts = ParsedArgs::parse(&args[1..]);
    init_logging_with(opts.log_json);

    if opts.help {
        print_usage();
        return;
    }

    if opts.version {
        println!("escrow-client {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let result = match opts.command.as_deref() {
        Some("status") => block_on(cmd_status(&opts)),
        Some("demo") => block_on(cmd_demo(&opts)),
        Some("repl") => block_on(cmd_repl(&opts)),
        Some(cmd) => Err(anyhow!("Unknown command: {}", cmd)),
        None => {
            print_usage();
            return;
        }
    };

    let pretty = !opts.json && (opts.pretty || io::stdout().is_terminal());
    match result {
        Ok(output) => println!("{}", render(&output, pretty)),
        Err(e) => {
            eprintln!("{}", render(&json!({ "error": format!("{:#}", e) }), pretty));
            std::process::exit(1);
        }
    }
}

fn render(value: &Value, pretty: bool) -> String {
    let rendered = if pretty { serde_json::to_string_pretty(value) } else { serde_json::to_string(value) };
    rendered.unwrap_or_else(|_| value.to_string())
}

fn block_on<F: Future<Output = anyhow::Result<Value>>>(fut: F) -> anyhow::Result<Value> {
    let rt = tokio::runtime::Runtime::new().context("Failed to create runtime")?;
    rt.block_on(fut)
}

#[derive(Default)]
struct ParsedArgs {
    command: Option<String>,
    contract: Option<String>,
    provider: Option<String>,
    chain_id: Option<String>,
    config: Option<PathBuf>,
    // Output options
    json: bool,
    pretty: bool,
    log_json: bool,
    help: bool,
    version: bool,
}

impl ParsedArgs {
    fn parse(args: &[String]) -> Self {
        // Load .env file if present
        if let Ok(contents) = std::fs::read_to_string(".env") {
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    let value = value.trim().trim_matches('"');
                    if !value.is_empty() && env::var(key.trim()).is_err() {
                        env::set_var(key.trim(), value);
                    }
                }
            }
        }

        let mut opts = ParsedArgs::default();
        let mut positional = Vec::new();
        let mut i = 0;

        while i < args.len() {
            let arg = &args[i];
            let value = args.get(i + 1).cloned();
            match arg.as_str() {
                "--help" | "-h" => opts.help = true,
                "--version" | "-V" => opts.version = true,
                "--json" => opts.json = true,
                "--pretty" => opts.pretty = true,
                "--log-json" => opts.log_json = true,
                "--contract" | "-c" => {
                    opts.contract = value;
                    i += 1;
                }
                "--provider" | "-p" => {
                    opts.provider = value;
                    i += 1;
                }
                "--chain-id" => {
                    opts.chain_id = value;
                    i += 1;
                }
                "--config" => {
                    opts.config = value.map(PathBuf::from);
                    i += 1;
                }
                _ if !arg.starts_with('-') => positional.push(arg.clone()),
                _ => {} // Ignore unknown flags
            }
            i += 1;
        }

        if !positional.is_empty() {
            opts.command = Some(positional.remove(0));
        }
        if !opts.log_json {
            opts.log_json = env::var(ENV_LOG_JSON).map(|v| v == "1").unwrap_or(false);
        }
        opts
    }

    /// File and env config with command-line flags on top.
    fn client_config(&self) -> anyhow::Result<ClientConfig> {
        let mut config = ClientConfig::resolve(self.config.as_deref())?;
        if let Some(raw) = &self.contract {
            config.contract_address = Some(Address::parse(raw)?);
        }
        if let Some(raw) = &self.provider {
            config.preferred_provider = Some(raw.parse::<ProviderKind>()?);
        }
        if let Some(raw) = &self.chain_id {
            config.expected_chain_id = Some(raw.parse().with_context(|| format!("Invalid chain id: {}", raw))?);
        }
        Ok(config)
    }
}

fn print_usage() {
    println!(
        r#"escrow-client - Escrow lifecycle against an in-process devnet

USAGE:
    escrow-client <command> [options]

COMMANDS:
    status                  Connect, refresh and print the session
    demo                    Run create → accept → submit → release → withdraw
    repl                    Interactive mode

OPTIONS:
    --contract, -c <addr>   Escrow contract (env: ESCROW_CONTRACT)
    --provider, -p <kind>   metamask|coinbase|trust|injected (env: ESCROW_PROVIDER)
    --chain-id <id>         Expected network (env: ESCROW_CHAIN_ID)
    --config <path>         Config file (default: <config dir>/escrow-client/config.json)

OUTPUT OPTIONS:
    --json                  Raw JSON output
    --pretty                Pretty-print JSON
    --log-json              JSON log lines on stderr (env: ESCROW_LOG_JSON=1)
    --version, -V           Print version

EXAMPLES:
    escrow-client demo --pretty
    escrow-client status --provider coinbase
    RUST_LOG=escrow_client=debug escrow-client repl
"#
    );
}

// =============================================================================
// Devnet wiring
// =============================================================================

/// Accounts funded on the CLI devnet.
const ACCOUNTS: u32 = 3;
const FUNDING_ETHER: &str = "100";

struct Harness {
    devnet: Devnet,
    wallets: Vec<Arc<DevnetWallet>>,
    session: WalletSession,
    client: EscrowClient,
    notes: UnboundedReceiver<Notification>,
}

impl Harness {
    fn new(opts: &ParsedArgs, shutdown: Shutdown) -> anyhow::Result<Self> {
        let mut config = opts.client_config()?;
        let devnet = Devnet::new();
        config.contract_address.get_or_insert_with(|| devnet.contract_address());

        let funding = parse_ether(FUNDING_ETHER)?;
        let accounts: Vec<Address> = (0..ACCOUNTS).map(Devnet::account).collect();
        for account in &accounts {
            devnet.fund(account, funding);
        }

        let wallets = vec![
            devnet.wallet(ProviderKind::Metamask, accounts.clone()),
            devnet.wallet(ProviderKind::Coinbase, accounts.iter().rev().cloned().collect()),
        ];
        let mut source = InjectedProviders::new();
        for wallet in &wallets {
            source = source.with(wallet.clone());
        }

        let session = WalletSession::with_shutdown(source, shutdown);
        let (notifier, notes) = ChannelNotifier::new();
        let client = EscrowClient::with_notifier(session.clone(), devnet.binder(), config, Arc::new(notifier));
        debug!(contract = %devnet.contract_address(), chain_id = devnet.chain_id(), "Devnet ready");

        Ok(Self { devnet, wallets, session, client, notes })
    }

    async fn connect(&self) -> anyhow::Result<()> {
        self.session.connect(self.client.config().preferred_provider).await?;
        Ok(())
    }

    /// Wallet the session picked, for host-side account switching.
    fn active_wallet(&self) -> anyhow::Result<&Arc<DevnetWallet>> {
        let kind = self.session.snapshot().provider_kind;
        self.wallets
            .iter()
            .find(|w| w.kind() == kind)
            .ok_or_else(|| anyhow!("No wallet connected"))
    }

    /// Switch the active wallet account and wait until the session follows.
    async fn switch_to(&self, account: &Address) -> anyhow::Result<()> {
        let mut rx = self.session.watch();
        self.active_wallet()?.switch_account(account);
        loop {
            if rx.borrow_and_update().address.as_ref() == Some(account) {
                return Ok(());
            }
            rx.changed().await.context("session closed")?;
        }
    }

    fn drain_notes(&mut self) -> Vec<Notification> {
        let mut notes = Vec::new();
        while let Ok(note) = self.notes.try_recv() {
            notes.push(note);
        }
        notes
    }

    fn status(&self) -> Value {
        let view = self.client.view();
        json!({
            "session": self.session.snapshot(),
            "ready": self.client.is_ready(),
            "contract": self.client.config().contract_address,
            "earnings": format_ether(view.earnings.amount),
            "earnings_pending": view.earnings.is_pending(),
            "stats": view.stats(),
            "escrows": view.records.iter().map(record_json).collect::<Vec<_>>(),
        })
    }
}

fn record_json(record: &escrow_client::EscrowRecord) -> Value {
    json!({
        "id": record.id,
        "status": record.status.label(),
        "client": record.client.truncated(),
        "freelancer": record.freelancer.truncated(),
        "amount": record.amount_ether(),
        "description": record.description,
        "created_at": record.created_at.to_rfc3339(),
    })
}

// =============================================================================
// Commands
// =============================================================================

async fn cmd_status(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let harness = Harness::new(opts, Shutdown::new())?;
    harness.connect().await?;
    if harness.client.is_ready() {
        harness.client.refresh().await?;
    }
    let status = harness.status();
    harness.session.shutdown().trigger();
    Ok(status)
}

async fn cmd_demo(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let mut harness = Harness::new(opts, Shutdown::new())?;
    let client_account = Devnet::account(0);
    let freelancer = Devnet::account(1);

    harness.connect().await?;
    harness.switch_to(&client_account).await?;
    if !harness.client.is_ready() {
        bail!("Client not ready; check --contract and --chain-id");
    }
    let follower = harness.client.follow_session();

    let draft = EscrowDraft::parse("Landing page redesign", freelancer.as_str(), "1.5")?;
    let created = harness.client.create_escrow(draft).await?;
    let id = created.escrow_id.ok_or_else(|| anyhow!("createEscrow returned no id"))?;
    info!(id, tx = %created.hash, "Escrow created");

    harness.switch_to(&freelancer).await?;
    harness.client.accept_escrow(id).await?;
    harness.client.submit_work(id).await?;

    harness.switch_to(&client_account).await?;
    harness.client.approve_and_release(id).await?;

    harness.switch_to(&freelancer).await?;
    harness.client.refresh().await?;
    let earned = harness.client.earnings().amount;
    harness.client.withdraw_earnings().await?;

    let status = harness.status();
    harness.session.shutdown().trigger();
    follower.abort();

    let notes = harness.drain_notes();
    Ok(json!({
        "escrow_id": id,
        "earned": format_ether(earned),
        "freelancer_balance": format_ether(harness.devnet.balance(&freelancer)),
        "platform_fee": format_ether(harness.devnet.platform_earnings()),
        "notifications": notes,
        "final": status,
    }))
}

async fn cmd_repl(opts: &ParsedArgs) -> anyhow::Result<Value> {
    let shutdown = install_signal_handlers();
    let mut harness = Harness::new(opts, shutdown.clone())?;
    let follower = harness.client.follow_session();

    println!("Escrow REPL - type 'help' or 'quit'\n");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("escrow> ");
        io::stdout().flush().ok();

        let line = tokio::select! {
            _ = shutdown.wait() => break,
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
        };

        let parts: Vec<&str> = line.trim().splitn(4, ' ').collect();
        let outcome = match parts.first().copied() {
            None | Some("") => continue,
            Some("quit") | Some("exit") | Some("q") => break,
            Some("help") | Some("?") => {
                print_repl_help();
                continue;
            }
            Some(cmd) => repl_command(&harness, cmd, &parts[1..]).await,
        };

        match outcome {
            Ok(Some(value)) => println!("{}", render(&value, true)),
            Ok(None) => {}
            Err(e) => println!("Error: {:#}", e),
        }
        for note in harness.drain_notes() {
            let detail = note.detail.map(|d| format!(" ({})", d)).unwrap_or_default();
            println!("  [{:?}] {}{} <{}>", note.severity, note.message, detail, note.correlation_id);
        }
    }

    follower.abort();
    harness.session.disconnect();
    println!("Goodbye!");
    Ok(json!({"status": "exited"}))
}

fn print_repl_help() {
    println!("Commands:");
    println!("  connect                        - Connect wallet");
    println!("  disconnect                     - Forget session");
    println!("  account <n>                    - Switch wallet to devnet account n");
    println!("  chain <id>                     - Switch wallet network");
    println!("  status                         - Session, earnings and escrows");
    println!("  refresh                        - Refetch escrows");
    println!("  create <freelancer|n> <eth> <description>");
    println!("  accept|submit|release|dispute|cancel <id>");
    println!("  withdraw                       - Withdraw earnings");
    println!("  quit                           - Exit");
}

fn resolve_account(raw: &str) -> anyhow::Result<Address> {
    match raw.parse::<u32>() {
        Ok(index) => Ok(Devnet::account(index)),
        Err(_) => Ok(Address::parse(raw)?),
    }
}

fn escrow_id(args: &[&str]) -> anyhow::Result<u64> {
    let raw = args.first().ok_or_else(|| anyhow!("Missing escrow id"))?;
    raw.parse().with_context(|| format!("Invalid escrow id: {}", raw))
}

async fn repl_command(harness: &Harness, cmd: &str, args: &[&str]) -> anyhow::Result<Option<Value>> {
    let client = &harness.client;
    let receipt = match cmd {
        "connect" => {
            harness.connect().await?;
            return Ok(Some(json!(harness.session.snapshot())));
        }
        "disconnect" => {
            harness.session.disconnect();
            return Ok(None);
        }
        "account" => {
            let account = resolve_account(args.first().ok_or_else(|| anyhow!("Usage: account <n>"))?)?;
            harness.switch_to(&account).await?;
            return Ok(Some(json!(harness.session.snapshot())));
        }
        "chain" => {
            let raw = args.first().ok_or_else(|| anyhow!("Usage: chain <id>"))?;
            harness.active_wallet()?.switch_chain(raw.parse()?);
            return Ok(None);
        }
        "status" => return Ok(Some(harness.status())),
        "refresh" => {
            client.refresh().await?;
            return Ok(Some(harness.status()));
        }
        "create" => {
            let [freelancer, amount, description] = args else {
                bail!("Usage: create <freelancer|n> <eth> <description>");
            };
            let freelancer = resolve_account(freelancer)?;
            client.create_escrow(EscrowDraft::parse(description, freelancer.as_str(), amount)?).await?
        }
        "accept" => client.accept_escrow(escrow_id(args)?).await?,
        "submit" => client.submit_work(escrow_id(args)?).await?,
        "release" => client.approve_and_release(escrow_id(args)?).await?,
        "dispute" => client.dispute(escrow_id(args)?).await?,
        "cancel" => client.cancel_escrow(escrow_id(args)?).await?,
        "withdraw" => client.withdraw_earnings().await?,
        other => bail!("Unknown: {}. Type 'help'.", other),
    };
    Ok(Some(json!(receipt)))
}
