use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use clap::Parser;
use tokio::{
    io::{AsyncBufReadExt, BufReader, Lines, Stdin},
    sync::Mutex,
};
use tokio_util::sync::CancellationToken;
use tonconnect_wallet::{
    dto::{SendTransactionRequest, TonNetwork, TransferMessage},
    interfaces::{ConnectionApproval, TransactionApproval, UnsignedTransfer},
    manifest::ManifestClient,
    utils::decode_hex32,
    vault::MemoryKeyVault,
    ApprovalUi, BridgeTransport, BridgeUpdate, Config, ConnectionController, HttpBridge, KeyVault,
    RequestDispatcher, SessionRegistry, Wallet, WalletAddress, WalletContract, WalletKind,
    WalletServices,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Connects a single key wallet to dapps from the command line.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Ed25519 seed of the wallet key, hex.
    #[arg(long, env = "TC_WALLET_SEED", value_parser = decode_hex32, hide_env_values = true)]
    seed: [u8; 32],

    /// Wallet address in raw form, `0:<hex>`.
    #[arg(long, env = "TC_WALLET_ADDRESS")]
    address: WalletAddress,

    /// Base64 BOC of the wallet's state init.
    #[arg(long, env = "TC_WALLET_STATE_INIT", default_value = "")]
    state_init: String,

    #[arg(long)]
    testnet: bool,

    /// `tc://` deeplinks or universal links to connect to.
    links: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load()?;

    let wallet = Wallet {
        address: args.address,
        network: if args.testnet {
            TonNetwork::Testnet
        } else {
            TonNetwork::Mainnet
        },
        kind: WalletKind::Regular,
    };

    let vault = Arc::new(MemoryKeyVault::new());
    vault.insert_key(wallet.address, args.seed);
    let services = WalletServices {
        vault: Arc::clone(&vault) as Arc<dyn KeyVault>,
        contract: Arc::new(ConfiguredContract {
            state_init: args.state_init,
        }),
        approval: Arc::new(StdinApproval::new()),
    };

    let relay = HttpBridge::new(&config.bridge_url, config.http_timeout)?;
    let (bridge, events) = BridgeTransport::new(Arc::new(relay), config.retry_delay);
    let registry = Arc::new(SessionRegistry::new(Arc::clone(&vault) as Arc<dyn KeyVault>));
    let dispatcher = Arc::new(RequestDispatcher::new(
        services.clone(),
        Arc::clone(&registry),
        bridge.clone(),
        config.max_messages,
        config.message_ttl,
    ));
    let controller = ConnectionController::new(
        config.clone(),
        services,
        ManifestClient::new(config.http_timeout)?,
        Arc::clone(&registry),
        Arc::clone(&dispatcher),
        bridge.clone(),
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(Arc::clone(&dispatcher).run(events, shutdown.clone()));
    tokio::spawn(log_bridge_state(bridge.clone(), shutdown.clone()));

    controller.restore(&wallet).await?;
    for link in &args.links {
        match controller.connect(&wallet, link).await {
            Ok(record) => info!(dapp = %record.manifest.url, "connected"),
            Err(e) => warn!(error = %e, "connect failed"),
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    shutdown.cancel();
    bridge.stop();
    Ok(())
}

async fn log_bridge_state(bridge: BridgeTransport, shutdown: CancellationToken) {
    let mut updates = bridge.subscribe();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            update = updates.recv() => match update {
                Ok(BridgeUpdate::State(state)) => info!(?state, "bridge state"),
                Ok(BridgeUpdate::Event(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            },
        }
    }
}

/// Asks on the terminal. Answers are read line by line, one prompt at a time.
struct StdinApproval {
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl StdinApproval {
    fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }

    async fn ask(&self, question: String) -> bool {
        let mut lines = self.lines.lock().await;
        println!("{question} [y/N]");
        match lines.next_line().await {
            Ok(Some(answer)) => matches!(answer.trim(), "y" | "Y" | "yes"),
            _ => false,
        }
    }
}

#[async_trait]
impl ApprovalUi for StdinApproval {
    async fn approve_connection(&self, request: &ConnectionApproval) -> bool {
        let proof = if request.proof_requested {
            " and prove ownership"
        } else {
            ""
        };
        self.ask(format!(
            "Connect {} to {} ({}){proof}?",
            request.wallet, request.manifest.name, request.manifest.url
        ))
        .await
    }

    async fn approve_transaction(&self, request: &TransactionApproval) -> bool {
        self.ask(format!(
            "{} asks to send {} message(s), {} nanoton in total. Sign?",
            request.manifest.name,
            request.request.messages.len(),
            total_amount(&request.request.messages)
        ))
        .await
    }
}

/// Sum of the parsable amounts, saturating on absurd values.
fn total_amount(messages: &[TransferMessage]) -> u128 {
    messages
        .iter()
        .filter_map(|m| m.amount.parse::<u128>().ok())
        .fold(0u128, u128::saturating_add)
}

/// Knows the wallet's state init but has no cell codec for transfers.
struct ConfiguredContract {
    state_init: String,
}

#[async_trait]
impl WalletContract for ConfiguredContract {
    async fn state_init(&self, _: &Wallet) -> anyhow::Result<String> {
        Ok(self.state_init.clone())
    }

    async fn build_transfer(
        &self,
        wallet: &Wallet,
        _: &SendTransactionRequest,
    ) -> anyhow::Result<UnsignedTransfer> {
        Err(anyhow!("building transfers for {} needs a cell codec", wallet.address))
    }

    async fn send_signed(
        &self,
        _: &Wallet,
        _: UnsignedTransfer,
        _: [u8; 64],
    ) -> anyhow::Result<String> {
        Err(anyhow!("no transfer to send"))
    }
}
