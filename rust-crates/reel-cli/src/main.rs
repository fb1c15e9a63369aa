use clap::{
    ArgGroup,
    Parser,
    Subcommand,
};
use color_eyre::eyre::{
    Report,
    Result,
    WrapErr,
    eyre,
};
use deployments::{
    DeploymentEnv,
    DeploymentRecord,
    DeploymentStore,
};
use reel_settlement::{
    config::SessionConfig,
    game_server::GameServerClient,
    reconciler::Reconciler,
    types::CharacterId,
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
    prelude::*,
};

#[derive(Parser, Debug)]
#[command(
    name = "reel-cli",
    about = "Inspect a reel deployment and reconcile character gold",
    version,
    group(
        ArgGroup::new("network")
            .args(["devnet", "testnet", "local"])
            .required(true)
    )
)]
struct Args {
    /// Use the Fuel devnet deployment
    #[arg(long)]
    devnet: bool,

    /// Use the Fuel testnet deployment
    #[arg(long)]
    testnet: bool,

    /// Use the local node deployment
    #[arg(long)]
    local: bool,

    /// Override the game server URL stored with the deployment
    #[arg(long)]
    game_server_url: Option<String>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long)]
    log_dir: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the stored deployment record
    Deployment,
    /// Print a character's authoritative gold entry
    Balance {
        #[arg(long)]
        character: u64,
    },
    /// Push a character's authoritative gold to the on-chain mirror
    SyncMirror {
        #[arg(long)]
        character: u64,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let Args {
        devnet,
        testnet,
        local: _,
        game_server_url,
        log_dir,
        command,
    } = Args::parse();
    let _log_guard = init_tracing(log_dir.as_deref())?;

    let env = if devnet {
        DeploymentEnv::Dev
    } else if testnet {
        DeploymentEnv::Test
    } else {
        DeploymentEnv::Local
    };
    deployments::ensure_structure().map_err(to_eyre)?;
    let store = DeploymentStore::new(env).map_err(to_eyre)?;
    let record = store
        .load()
        .map_err(to_eyre)?
        .ok_or_else(|| eyre!("no {env} deployment recorded in {}", store.path().display()))?;
    tracing::info!(%env, contract = %record.contract_id, "loaded deployment");

    match command {
        Command::Deployment => print_deployment(env, &record),
        Command::Balance { character } => {
            let client = game_server(game_server_url, &record)?;
            let character = CharacterId(character);
            let entry = client
                .gold_entry(character)
                .await
                .map_err(to_eyre)
                .wrap_err_with(|| format!("reading gold of character {character}"))?;
            println!(
                "character {character}: {} gold (last change: {}, at {})",
                entry.amount,
                entry.last_reason,
                entry.updated_at.to_rfc3339()
            );
            Ok(())
        }
        Command::SyncMirror { character } => {
            let client = game_server(game_server_url, &record)?;
            sync_mirror(client, CharacterId(character)).await
        }
    }
}

fn print_deployment(env: DeploymentEnv, record: &DeploymentRecord) -> Result<()> {
    let config = SessionConfig::from_deployment(record).map_err(to_eyre)?;
    println!("{env} deployment");
    println!("  contract:        {}", config.contract_id);
    println!("  chain id:        {}", config.required_chain_id);
    println!("  network url:     {}", record.network_url);
    println!(
        "  game server:     {}",
        record.game_server_url.as_deref().unwrap_or("<not set>")
    );
    println!("  deployed at:     {}", record.deployed_at);
    if let Some(height) = record.deployment_block_height {
        println!("  block height:    {height}");
    }
    match config.confirmation_timeout {
        Some(timeout) => println!("  confirm timeout: {}s", timeout.as_secs()),
        None => println!("  confirm timeout: none"),
    }
    println!(
        "  gas ceiling:     estimate x{}, min {}, fallback {}",
        config.gas_multiplier, config.min_gas_limit, config.fallback_gas_limit
    );
    Ok(())
}

fn game_server(
    override_url: Option<String>,
    record: &DeploymentRecord,
) -> Result<GameServerClient> {
    let url = match override_url {
        Some(url) => url,
        None => record
            .game_server_url()
            .map_err(to_eyre)?
            .to_string(),
    };
    GameServerClient::new(url).map_err(to_eyre)
}

/// Off-chain wins: the authoritative amount is re-read and pushed as is.
async fn sync_mirror(client: GameServerClient, character: CharacterId) -> Result<()> {
    let mut reconciler = Reconciler::new(client.clone(), client);
    reconciler.set_active(character);
    let entry = reconciler
        .resync(character)
        .await
        .map_err(to_eyre)
        .wrap_err_with(|| format!("reading gold of character {character}"))?;
    let report = reconciler.sync_mirror().await;
    if report.failed > 0 {
        return Err(eyre!(
            "on-chain mirror for character {character} could not be updated"
        ));
    }
    println!("character {character}: on-chain mirror set to {} gold", entry.amount);
    Ok(())
}

/// Keeps the whole `anyhow` context chain of library errors.
fn to_eyre(err: impl std::fmt::Display) -> Report {
    eyre!("{err:#}")
}

fn init_tracing(log_dir: Option<&str>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = fmt::layer().with_writer(std::io::stderr);
    let Some(dir) = log_dir else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr)
            .try_init()
            .wrap_err("installing tracing subscriber")?;
        return Ok(None);
    };
    let dir = shellexpand::tilde(dir).into_owned();
    let (writer, guard) = tracing_appender::non_blocking(rolling::daily(dir, "reel-cli.log"));
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .try_init()
        .wrap_err("installing tracing subscriber")?;
    Ok(Some(guard))
}
