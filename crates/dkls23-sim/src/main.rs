//! DKLs23 session simulator
//!
//! Drives every party of a session in one process over the in-memory router:
//! - Distributed Key Generation (DKG)
//! - Key Refresh
//! - Distributed Signature Generation (DSG)
//! - Non-hardened child derivation

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dkls23_mpc::{
    keygen,
    network::{MemoryNetwork, PartyAuth},
    sign, Quorum, Secp256k1, SessionConfig, SessionId, Shard, ShareholderId, DEFAULT_PARTIES,
    DEFAULT_THRESHOLD,
};
use futures_util::future::try_join_all;
use rand::rngs::OsRng;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, Level};

type SimShard = Shard<Secp256k1>;

/// DKLs23 Sim - threshold ECDSA in one process
#[derive(Parser)]
#[command(name = "dkls23-sim")]
#[command(about = "Simulates every party of a DKLs23 threshold ECDSA session")]
#[command(version)]
struct Cli {
    /// Data directory for shards
    #[arg(short, long, env = "DKLS_DEST", default_value = "./data")]
    dest: PathBuf,

    /// Authenticate broadcasts with echo broadcast (needs three or more parties)
    #[arg(long, env = "DKLS_ECHO")]
    echo: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run distributed key generation for parties 1..=N
    Keygen {
        /// Number of parties
        #[arg(short = 'n', long, env = "DKLS_PARTIES", default_value_t = DEFAULT_PARTIES)]
        parties: u16,

        /// Threshold (t-of-n)
        #[arg(short, long, env = "DKLS_THRESHOLD", default_value_t = DEFAULT_THRESHOLD)]
        threshold: u16,
    },

    /// Refresh every stored shard
    Refresh,

    /// Sign a message
    Sign {
        /// Message to sign; hashed with SHA-256
        #[arg(short, long)]
        message: String,

        /// Signing party IDs (comma-separated)
        #[arg(short, long, env = "DKLS_SIGNERS")]
        signers: String,
    },

    /// Derive child shards for every party
    Derive {
        /// BIP32 derivation path (e.g., m/0/1/42)
        #[arg(short, long)]
        path: String,
    },

    /// Show shard info
    Info {
        /// Party whose shard to show
        #[arg(short, long, env = "DKLS_PARTY_ID")]
        party_id: ShareholderId,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    std::fs::create_dir_all(&cli.dest)?;

    match &cli.command {
        Commands::Keygen { parties, threshold } => {
            run_keygen(&cli, *parties, *threshold).await?;
        }
        Commands::Refresh => {
            run_refresh(&cli).await?;
        }
        Commands::Sign { message, signers } => {
            run_sign(&cli, message, signers).await?;
        }
        Commands::Derive { path } => {
            run_derive(&cli, path)?;
        }
        Commands::Info { party_id } => {
            show_info(&cli, *party_id)?;
        }
    }

    Ok(())
}

fn credentials(cli: &Cli, quorum: &Quorum) -> Option<BTreeMap<ShareholderId, PartyAuth>> {
    cli.echo.then(|| PartyAuth::generate(quorum, &mut OsRng))
}

async fn run_keygen(cli: &Cli, n: u16, t: u16) -> Result<()> {
    let parties = Quorum::first(n)?;
    let network = MemoryNetwork::new(parties.iter());
    let session_id: SessionId = rand::random();
    let auth = credentials(cli, &parties);

    info!(n_parties = n, threshold = t, "Starting DKG");

    let mut runs = Vec::new();
    for id in parties.iter() {
        let config = SessionConfig::with_session_id(session_id, parties.clone(), t, id)?;
        let router = network.endpoint(id)?;
        let auth = auth.as_ref().map(|auth| &auth[&id]);
        runs.push(async move {
            keygen::run_dkg::<Secp256k1, _>(&config, &router, auth).await
        });
    }
    let shards = try_join_all(runs).await?;

    for shard in &shards {
        save_shard(&shard_path(&cli.dest, shard.id()), shard)?;
    }
    let public_key = shards
        .first()
        .map(|shard| hex::encode(shard.public_key_bytes()))
        .unwrap_or_default();
    info!(public_key = %public_key, path = ?cli.dest, "DKG completed, shards saved");

    println!("Public Key: {}", public_key);
    Ok(())
}

async fn run_refresh(cli: &Cli) -> Result<()> {
    let shards = load_all_shards(&cli.dest)?;
    let Some(first) = shards.values().next() else {
        bail!("no shards found in {}", cli.dest.display());
    };
    let parties = first.shareholders().clone();
    let network = MemoryNetwork::new(parties.iter());
    let session_id: SessionId = rand::random();
    let auth = credentials(cli, &parties);

    info!(shareholders = %parties, "Starting key refresh");

    let mut runs = Vec::new();
    for id in parties.iter() {
        let shard = shards
            .get(&id)
            .with_context(|| format!("missing shard for party {}", id))?;
        let router = network.endpoint(id)?;
        let auth = auth.as_ref().map(|auth| &auth[&id]);
        runs.push(async move { keygen::run_key_refresh(shard, session_id, &router, auth).await });
    }
    let refreshed = try_join_all(runs).await?;

    for shard in &refreshed {
        save_shard(&shard_path(&cli.dest, shard.id()), shard)?;
    }
    info!("Key refresh completed");
    Ok(())
}

async fn run_sign(cli: &Cli, message: &str, signers: &str) -> Result<()> {
    let ids: Vec<ShareholderId> = signers
        .split(',')
        .map(|s| s.trim().parse())
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("signers must be comma-separated party IDs")?;
    let quorum = Quorum::new(ids)?;

    let mut shards = BTreeMap::new();
    for id in quorum.iter() {
        shards.insert(id, load_shard(&shard_path(&cli.dest, id))?);
    }
    let network = MemoryNetwork::new(quorum.iter());
    let session_id: SessionId = rand::random();
    let auth = credentials(cli, &quorum);

    info!(quorum = %quorum, message = message, "Starting DSG");

    let mut runs = Vec::new();
    for (id, shard) in &shards {
        let router = network.endpoint(*id)?;
        let auth = auth.as_ref().map(|auth| &auth[id]);
        let quorum = &quorum;
        runs.push(async move {
            sign::run_dsg(shard, quorum, session_id, message.as_bytes(), &router, auth).await
        });
    }
    let signatures = try_join_all(runs).await?;
    let Some(signature) = signatures.first() else {
        bail!("no signature produced");
    };

    info!(
        r = hex::encode(signature.r),
        s = hex::encode(signature.s),
        recovery_id = signature.recovery_id,
        "Signature generated"
    );

    println!("Signature:");
    println!("  r: {}", hex::encode(signature.r));
    println!("  s: {}", hex::encode(signature.s));
    println!("  v: {}", signature.recovery_id);
    println!("  DER: {}", hex::encode(signature.to_der()?));

    Ok(())
}

fn run_derive(cli: &Cli, path: &str) -> Result<()> {
    let shards = load_all_shards(&cli.dest)?;
    if shards.is_empty() {
        bail!("no shards found in {}", cli.dest.display());
    }

    info!(path = path, "Deriving child shards");

    let mut public_key = String::new();
    for (id, shard) in &shards {
        let derived = shard.derive_path(path)?;
        let derived_path = cli.dest.join(format!("shard.{}.derived.json", id));
        save_shard(&derived_path, &derived)?;
        public_key = hex::encode(derived.public_key_bytes());
    }

    info!(public_key = %public_key, "Child shards derived and saved");
    println!("Derived Public Key: {}", public_key);
    Ok(())
}

fn show_info(cli: &Cli, party_id: ShareholderId) -> Result<()> {
    let shard = load_shard(&shard_path(&cli.dest, party_id))?;

    println!("Shard Info:");
    println!("  Party ID: {}", shard.id());
    println!("  Shareholders: {}", shard.shareholders());
    println!("  Threshold: {}", shard.threshold());
    println!("  Public Key: {}", hex::encode(shard.public_key_bytes()));
    println!("  Chain Code: {}", hex::encode(shard.chain_code()));
    println!("  Library Version: {}", dkls23_mpc::VERSION);

    Ok(())
}

fn shard_path(dest: &Path, id: ShareholderId) -> PathBuf {
    dest.join(format!("shard.{}.json", id))
}

fn save_shard(path: &Path, shard: &SimShard) -> Result<()> {
    let json = serde_json::to_string_pretty(shard)?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn load_shard(path: &Path) -> Result<SimShard> {
    let json =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let shard: SimShard = serde_json::from_str(&json)?;
    shard.validate()?;
    Ok(shard)
}

fn load_all_shards(dest: &Path) -> Result<BTreeMap<ShareholderId, SimShard>> {
    let mut shards = BTreeMap::new();
    for entry in std::fs::read_dir(dest)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let Some(id) = name
            .strip_prefix("shard.")
            .and_then(|rest| rest.strip_suffix(".json"))
            .and_then(|id| id.parse::<ShareholderId>().ok())
        else {
            continue;
        };
        shards.insert(id, load_shard(&path)?);
    }
    Ok(shards)
}
