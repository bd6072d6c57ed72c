use std::path::PathBuf;

use anyhow::Context;
use atomic_escrow_client::interface::{
    load_input_data, read_keypair_file, write_keypair_file, ClientConfig,
};
use atomic_escrow_client::EscrowClient;
use atomic_escrow_core::interface::save_escrow_data;
use atomic_escrow_core::{Address, EscrowMetadata, EscrowParams, EscrowState};
use clap::{Parser, Subcommand, ValueHint};
use ed25519_dalek::SigningKey;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "./escrow_config.json";
const DEFAULT_KEYPAIR_PATH: &str = "./keypair.json";
const DEFAULT_ESCROW_PARAMS_PATH: &str = "./escrow_params.json";
const DEFAULT_ESCROW_METADATA_PATH: &str = "./escrow_metadata.json";

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::load(&cli.config)?;

    match cli.command {
        Commands::Keygen { outfile, force } => {
            if outfile.exists() && !force {
                anyhow::bail!("{:?} already exists; pass --force to overwrite", outfile);
            }
            let key = SigningKey::from_bytes(&rand::random());
            write_keypair_file(&outfile, &key)
                .with_context(|| format!("writing keypair to {:?}", outfile))?;
            println!("{}", Address::from(&key.verifying_key()));
        }
        Commands::Airdrop { to, lamports } => {
            let client = EscrowClient::open(&config)?;
            let total = client.airdrop(&to, lamports)?;
            tracing::info!(%to, total, "Airdrop complete");
        }
        Commands::CreateAsset { decimals } => {
            let client = EscrowClient::open(&config)?;
            println!("{}", client.create_asset(decimals)?);
        }
        Commands::Mint { asset, to, amount } => {
            let client = EscrowClient::open(&config)?;
            let balance = client.mint(&to, &asset, amount)?;
            tracing::info!(%to, %asset, balance, "Mint complete");
        }
        Commands::Make {
            keypair,
            params,
            outfile,
        } => {
            let key = read_keypair_file(&keypair)?;
            let params: EscrowParams = load_input_data(&params)?;

            let client = EscrowClient::open(&config)?;
            let metadata = client.make(&key, &params)?;
            // For reuse later during `Take` or `Cancel`
            save_escrow_data(&outfile, &metadata)?;
            tracing::info!(escrow = %metadata.escrow, "Escrow created successfully");
        }
        Commands::Take { keypair, metadata } => {
            let key = read_keypair_file(&keypair)?;
            let mut escrow: EscrowMetadata = load_input_data(&metadata)?;

            let client = EscrowClient::open(&config)?;
            let settlement = client.take(&key, &escrow)?;
            escrow.state = EscrowState::Closed;
            save_escrow_data(&metadata, &escrow)?;
            tracing::info!(
                received = settlement.released,
                paid = settlement.paid,
                "Escrow taken successfully"
            );
        }
        Commands::Cancel { keypair, metadata } => {
            let key = read_keypair_file(&keypair)?;
            let mut escrow: EscrowMetadata = load_input_data(&metadata)?;

            let client = EscrowClient::open(&config)?;
            let refund = client.cancel(&key, &escrow)?;
            escrow.state = EscrowState::Closed;
            save_escrow_data(&metadata, &escrow)?;
            tracing::info!(refunded = refund.refunded, "Escrow cancelled successfully");
        }
        Commands::Show { escrow } => {
            let client = EscrowClient::open(&config)?;
            let metadata = client.show(&escrow)?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
        }
        Commands::Balance { owner, asset } => {
            let client = EscrowClient::open(&config)?;
            match asset {
                Some(asset) => println!("{}", client.balance(&owner, &asset)),
                None => println!("{}", client.lamports(&owner)),
            }
        }
    }

    Ok(())
}

#[derive(Parser)]
#[command(name = "atomic-escrow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Client configuration file; missing means defaults.
    #[arg(long, global = true,
        env = "ATOMIC_ESCROW_CONFIG",
        default_value = DEFAULT_CONFIG_PATH,
        value_hint = ValueHint::FilePath)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a keypair file and print its public address
    Keygen {
        #[arg(short, long,
            value_parser,
            default_value = DEFAULT_KEYPAIR_PATH,
            value_hint = ValueHint::FilePath)]
        outfile: PathBuf,

        #[arg(long)]
        force: bool,
    },
    /// Credit native lamports to an identity
    Airdrop {
        to: Address,
        lamports: u64,
    },
    /// Register a new asset and print its id
    CreateAsset {
        #[arg(short, long, default_value_t = 6)]
        decimals: u8,
    },
    /// Issue units of an asset into an identity's balance account
    Mint {
        #[arg(short, long)]
        asset: Address,
        #[arg(short, long)]
        to: Address,
        amount: u64,
    },
    /// Open an escrow from a params file
    Make {
        #[arg(short, long,
            value_parser,
            default_value = DEFAULT_KEYPAIR_PATH,
            value_hint = ValueHint::FilePath)]
        keypair: PathBuf,

        #[arg(short, long,
            value_parser,
            default_value = DEFAULT_ESCROW_PARAMS_PATH,
            value_hint = ValueHint::FilePath)]
        params: PathBuf,

        #[arg(short, long,
            value_parser,
            default_value = DEFAULT_ESCROW_METADATA_PATH,
            value_hint = ValueHint::FilePath)]
        outfile: PathBuf,
    },
    /// Pay the asking price and receive the deposit
    Take {
        #[arg(short, long,
            value_parser,
            default_value = DEFAULT_KEYPAIR_PATH,
            value_hint = ValueHint::FilePath)]
        keypair: PathBuf,

        #[arg(short, long,
            value_parser,
            default_value = DEFAULT_ESCROW_METADATA_PATH,
            value_hint = ValueHint::FilePath)]
        metadata: PathBuf,
    },
    /// Return the deposit to the maker
    Cancel {
        #[arg(short, long,
            value_parser,
            default_value = DEFAULT_KEYPAIR_PATH,
            value_hint = ValueHint::FilePath)]
        keypair: PathBuf,

        #[arg(short, long,
            value_parser,
            default_value = DEFAULT_ESCROW_METADATA_PATH,
            value_hint = ValueHint::FilePath)]
        metadata: PathBuf,
    },
    /// Print an open escrow
    Show {
        escrow: Address,
    },
    /// Print an asset balance, or lamports when no asset is given
    Balance {
        owner: Address,
        #[arg(short, long)]
        asset: Option<Address>,
    },
}
