// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use payid_cli::{
    config::{AppConfig, DEFAULT_CONFIG_FILE},
    session::{self, Session},
    FileStorage,
};
use std::{fs, path::PathBuf, str::FromStr};
use verifiable_payid::{Curve, PaymentInformation};

#[derive(Parser)]
#[command(name = "payid")]
#[command(about = "Build, sign, verify and inspect verifiable PayIDs", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new PayID
    Init {
        /// The PayID, e.g. alice$payid.example
        payid: String,
    },

    /// Print the current PayID
    Show,

    /// Load a PayID document from a file
    Load { file: PathBuf },

    /// Save the current PayID to a file
    Save { file: PathBuf },

    /// Edit the addresses of the current PayID
    Address {
        #[command(subcommand)]
        action: AddressAction,
    },

    /// Manage signing keys
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },

    /// Sign every address of the current PayID with the loaded keys
    Sign,

    /// Verify a PayID document, or the current PayID
    Verify { file: Option<PathBuf> },

    /// Inspect the signatures and certificates of a PayID document, or the
    /// current PayID
    Inspect { file: Option<PathBuf> },

    /// Remove the current PayID and all keys
    Clear,
}

#[derive(Subcommand)]
enum AddressAction {
    /// Add a crypto address
    Add {
        payment_network: String,
        environment: String,
        address: String,
        tag: Option<String>,
    },

    /// Remove an address
    Remove { address: String },
}

#[derive(Subcommand)]
enum KeysAction {
    /// Generate a new identity key
    Generate {
        /// P-256, secp256k1 or Ed25519
        #[arg(long, default_value = "P-256")]
        curve: String,

        /// File to write the private key to, as a JWK
        #[arg(short, long, default_value = "identity-key.json")]
        output: PathBuf,
    },

    /// Load a key from files
    Load {
        #[command(subcommand)]
        key: LoadAction,
    },

    /// List the loaded keys
    List,

    /// Remove all loaded keys
    Clear,
}

#[derive(Subcommand)]
enum LoadAction {
    /// Load an identity key (PEM or JWK)
    Identity { key: PathBuf },

    /// Load a server key and its certificate chain (PEM)
    Server { key: PathBuf, cert: PathBuf },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;

    let level = config.logging_level.as_deref().unwrap_or("info");
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let session = Session::new(FileStorage::new(&config.storage_dir));
    match cli.command {
        Commands::Init { payid } => print_json(&session.init(&payid)?)?,
        Commands::Show => print_json(&session.payment_information()?)?,
        Commands::Load { file } => print_json(&session.load(&file)?)?,
        Commands::Save { file } => {
            session.save(&file)?;
            println!("Saved to {}", file.display());
        }
        Commands::Address { action } => {
            let info = match action {
                AddressAction::Add {
                    payment_network,
                    environment,
                    address,
                    tag,
                } => session.add_address(&payment_network, &environment, &address, tag.as_deref())?,
                AddressAction::Remove { address } => session.remove_address(&address)?,
            };
            print_json(&info)?;
        }
        Commands::Keys { action } => run_keys(&session, action)?,
        Commands::Sign => print_json(&session.sign(&config)?)?,
        Commands::Verify { file } => {
            let info = read_payment_information(&session, file)?;
            let pay_id = info.pay_id().unwrap_or_default().to_owned();
            match session::verify(&info, &config.validator()?) {
                Some(verified) => {
                    print_json(&verified)?;
                    println!("Successfully verified {pay_id}");
                }
                None => bail!("Failed to verify {pay_id}"),
            }
        }
        Commands::Inspect { file } => {
            let info = read_payment_information(&session, file)?;
            for line in session::inspection_report(&info, &config.validator()?)? {
                println!("{line}");
            }
        }
        Commands::Clear => {
            session.clear()?;
            println!("Cleared PayID and keys");
        }
    }
    Ok(())
}

fn run_keys(session: &Session<FileStorage>, action: KeysAction) -> Result<()> {
    match action {
        KeysAction::Generate { curve, output } => {
            let jwk = session.generate_identity_key(Curve::from_str(&curve)?, Some(&output))?;
            println!("Wrote identity key to {}", output.display());
            print_json(&jwk.to_public_only())?;
        }
        KeysAction::Load {
            key: LoadAction::Identity { key },
        } => {
            log::info!("Loading identity-key from {}", key.display());
            print_json(&session.load_identity_key(&key)?)?;
        }
        KeysAction::Load {
            key: LoadAction::Server { key, cert },
        } => {
            log::info!("Loading server-key from {}", key.display());
            log::info!("Loading server-cert from {}", cert.display());
            session.load_server_key(&key, &cert)?;
            println!("Success. Sign away.");
        }
        KeysAction::List => {
            for line in session.list_keys()? {
                println!("{line}");
            }
        }
        KeysAction::Clear => {
            session.clear_keys()?;
            println!("Cleared keys");
        }
    }
    Ok(())
}

fn read_payment_information(
    session: &Session<FileStorage>,
    file: Option<PathBuf>,
) -> Result<PaymentInformation> {
    match file {
        Some(file) => {
            let contents = fs::read_to_string(&file)
                .with_context(|| format!("failed to read '{}'", file.display()))?;
            PaymentInformation::from_json(&contents)
                .with_context(|| format!("'{}' is not a PayID document", file.display()))
        }
        None => session.payment_information(),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
