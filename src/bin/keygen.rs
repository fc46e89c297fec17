//! Keypair generator for ppe-relay.
//!
//! Generates an operator key and a bot key and writes them as `.env` lines:
//! - `OPERATOR_PRIVATE_KEY` / `BOT_PRIVATE_KEY` with the hex secrets
//! - the matching public keys as comments
//!
//! Usage:
//!   cargo run --bin ppe-keygen [output-dir]

use color_eyre::eyre::{bail, WrapErr};
use ppe_relay::config::{BOT_KEY_VAR, OPERATOR_KEY_VAR};
use ppe_relay::Keys;
use std::env;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    println!("Keypair generator for ppe-relay\n");

    let output_dir = match env::args().nth(1) {
        Some(dir) => PathBuf::from(dir),
        None => env::current_dir().wrap_err("Failed to get current directory")?,
    };
    fs::create_dir_all(&output_dir).wrap_err("Failed to create output directory")?;

    let env_path = output_dir.join("operator.env");
    if env_path.exists() {
        bail!("{} already exists; refusing to overwrite keys", env_path.display());
    }

    println!("Generating secp256k1 keypairs...");
    let operator = Keys::generate();
    let bot = Keys::generate();

    let mut file = fs::File::create(&env_path).wrap_err("Failed to create env file")?;
    writeln!(
        file,
        "# ppe-relay keys, generated {}",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    )?;
    writeln!(file, "# operator pubkey: {}", operator.public_key())?;
    writeln!(file, "{OPERATOR_KEY_VAR}={}", operator.secret_hex())?;
    writeln!(file, "# bot pubkey: {}", bot.public_key())?;
    writeln!(file, "{BOT_KEY_VAR}={}", bot.secret_hex())?;

    println!("\nKeys saved to: {}", env_path.display());
    println!("  WARNING: Keep this file secure! Anyone holding it can sign as the relay.");
    println!("\nOperator public key (zap this to buy credit): {}", operator.public_key());
    println!("Bot public key (signs balance replies):       {}", bot.public_key());
    println!("\nCopy the file to .env next to ppe-relay to use it.");
    Ok(())
}
