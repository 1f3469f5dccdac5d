//! Encrypt or decrypt the custodial signing key with `SECRET_KEY`/`SECRET_IV`.
//!
//! The output of `encrypt` is the value expected in `ADMIN_PRIVATE_KEY_SOLANA`.
//!
//! Usage:
//!   cargo run --bin encrypt_secret -- encrypt <secret>
//!   cargo run --bin encrypt_secret -- decrypt <ciphertext>
//!   cargo run --bin encrypt_secret -- generate
//!
//! When the value argument is omitted it is read from stdin.

use std::io::Read;

use anyhow::{Context, Result, bail};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};

use solana_reward_relayer::infra::KeyVault;
use solana_reward_relayer::infra::blockchain::decode_signing_key;

fn read_value(arg: Option<String>) -> Result<String> {
    match arg {
        Some(value) => Ok(value),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read value from stdin")?;
            Ok(buf.trim().to_string())
        }
    }
}

fn env_secret(name: &str) -> Result<SecretString> {
    let value = std::env::var(name).with_context(|| format!("{} must be set", name))?;
    Ok(SecretString::from(value))
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let mut args = std::env::args().skip(1);
    let command = args.next().unwrap_or_default();
    let vault = KeyVault::new(&env_secret("SECRET_KEY")?, &env_secret("SECRET_IV")?);

    match command.as_str() {
        "encrypt" => {
            let secret = SecretString::from(read_value(args.next())?);
            let signer = decode_signing_key(&secret)
                .context("Value is not a JSON array, base64 or base58 Solana keypair")?;
            let ciphertext = vault.encrypt(secret.expose_secret())?;

            eprintln!(
                "Public key: {}",
                bs58::encode(signer.verifying_key().as_bytes()).into_string()
            );
            println!("{}", ciphertext);
        }
        "decrypt" => {
            let ciphertext = read_value(args.next())?;
            let secret = vault.decrypt(&ciphertext)?;
            println!("{}", secret.expose_secret());
        }
        "generate" => {
            let signer = SigningKey::generate(&mut OsRng);
            let keypair = signer.to_keypair_bytes();
            let secret = bs58::encode(keypair).into_string();

            println!(
                "ADMIN_PUBLIC_KEY_SOLANA={}",
                bs58::encode(signer.verifying_key().as_bytes()).into_string()
            );
            println!("ADMIN_PRIVATE_KEY_SOLANA={}", vault.encrypt(&secret)?);
        }
        other => bail!(
            "unknown command {:?}; expected one of: encrypt, decrypt, generate",
            other
        ),
    }

    Ok(())
}
