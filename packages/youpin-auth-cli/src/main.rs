//! youpin-auth
//!
//! Operator tooling over `youpin-auth-core`:
//!
//! 1. **keygen**: provision an RSA-2048 key pair in the base64 DER form the
//!    vendor console expects.
//!
//! 2. **sign**: sign a parameter set, print the canonical string and verify
//!    the signature against the derived public key.
//!
//! 3. **handshake**: mint a device verification token and write the result
//!    as JSON.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, eyre, Result, WrapErr};
use serde::Serialize;
use serde_json::{json, Value};

use youpin_auth_core::config::PRIVATE_KEY_VAR;
use youpin_auth_core::signing::verify_signature;
use youpin_auth_core::{
    AuthConfig, DeviceProfile, EnvSecret, FileSecret, FingerprintConfig, GatewayTimestamp,
    HandshakeClient, HandshakeConfig, HandshakeState, KeyPair, Provenance, RequestSigner,
    SignatureRequest,
};

const PUBLIC_KEY_FILE: &str = "public_key_base64.txt";
const PRIVATE_KEY_FILE: &str = "private_key_base64.txt";

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "youpin-auth", version, about = "Youpin gateway signing and device tokens")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate an RSA-2048 key pair (PKCS#8 private, SPKI public, base64)
    Keygen {
        /// Directory to write the key files into
        #[arg(short, long, default_value = "./keys")]
        output: PathBuf,
    },

    /// Sign a parameter set and verify the result
    Sign {
        /// File holding the base64 PKCS#8 private key.
        /// Falls back to the YOUPIN_PRIVATE_KEY variable when absent.
        #[arg(long, env = "YOUPIN_PRIVATE_KEY_FILE")]
        private_key_file: Option<PathBuf>,

        /// Vendor-issued application key
        #[arg(long, env = "YOUPIN_APP_KEY")]
        app_key: String,

        /// Parameters as a JSON object (a sample purchase order by default)
        #[arg(long)]
        params: Option<String>,

        /// Gateway timestamp `YYYY-MM-DD HH:mm:ss` (UTC+8); now by default
        #[arg(long)]
        timestamp: Option<String>,
    },

    /// Mint a device verification token
    Handshake {
        #[arg(long)]
        user_id: Option<String>,

        /// Previously issued token to present again
        #[arg(long)]
        existing_uk: Option<String>,

        #[arg(long, default_value_t = 1920)]
        screen_width: u32,

        #[arg(long, default_value_t = 1080)]
        screen_height: u32,

        #[arg(long, default_value = "zh-CN")]
        language: String,

        #[arg(long)]
        user_agent: Option<String>,

        /// Fixed canvas hash; random per run when absent
        #[arg(long)]
        canvas_hash: Option<String>,

        /// Verification endpoint (overrides YOUPIN_DEVICE_ENDPOINT)
        #[arg(long)]
        endpoint: Option<String>,

        /// Accept invalid TLS certificates
        #[arg(long)]
        skip_tls_verify: bool,

        /// Succeed even when only a local-fallback token was obtained
        #[arg(long)]
        allow_fallback: bool,

        /// Write the JSON result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "youpin_auth=info,youpin_auth_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Command::Keygen { output } => keygen(&output),
        Command::Sign {
            private_key_file,
            app_key,
            params,
            timestamp,
        } => sign(private_key_file, app_key, params, timestamp),
        Command::Handshake {
            user_id,
            existing_uk,
            screen_width,
            screen_height,
            language,
            user_agent,
            canvas_hash,
            endpoint,
            skip_tls_verify,
            allow_fallback,
            output,
        } => {
            let mut config = HandshakeConfig::from_env()?;
            if let Some(endpoint) = endpoint {
                config.endpoint = endpoint;
            }
            if let Some(ua) = user_agent {
                config.user_agent = ua;
            }
            config.skip_tls_verify |= skip_tls_verify;

            // The header and the fingerprint must claim the same browser
            let fingerprint = FingerprintConfig {
                screen_width,
                screen_height,
                language,
                canvas_hash,
                user_agent: config.user_agent.clone(),
                ..FingerprintConfig::default()
            };

            let mut profile = DeviceProfile::new(fingerprint);
            profile.user_id = user_id;
            profile.existing_uk = existing_uk;

            handshake(&config, profile, allow_fallback, output.as_deref()).await
        }
    }
}

// ── keygen ────────────────────────────────────────────────────────────────────

fn keygen(output: &Path) -> Result<()> {
    let pair = KeyPair::generate()?;

    fs::create_dir_all(output)
        .wrap_err_with(|| format!("failed to create {}", output.display()))?;

    let public_path = output.join(PUBLIC_KEY_FILE);
    fs::write(&public_path, &pair.public_key)
        .wrap_err_with(|| format!("failed to write {}", public_path.display()))?;

    let private_path = output.join(PRIVATE_KEY_FILE);
    write_private(&private_path, &pair.private_key)
        .wrap_err_with(|| format!("failed to write {}", private_path.display()))?;

    println!("Public key  (SPKI, base64):  {}", public_path.display());
    println!("Private key (PKCS#8, base64): {}", private_path.display());
    println!();
    println!("Public key:  {}...", prefix(&pair.public_key, 48));
    println!("Private key: {}...", prefix(&pair.private_key, 16));
    Ok(())
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents.as_bytes())
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(contents.as_bytes())
}

// ── sign ──────────────────────────────────────────────────────────────────────

fn sign(
    private_key_file: Option<PathBuf>,
    app_key: String,
    params: Option<String>,
    timestamp: Option<String>,
) -> Result<()> {
    let config = match private_key_file {
        Some(path) => AuthConfig::new(app_key, FileSecret::new(path)),
        None => AuthConfig::new(app_key, EnvSecret::new(PRIVATE_KEY_VAR)),
    };
    let keys = config.load_key_material()?;
    tracing::info!(fingerprint = %keys.fingerprint(), "Loaded signing key");

    let params: Value = match params {
        Some(raw) => serde_json::from_str(&raw).wrap_err("--params is not valid JSON")?,
        None => sample_params(),
    };
    let request = SignatureRequest::from_serializable(&params)?;

    let timestamp = match timestamp {
        Some(ts) => GatewayTimestamp::parse(&ts)?,
        None => GatewayTimestamp::now(),
    };

    let public_key = keys.public_key_base64()?;
    let signer = RequestSigner::new(keys);
    let envelope = signer.sign(request, &timestamp)?;

    println!("Canonical string:\n{}\n", envelope.canonical());
    println!("Signature:\n{}\n", envelope.sign());
    println!("Signature length: {} chars", envelope.sign().len());
    println!("Envelope:\n{}", serde_json::to_string_pretty(&envelope)?);

    verify_signature(&public_key, envelope.params(), envelope.sign())
        .map_err(|e| eyre!("self-verification failed: {e}"))?;
    println!("\n[OK] Signature verifies against the derived public key");
    Ok(())
}

/// The purchase order the vendor documentation signs
fn sample_params() -> Value {
    json!({
        "idempotentId": "202212050001",
        "purchasingInfoList": [{
            "commodityId": 28347880,
            "commodityPrice": 0.12,
            "tradeLinks": "https://steamcommunity.com/tradeoffer/new/?partner=12345678912&token=LBPW679"
        }]
    })
}

// ── handshake ─────────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HandshakeReport {
    uk: String,
    provenance: Provenance,
    generated_at: String,
    final_state: HandshakeState,
    trace: Vec<HandshakeState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<String>,
    config: FingerprintConfig,
}

async fn handshake(
    config: &HandshakeConfig,
    profile: DeviceProfile,
    allow_fallback: bool,
    output: Option<&Path>,
) -> Result<()> {
    let client = HandshakeClient::new(config)?;
    let outcome = client.mint(&profile).await;

    let provenance = outcome.token.provenance();
    eprintln!("Token provenance: {provenance}");
    eprintln!("Final state:      {}", outcome.final_state);

    let report = HandshakeReport {
        uk: outcome.token.expose().to_string(),
        provenance,
        generated_at: chrono::Local::now().to_rfc3339(),
        final_state: outcome.final_state,
        trace: outcome.trace.clone(),
        failure: outcome.failure.as_ref().map(ToString::to_string),
        config: profile.config.clone(),
    };
    let rendered = serde_json::to_string_pretty(&report)?;

    match output {
        Some(path) => {
            fs::write(path, &rendered)
                .wrap_err_with(|| format!("failed to write {}", path.display()))?;
            eprintln!("Result written to {}", path.display());
        }
        None => println!("{rendered}"),
    }

    if !outcome.is_server_issued() && !allow_fallback {
        bail!(
            "only a local-fallback token was obtained ({}); the gateway will not honor it. \
             Pass --allow-fallback to accept it anyway",
            outcome
                .failure
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "no failure recorded".into())
        );
    }
    Ok(())
}

fn prefix(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
