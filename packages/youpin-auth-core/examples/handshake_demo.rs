//! # Device Handshake Demo
//!
//! Builds a device fingerprint, runs the handshake against the configured
//! verification endpoint and shows how the resulting token may be used.
//!
//! ## Run
//!
//! ```bash
//! cargo run --example handshake_demo
//! ```
//!
//! `YOUPIN_DEVICE_ENDPOINT` and the other `YOUPIN_*` handshake variables are
//! honored. Without network access the demo ends with a local-fallback token.

use youpin_auth_core::handshake::FingerprintBuilder;
use youpin_auth_core::{
    DeviceProfile, FingerprintConfig, HandshakeClient, HandshakeConfig, TokenPolicy,
};

#[tokio::main]
async fn main() {
    println!("=== Youpin Auth Core: Device Handshake Demo ===\n");

    // Step 1: Configuration
    println!("Step 1: Loading handshake configuration...");

    let config = HandshakeConfig::from_env().expect("Invalid handshake configuration");
    println!("  Endpoint: {}", config.endpoint);
    println!("  Timeout:  {:?}", config.timeout);
    println!();

    // Step 2: Fingerprint preview
    println!("Step 2: Building a device fingerprint...");

    let fingerprint_config = FingerprintConfig::default();
    let preview = FingerprintBuilder::new().build(&fingerprint_config, None, Some("10086"));
    println!("  Fields:      {}", preview.len());
    println!("  Instance id: {}", preview.instance_id().unwrap_or("-"));
    println!("  dateGMT:     {}", preview.get("dateGMT").map(|v| v.to_string()).unwrap_or_default());
    println!();

    // Step 3: Handshake
    println!("Step 3: Running the handshake...");
    println!();
    println!("  ┌─────────────────────────────────────────────────────────────┐");
    println!("  │                    HANDSHAKE FLOW                           │");
    println!("  ├─────────────────────────────────────────────────────────────┤");
    println!("  │                                                             │");
    println!("  │  fingerprint JSON ──AES-128──► encryptedData                │");
    println!("  │  AES key ──RSA(server key)──► encryptedAesKey               │");
    println!("  │  POST ──► {{uk}} | {{u, deviceUk}} | error | junk              │");
    println!("  │  failure ──► local-fallback token (not honored by server)   │");
    println!("  │                                                             │");
    println!("  └─────────────────────────────────────────────────────────────┘");
    println!();

    let client = HandshakeClient::new(&config).expect("Failed to build HTTP client");
    let profile = DeviceProfile::new(fingerprint_config).with_user_id("10086");
    let outcome = client.mint(&profile).await;

    let trace: Vec<String> = outcome.trace.iter().map(ToString::to_string).collect();
    println!("  Trace:       {}", trace.join(" -> "));
    println!("  Final state: {}", outcome.final_state);
    println!("  Token:       {}", outcome.token.redacted());
    if let Some(failure) = &outcome.failure {
        println!("  Failure:     [{}] {}", failure.code(), failure);
    }
    println!();

    // Step 4: Policy
    println!("Step 4: Applying token policy...");

    for policy in [TokenPolicy::RequireServerIssued, TokenPolicy::AllowFallback] {
        match outcome.token.value_for(policy) {
            Ok(_) => println!("  {policy:?}: [OK] token usable"),
            Err(e) => println!("  {policy:?}: [REFUSED] {e}"),
        }
    }
    println!();

    println!("=== Demo Complete ===");
}
