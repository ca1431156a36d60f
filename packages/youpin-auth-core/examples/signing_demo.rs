//! # Request Signing Demo
//!
//! Signs a gateway request and checks the signature the way the gateway does.
//!
//! ## Run
//!
//! ```bash
//! cargo run --example signing_demo
//! ```

use youpin_auth_core::signing::{canonicalize, verify_signature, RequestSigner, SignatureRequest};
use youpin_auth_core::{GatewayTimestamp, KeyMaterial, KeyPair};

fn main() {
    println!("=== Youpin Auth Core: Request Signing Demo ===\n");

    // Step 1: Provision a key pair
    println!("Step 1: Generating RSA-2048 key pair...");

    let pair = KeyPair::generate().expect("Failed to generate key pair");
    let keys = KeyMaterial::load(&pair.private_key, "1234567").expect("Failed to load key");

    println!("  App key:          {}", keys.app_key());
    println!("  Key fingerprint:  {}", keys.fingerprint());
    println!("  Public key (b64): {}...", &pair.public_key[..32]);
    println!();

    // Step 2: The pipeline
    println!("Step 2: Understanding the signing pipeline");
    println!();
    println!("  ┌─────────────────────────────────────────────────────────────┐");
    println!("  │                    SIGNING PIPELINE                         │");
    println!("  ├─────────────────────────────────────────────────────────────┤");
    println!("  │                                                             │");
    println!("  │  params + appKey + timestamp                                │");
    println!("  │        │                                                    │");
    println!("  │        ▼                                                    │");
    println!("  │  sort keys, drop null/\"\", concat key+compactJSON(value)     │");
    println!("  │        │                                                    │");
    println!("  │        ▼                                                    │");
    println!("  │  SHA-256 ─► RSA PKCS#1 v1.5 ─► base64 ─► \"sign\"             │");
    println!("  │                                                             │");
    println!("  └─────────────────────────────────────────────────────────────┘");
    println!();

    // Step 3: Sign
    println!("Step 3: Signing a goods query...");

    let signer = RequestSigner::new(keys.clone());
    let timestamp = GatewayTimestamp::now();
    let params = SignatureRequest::new()
        .with("templateId", 553370)
        .with("pageSize", 20)
        .with("keyword", "AK-47 | Redline")
        .with("minPrice", serde_json::Value::Null);

    let envelope = signer
        .sign(params.clone(), &timestamp)
        .expect("Failed to sign request");

    println!("  Timestamp:        {}", envelope.timestamp());
    println!("  Canonical string: {}", envelope.canonical());
    println!("  Signature:        {}...", &envelope.sign()[..24]);
    println!("  Signature length: {} chars", envelope.sign().len());
    println!(
        "  Envelope JSON:    {}",
        serde_json::to_string(&envelope).expect("Failed to encode envelope")
    );
    println!();

    // Step 4: Verify
    println!("Step 4: Verifying as the gateway would...");

    match verify_signature(&pair.public_key, envelope.params(), envelope.sign()) {
        Ok(()) => println!("  [OK] Signature is valid!"),
        Err(e) => println!("  [FAILED] {e}"),
    }

    let mut tampered = envelope.params().clone();
    tampered.insert("pageSize", 200);
    match verify_signature(&pair.public_key, &tampered, envelope.sign()) {
        Ok(()) => println!("  [FAILED] Tampered parameters were accepted!"),
        Err(_) => println!("  [OK] Tampered parameters detected!"),
    }
    println!();

    // Step 5: Canonical form is order independent
    println!("Step 5: Insertion order does not matter...");

    let reordered: SignatureRequest = [
        ("keyword", serde_json::json!("AK-47 | Redline")),
        ("pageSize", serde_json::json!(20)),
        ("templateId", serde_json::json!(553370)),
    ]
    .into_iter()
    .collect();
    let a = canonicalize(&params).expect("Failed to canonicalize");
    let b = canonicalize(&reordered).expect("Failed to canonicalize");
    println!("  {}", a);
    println!("  {}", b);
    println!("  Equal: {}", if a == b { "[OK]" } else { "[FAILED]" });
    println!();

    println!("=== Demo Complete ===");
}
