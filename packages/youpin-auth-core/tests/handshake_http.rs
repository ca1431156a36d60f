//! Handshake over real HTTP against an in-process verification server.

use std::io::Write;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use flate2::{write::GzEncoder, Compression};
use rand::{rngs::StdRng, SeedableRng};
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use serde_json::{json, Value};

use youpin_auth_core::crypto::{LegacyHandshakeCipher, SymmetricCipher, SymmetricKey};
use youpin_auth_core::handshake::{
    HandshakeRequestBody, HandshakeResponse, HandshakeTransport, HttpTransport, ResponseClassifier,
};
use youpin_auth_core::{
    DeviceProfile, Error, HandshakeClient, HandshakeConfig, HandshakeState, Provenance,
};

const PATH: &str = "/api/deviceW2";

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}{PATH}")
}

fn config(endpoint: String) -> HandshakeConfig {
    HandshakeConfig {
        endpoint,
        timeout: Duration::from_secs(5),
        ..HandshakeConfig::default()
    }
}

fn server_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut StdRng::seed_from_u64(42), 1024).unwrap())
}

fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<(HeaderMap, Value)>>>);

async fn plain_token(
    State(captured): State<Captured>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    captured.0.lock().unwrap().push((headers, body));
    Json(json!({"code": 0, "msg": "ok", "data": {"uk": "http-issued-uk"}}))
}

#[tokio::test]
async fn test_plain_token_over_http() {
    let captured = Captured::default();
    let app = Router::new()
        .route(PATH, post(plain_token))
        .with_state(captured.clone());
    let endpoint = serve(app).await;

    let cfg = config(endpoint);
    let client = HandshakeClient::new(&cfg).unwrap();
    let outcome = client.mint(&DeviceProfile::default()).await;

    assert!(outcome.is_server_issued());
    assert_eq!(outcome.token.expose(), "http-issued-uk");
    assert_eq!(outcome.final_state, HandshakeState::PlainAccepted);

    let requests = captured.0.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let (headers, body) = &requests[0];
    assert_eq!(
        headers.get(header::CONTENT_TYPE).unwrap(),
        "application/json; charset=utf-8"
    );
    assert_eq!(headers.get(header::USER_AGENT).unwrap(), cfg.user_agent.as_str());

    let fields = body.as_object().unwrap();
    assert_eq!(fields.len(), 2);
    let data = STANDARD.decode(fields["encryptedData"].as_str().unwrap()).unwrap();
    assert_eq!(data.len() % 16, 0);
    let wrapped = STANDARD.decode(fields["encryptedAesKey"].as_str().unwrap()).unwrap();
    assert_eq!(wrapped.len(), 256);
}

async fn gzipped_token() -> impl IntoResponse {
    let body = gzip(br#"{"code":0,"data":{"uk":"gzip-uk"}}"#);
    (
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CONTENT_ENCODING, "gzip"),
        ],
        body,
    )
}

#[tokio::test]
async fn test_gzip_reply_is_decoded() {
    let endpoint = serve(Router::new().route(PATH, post(gzipped_token))).await;

    let outcome = HandshakeClient::new(&config(endpoint))
        .unwrap()
        .mint(&DeviceProfile::default())
        .await;

    assert_eq!(outcome.token.expose(), "gzip-uk");
    assert_eq!(outcome.token.provenance(), Provenance::ServerIssued);
}

async fn encrypted_token(Json(body): Json<HandshakeRequestBody>) -> Json<Value> {
    let wrapped = STANDARD.decode(&body.encrypted_aes_key).unwrap();
    let raw = server_key().decrypt(Pkcs1v15Encrypt, &wrapped).unwrap();
    let key = SymmetricKey::from_bytes(raw.try_into().unwrap());

    let ciphertext = STANDARD.decode(&body.encrypted_data).unwrap();
    let fingerprint: Value =
        serde_json::from_slice(&LegacyHandshakeCipher.decrypt(&ciphertext, &key).unwrap()).unwrap();
    let user_id = fingerprint["userId"].as_str().unwrap_or("anonymous").to_string();

    let reply = json!({"data": {"uk": format!("uk-for-{user_id}")}}).to_string();
    let u = STANDARD.encode(LegacyHandshakeCipher.encrypt(reply.as_bytes(), &key));
    Json(json!({"u": u, "deviceUk": ""}))
}

#[tokio::test]
async fn test_encrypted_reply_with_configured_server_key() {
    let endpoint = serve(Router::new().route(PATH, post(encrypted_token))).await;
    let pem = RsaPublicKey::from(server_key())
        .to_public_key_pem(LineEnding::LF)
        .unwrap();
    let cfg = HandshakeConfig {
        server_public_key_pem: pem,
        ..config(endpoint)
    };

    let outcome = HandshakeClient::new(&cfg)
        .unwrap()
        .mint(&DeviceProfile::default().with_user_id("7788"))
        .await;

    assert_eq!(outcome.token.expose(), "uk-for-7788");
    assert_eq!(outcome.final_state, HandshakeState::Decrypted);
    assert!(outcome.failure.is_none());
}

async fn html_page() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/html")],
        "<!DOCTYPE html><html><body>Service busy</body></html>",
    )
}

#[tokio::test]
async fn test_html_page_is_unrecognized() {
    let endpoint = serve(Router::new().route(PATH, post(html_page))).await;
    let transport = HttpTransport::new(&config(endpoint.clone())).unwrap();
    let body = HandshakeRequestBody {
        encrypted_data: "AAAA".into(),
        encrypted_aes_key: "AAAA".into(),
    };

    let reply = transport.exchange(&body).await.unwrap();
    assert_eq!(reply.status, 200);
    match ResponseClassifier::default().classify(&reply) {
        HandshakeResponse::Unrecognized { raw_bytes, .. } => {
            assert!(raw_bytes.starts_with(b"<!DOCTYPE html>"));
        }
        other => panic!("unexpected: {other:?}"),
    }

    let outcome = HandshakeClient::new(&config(endpoint))
        .unwrap()
        .mint(&DeviceProfile::default())
        .await;
    assert_eq!(outcome.token.provenance(), Provenance::LocalFallback);
    assert!(matches!(outcome.failure, Some(Error::UnrecognizedResponse(_))));
}

async fn unavailable() -> impl IntoResponse {
    (StatusCode::SERVICE_UNAVAILABLE, r#"{"code":0,"data":{"uk":"ignored"}}"#)
}

#[tokio::test]
async fn test_non_200_status_never_yields_server_token() {
    let endpoint = serve(Router::new().route(PATH, post(unavailable))).await;

    let outcome = HandshakeClient::new(&config(endpoint))
        .unwrap()
        .mint(&DeviceProfile::default())
        .await;

    assert!(!outcome.is_server_issued());
    match outcome.failure {
        Some(Error::UnrecognizedResponse(reason)) => assert!(reason.contains("HTTP status 503")),
        other => panic!("unexpected failure: {other:?}"),
    }
}

async fn stalled() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(10)).await;
    Json(json!({"code": 0, "data": {"uk": "too-late"}}))
}

#[tokio::test]
async fn test_timeout_falls_back_within_deadline() {
    let endpoint = serve(Router::new().route(PATH, post(stalled))).await;
    let cfg = HandshakeConfig {
        timeout: Duration::from_millis(300),
        ..config(endpoint)
    };

    let started = std::time::Instant::now();
    let outcome = HandshakeClient::new(&cfg)
        .unwrap()
        .mint(&DeviceProfile::default())
        .await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(outcome.token.provenance(), Provenance::LocalFallback);
    assert_eq!(outcome.final_state, HandshakeState::Rejected);
    assert!(matches!(outcome.failure, Some(Error::Timeout(_))));
}

#[tokio::test]
async fn test_connection_refused_falls_back() {
    // Bind then drop to get a port nothing listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let outcome = HandshakeClient::new(&config(format!("http://{addr}{PATH}")))
        .unwrap()
        .mint(&DeviceProfile::default())
        .await;

    assert_eq!(outcome.token.provenance(), Provenance::LocalFallback);
    assert!(matches!(outcome.failure, Some(Error::Transport(_))));
}
