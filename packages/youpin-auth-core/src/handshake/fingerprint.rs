//! Device fingerprint assembly.
//!
//! The verification server expects the flat field set a desktop Chrome
//! collects in the vendor's web client. Everything except the instance
//! identifier, the canvas hash and the two time fields is a pure function
//! of [`FingerprintConfig`].

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::DEFAULT_USER_AGENT;
use crate::error::Result;
use crate::time::browser_date_string;

/// 1x1 transparent PNG reported as the canvas rendering
pub const CANVAS_DATA_URI: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNk+M9QDwADhgGAWjR9awAAAABJRU5ErkJggg==";

/// Fonts a stock Windows Chrome reports
pub const DEFAULT_FONTS: [&str; 11] = [
    "Arial",
    "Helvetica",
    "Times New Roman",
    "Courier",
    "Verdana",
    "Georgia",
    "Palatino",
    "Garamond",
    "Comic Sans MS",
    "Trebuchet MS",
    "Impact",
];

/// Simulated browser environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FingerprintConfig {
    pub screen_width: u32,
    pub screen_height: u32,
    pub device_pixel_ratio: f64,
    pub hardware_concurrency: u32,
    pub device_memory: u32,
    pub language: String,
    pub languages: Vec<String>,
    pub platform: String,
    pub user_agent: String,
    pub timezone: String,
    /// Minutes behind UTC, as `Date.getTimezoneOffset()` reports it
    pub timezone_offset: i32,
    /// Fixed canvas hash; a random one is drawn per build when unset
    pub canvas_hash: Option<String>,
    pub fonts: Vec<String>,
    pub cookie_enabled: bool,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            screen_width: 1920,
            screen_height: 1080,
            device_pixel_ratio: 1.0,
            hardware_concurrency: 8,
            device_memory: 4,
            language: "zh-CN".into(),
            languages: vec!["zh-CN".into(), "zh".into(), "en".into()],
            platform: "Win32".into(),
            user_agent: DEFAULT_USER_AGENT.into(),
            timezone: "Asia/Shanghai".into(),
            timezone_offset: -480,
            canvas_hash: None,
            fonts: DEFAULT_FONTS.iter().map(|f| f.to_string()).collect(),
            cookie_enabled: true,
        }
    }
}

/// The flat field map sent (encrypted) to the verification server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceFingerprint(BTreeMap<String, Value>);

impl DeviceFingerprint {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Field names in byte-wise order
    pub fn field_names(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    /// The random instance identifier
    pub fn instance_id(&self) -> Option<&str> {
        self.get("iud").and_then(Value::as_str)
    }

    /// Compact JSON, the plaintext that gets encrypted
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }
}

/// Builds fingerprints, drawing random fields from `R`
///
/// Seed `R` to make builds reproducible.
#[derive(Debug)]
pub struct FingerprintBuilder<R = OsRng> {
    rng: R,
}

impl FingerprintBuilder<OsRng> {
    pub fn new() -> Self {
        Self { rng: OsRng }
    }
}

impl Default for FingerprintBuilder<OsRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RngCore> FingerprintBuilder<R> {
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }

    /// Build a fingerprint stamped with the current time
    pub fn build(
        &mut self,
        config: &FingerprintConfig,
        existing_uk: Option<&str>,
        user_id: Option<&str>,
    ) -> DeviceFingerprint {
        self.build_at(config, existing_uk, user_id, Utc::now())
    }

    /// Build a fingerprint stamped with `now`
    ///
    /// `dateGMT` and `client_time` both derive from `now`, so they always
    /// agree. Empty `existing_uk`/`user_id` are treated as absent.
    pub fn build_at(
        &mut self,
        config: &FingerprintConfig,
        existing_uk: Option<&str>,
        user_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> DeviceFingerprint {
        let instance_id = self.instance_id();
        let canvas_hash = match &config.canvas_hash {
            Some(hash) if !hash.is_empty() => hash.clone(),
            _ => self.canvas_hash(),
        };

        let app_version = config
            .user_agent
            .strip_prefix("Mozilla/")
            .unwrap_or(&config.user_agent)
            .to_string();

        let mut fields = BTreeMap::new();
        let mut set = |key: &str, value: Value| {
            fields.insert(key.to_string(), value);
        };

        // screen
        set("availHeight", json!(config.screen_height));
        set("availWidth", json!(config.screen_width));
        set("innerHeight", json!(config.screen_height));
        set("innerWidth", json!(config.screen_width));
        set("screenHeight", json!(config.screen_height));
        set("screenWidth", json!(config.screen_width));
        set("colorDepth", json!(24));
        set("pixelDepth", json!(24));
        set("devicePixelRatio", json!(config.device_pixel_ratio));

        // navigator
        set("appCodeName", json!("Mozilla"));
        set("appName", json!("Netscape"));
        set("appVersion", json!(app_version));
        set("hardwareConcurrency", json!(config.hardware_concurrency));
        set("deviceMemory", json!(config.device_memory));
        set("language", json!(config.language));
        set("languages", json!(config.languages));
        set("onLine", json!(true));
        set("platform", json!(config.platform));
        set("product", json!("Gecko"));
        set("productSub", json!("20030107"));
        set("userAgent", json!(config.user_agent));
        set("vendor", json!("Google Inc."));
        set("vendorSub", json!(""));
        set("plugins", json!([]));
        set("doNotTrack", Value::Null);
        set("cookieEnabled", json!(config.cookie_enabled));

        // locale
        set("timezone", json!(config.timezone));
        set("timezoneOffset", json!(config.timezone_offset));

        // canvas and fonts
        set("cv", json!(CANVAS_DATA_URI));
        set("canvasHash", json!(canvas_hash));
        set("fonts", json!(config.fonts));

        // session
        set("dateGMT", json!(browser_date_string(now)));
        set("client_time", json!(now.timestamp_millis()));
        set("src", json!("pc"));
        set("bcn", json!("u"));
        set("iud", json!(instance_id));

        if let Some(uk) = existing_uk.filter(|s| !s.is_empty()) {
            set("uk", json!(uk));
        }
        if let Some(id) = user_id.filter(|s| !s.is_empty()) {
            set("userId", json!(id));
        }

        tracing::debug!(
            fields = fields.len(),
            iud = %instance_id,
            screen = %format!("{}x{}", config.screen_width, config.screen_height),
            "Built device fingerprint"
        );

        DeviceFingerprint(fields)
    }

    fn instance_id(&mut self) -> String {
        let mut bytes = [0u8; 16];
        self.rng.fill_bytes(&mut bytes);
        uuid::Builder::from_random_bytes(bytes)
            .into_uuid()
            .hyphenated()
            .to_string()
    }

    fn canvas_hash(&mut self) -> String {
        let mut bytes = [0u8; 32];
        self.rng.fill_bytes(&mut bytes);
        STANDARD.encode(bytes)
    }
}
