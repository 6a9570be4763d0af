use anyhow::{anyhow, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::auth::OperatorCredential;
use crate::detect::yolo::DEFAULT_CONFIDENCE_THRESHOLD;
use crate::ingest::FileConfig;
use crate::region::{Region, RegionSet};

const DEFAULT_REGISTRY_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 3;
const DEFAULT_SOURCE: &str = "stub://camera";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_TARGET_FPS: u32 = 10;

const DEFAULT_DB_PATH: &str = "seats.db";
const DEFAULT_API_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 60 * 60 * 12;
const DEFAULT_SEATS: [u32; 4] = [1, 2, 3, 4];

/// Password kept out of `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

// ---------------------------------------------------------------------------
// seat_monitor
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct MonitorConfigFile {
    registry: Option<RegistryClientConfigFile>,
    camera: Option<CameraConfigFile>,
    detector: Option<DetectorConfigFile>,
    regions: Option<Vec<RegionConfigFile>>,
    snapshot_dir: Option<PathBuf>,
}

/// Passwords are never read from the config file itself.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RegistryClientConfigFile {
    url: Option<String>,
    username: Option<String>,
    password_file: Option<PathBuf>,
    request_timeout_secs: Option<u64>,
    cooldown_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    source: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    kind: Option<String>,
    model_path: Option<PathBuf>,
    confidence_threshold: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct RegionConfigFile {
    seat_number: u32,
    name: Option<String>,
    x1: u32,
    y1: u32,
    x2: u32,
    y2: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectorKind {
    Stub,
    Tract,
}

impl DetectorKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "stub" => Ok(DetectorKind::Stub),
            "tract" | "onnx" => Ok(DetectorKind::Tract),
            other => Err(anyhow!("unknown detector '{}' (expected stub or tract)", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub registry_url: String,
    pub username: Option<String>,
    pub password: Option<Secret>,
    pub password_file: Option<PathBuf>,
    pub request_timeout: Duration,
    pub cooldown: Duration,
    pub source: FileConfig,
    pub target_fps: u32,
    pub detector: DetectorKind,
    pub model_path: Option<PathBuf>,
    pub confidence_threshold: f32,
    pub regions: RegionSet,
    pub snapshot_dir: PathBuf,
}

impl MonitorConfig {
    pub fn load() -> Result<Self> {
        let file_cfg = match std::env::var("SEAT_MONITOR_CONFIG").ok().as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MonitorConfigFile) -> Result<Self> {
        let registry = file.registry.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let width = camera.width.unwrap_or(DEFAULT_WIDTH);
        let height = camera.height.unwrap_or(DEFAULT_HEIGHT);

        let regions = match file.regions {
            Some(entries) => {
                let mut regions = Vec::with_capacity(entries.len());
                for entry in entries {
                    let region =
                        Region::new(entry.seat_number, entry.x1, entry.y1, entry.x2, entry.y2)?;
                    regions.push(match entry.name {
                        Some(name) => region.with_name(name),
                        None => region,
                    });
                }
                RegionSet::new(regions)?
            }
            None => RegionSet::quadrants(width, height)?,
        };

        Ok(Self {
            registry_url: registry
                .url
                .unwrap_or_else(|| DEFAULT_REGISTRY_URL.to_string()),
            username: registry.username,
            password: None,
            password_file: registry.password_file,
            request_timeout: Duration::from_secs(
                registry
                    .request_timeout_secs
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            cooldown: Duration::from_secs(
                registry
                    .cooldown_secs
                    .unwrap_or(crate::throttle::DEFAULT_COOLDOWN_SECS),
            ),
            source: FileConfig {
                path: camera.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
                width,
                height,
            },
            target_fps: camera.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            detector: match detector.kind {
                Some(kind) => DetectorKind::parse(&kind)?,
                None => DetectorKind::Stub,
            },
            model_path: detector.model_path,
            confidence_threshold: detector
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            regions,
            snapshot_dir: file.snapshot_dir.unwrap_or_else(|| PathBuf::from(".")),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_string("SEAT_REGISTRY_URL") {
            self.registry_url = url;
        }
        if let Some(username) = env_string("SEAT_MONITOR_USERNAME") {
            self.username = Some(username);
        }
        if let Some(path) = env_string("SEAT_MONITOR_PASSWORD_FILE") {
            self.password_file = Some(PathBuf::from(path));
        }
        if let Some(password) = env_string("SEAT_MONITOR_PASSWORD") {
            self.password = Some(Secret::new(password));
        } else if let Some(path) = &self.password_file {
            self.password = Some(read_secret_file(path)?);
        }
        if let Some(secs) = env_u64("SEAT_REPORT_COOLDOWN_SECS")? {
            self.cooldown = Duration::from_secs(secs);
        }
        if let Some(source) = env_string("SEAT_FRAME_SOURCE") {
            self.source.path = source;
        }
        if let Some(kind) = env_string("SEAT_DETECTOR") {
            self.detector = DetectorKind::parse(&kind)?;
        }
        if let Some(path) = env_string("SEAT_MODEL_PATH") {
            self.model_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.registry_url = self.registry_url.trim_end_matches('/').to_string();
        if !(self.registry_url.starts_with("http://") || self.registry_url.starts_with("https://"))
        {
            return Err(anyhow!(
                "registry url must start with http:// or https:// (got '{}')",
                self.registry_url
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(anyhow!("request_timeout_secs must be greater than zero"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        if !(self.confidence_threshold > 0.0 && self.confidence_threshold <= 1.0) {
            return Err(anyhow!(
                "confidence_threshold must be in (0, 1] (got {})",
                self.confidence_threshold
            ));
        }
        if self.detector == DetectorKind::Tract && self.model_path.is_none() {
            return Err(anyhow!("detector 'tract' requires model_path (SEAT_MODEL_PATH)"));
        }
        if self.regions.is_empty() {
            return Err(anyhow!("at least one region must be configured"));
        }
        for region in self.regions.iter() {
            if region.x2 > self.source.width || region.y2 > self.source.height {
                log::warn!(
                    "region for seat {} extends beyond the {}x{} frame",
                    region.seat_number,
                    self.source.width,
                    self.source.height
                );
            }
        }
        if self.username.is_some() != self.password.is_some() {
            log::warn!("monitor credentials incomplete; reports will be disabled");
        }
        Ok(())
    }

    /// Both halves of the credential, when configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(password)) => Some((user.as_str(), password.expose())),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// seat_registry
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct RegistryConfigFile {
    db_path: Option<String>,
    api: Option<ApiConfigFile>,
    auto_release: Option<AutoReleaseConfigFile>,
    seats: Option<Vec<u32>>,
    operators: Option<Vec<OperatorCredential>>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    token_ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct AutoReleaseConfigFile {
    minutes: Option<u32>,
    sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub db_path: String,
    pub api_addr: String,
    pub token_ttl: Duration,
    pub auto_release_minutes: u32,
    /// Zero disables the background sweep.
    pub sweep_interval: Duration,
    pub seats: Vec<u32>,
    pub operators: Vec<OperatorCredential>,
}

impl RegistryConfig {
    pub fn load() -> Result<Self> {
        let file_cfg = match std::env::var("SEAT_REGISTRY_CONFIG").ok().as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RegistryConfigFile) -> Self {
        let api = file.api.unwrap_or_default();
        let auto_release = file.auto_release.unwrap_or_default();
        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            api_addr: api.addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            token_ttl: Duration::from_secs(api.token_ttl_secs.unwrap_or(DEFAULT_TOKEN_TTL_SECS)),
            auto_release_minutes: auto_release
                .minutes
                .unwrap_or(crate::registry::DEFAULT_AUTO_RELEASE_MINUTES),
            sweep_interval: Duration::from_secs(
                auto_release
                    .sweep_interval_secs
                    .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
            ),
            seats: file.seats.unwrap_or_else(|| DEFAULT_SEATS.to_vec()),
            operators: file.operators.unwrap_or_default(),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = env_string("SEAT_DB_PATH") {
            self.db_path = path;
        }
        if let Some(addr) = env_string("SEAT_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(minutes) = env_u64("SEAT_AUTO_RELEASE_MINUTES")? {
            self.auto_release_minutes = u32::try_from(minutes)
                .map_err(|_| anyhow!("SEAT_AUTO_RELEASE_MINUTES is out of range"))?;
        }
        if let Some(secs) = env_u64("SEAT_SWEEP_INTERVAL_SECS")? {
            self.sweep_interval = Duration::from_secs(secs);
        }
        match (
            env_string("SEAT_OPERATOR_USERNAME"),
            env_string("SEAT_OPERATOR_PASSWORD_SHA256"),
        ) {
            (Some(username), Some(password_sha256)) => {
                self.operators.retain(|op| op.username != username);
                self.operators.push(OperatorCredential {
                    username,
                    password_sha256,
                });
            }
            (None, None) => {}
            _ => {
                return Err(anyhow!(
                    "SEAT_OPERATOR_USERNAME and SEAT_OPERATOR_PASSWORD_SHA256 must be set together"
                ))
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.api_addr
            .parse::<SocketAddr>()
            .map_err(|e| anyhow!("invalid api addr '{}': {}", self.api_addr, e))?;
        if self.auto_release_minutes == 0 {
            return Err(anyhow!("auto_release minutes must be greater than zero"));
        }
        if self.seats.contains(&0) {
            return Err(anyhow!("seat numbers must be positive"));
        }
        self.seats.sort_unstable();
        self.seats.dedup();
        if self.operators.is_empty() {
            return Err(anyhow!(
                "no operators configured; set SEAT_OPERATOR_USERNAME and SEAT_OPERATOR_PASSWORD_SHA256"
            ));
        }
        for op in &self.operators {
            let decoded = hex::decode(op.password_sha256.trim()).map_err(|_| {
                anyhow!("operator '{}' password_sha256 must be hex", op.username)
            })?;
            if decoded.len() != 32 {
                return Err(anyhow!(
                    "operator '{}' password_sha256 must be 32 bytes",
                    op.username
                ));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------

fn read_config_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))
    }
}

fn read_secret_file(path: &Path) -> Result<Secret> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read password file {}: {}", path.display(), e))?;
    let trimmed = raw.trim_end_matches(['\r', '\n']);
    if trimmed.is_empty() {
        return Err(anyhow!("password file {} is empty", path.display()));
    }
    Ok(Secret::new(trimmed))
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn env_u64(key: &str) -> Result<Option<u64>> {
    match env_string(key) {
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a non-negative integer", key)),
        None => Ok(None),
    }
}
