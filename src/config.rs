//! Configuration management using the prefer crate for config-file discovery.
//!
//! Precedence: explicit CLI flag > environment variable > config file > built-in default.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default maximum upload size (500 MiB), per spec §6.
pub const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 500 * 1024 * 1024;

/// Decoder token budget for OCR inference. Spec-fixed, not configurable (§4.6).
pub const MAX_NEW_TOKENS: usize = 15_000;

/// Extensions the upload path accepts, per spec §6.
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &["pdf", "png", "jpg", "jpeg", "webp", "tiff"];

/// Selects which Storage Gateway backend and Job Manager dispatch strategy to use.
///
/// One flag drives both: the spec's "tagged variant" design note (§9) treats
/// deployment mode as a single sum type rather than two independently toggled flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Storage Gateway talks to the local filesystem; Job Manager runs a bounded
    /// thread pool and invokes the Job Processor in-process.
    Local,
    /// Storage Gateway talks to an object store; Job Manager dispatches jobs over
    /// HTTP to an external task queue.
    Remote,
}

impl Mode {
    fn from_env() -> Self {
        match std::env::var("RUNNING_IN_CLOUD") {
            Ok(v) if v.eq_ignore_ascii_case("true") => Mode::Remote,
            _ => Mode::Local,
        }
    }
}

/// The on-disk shape `prefer` discovers and serde parses. Every field is
/// optional: a field this file doesn't set falls through to the environment
/// or built-in default layer below it.
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    storage_root: Option<PathBuf>,
    storage_bucket: Option<String>,
    worker_url: Option<String>,
    ocr_model_name: Option<String>,
    ocr_device: Option<String>,
    max_file_size_mb: Option<u64>,
    allowed_extensions: Option<Vec<String>>,
    bind_address: Option<String>,
}

impl ConfigFile {
    fn parse(contents: &str, path: &Path) -> anyhow::Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(toml::from_str(contents)?),
            _ => Ok(serde_json::from_str(contents)?),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    /// Local-filesystem storage root. Ignored in `Mode::Remote`.
    pub data_dir: PathBuf,
    /// Object-store bucket name. Required in `Mode::Remote`.
    pub bucket_name: Option<String>,
    /// Base URL the Job Manager POSTs job payloads to in `Mode::Remote`.
    pub worker_url: Option<String>,
    pub model_name: String,
    pub device: String,
    pub max_file_size_bytes: u64,
    pub allowed_extensions: Vec<String>,
    pub bind_address: String,
}

impl Config {
    /// Loads configuration by layering, in increasing precedence: a config
    /// file `prefer` discovers in the standard locations, environment
    /// variables, and finally `bind_address_override` (the CLI `--bind`
    /// flag, when the caller has one). Fails if `Mode::Remote` is selected
    /// without a bucket name or worker URL — a cloud deployment cannot
    /// silently fall back to local disk.
    pub async fn load(bind_address_override: Option<String>) -> anyhow::Result<Self> {
        let file = Self::discover_file().await.unwrap_or_default();
        let mode = Mode::from_env();

        let data_dir = std::env::var("STORAGE_ROOT")
            .map(PathBuf::from)
            .ok()
            .or(file.storage_root)
            .unwrap_or_else(|| {
                dirs::data_local_dir()
                    .unwrap_or_else(std::env::temp_dir)
                    .join("scanforge")
            });

        let bucket_name = std::env::var("STORAGE_BUCKET").ok().or(file.storage_bucket);
        let worker_url = std::env::var("WORKER_URL").ok().or(file.worker_url);

        if mode == Mode::Remote {
            if bucket_name.is_none() {
                anyhow::bail!("STORAGE_BUCKET is required when RUNNING_IN_CLOUD=true");
            }
            if worker_url.is_none() {
                anyhow::bail!("WORKER_URL is required when RUNNING_IN_CLOUD=true");
            }
        }

        let max_file_size_bytes = std::env::var("MAX_FILE_SIZE_MB")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .or(file.max_file_size_mb)
            .map(|mb| mb * 1024 * 1024)
            .unwrap_or(DEFAULT_MAX_FILE_SIZE_BYTES);

        let allowed_extensions = std::env::var("ALLOWED_EXTENSIONS")
            .ok()
            .map(|s| s.split(',').map(|e| e.trim().to_lowercase()).collect::<Vec<_>>())
            .or(file.allowed_extensions)
            .unwrap_or_else(|| {
                DEFAULT_ALLOWED_EXTENSIONS
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            });

        let bind_address = bind_address_override
            .or_else(|| std::env::var("BIND_ADDRESS").ok())
            .or(file.bind_address)
            .unwrap_or_else(|| "127.0.0.1:3030".to_string());

        Ok(Self {
            mode,
            data_dir,
            bucket_name,
            worker_url,
            model_name: std::env::var("OCR_MODEL_NAME")
                .ok()
                .or(file.ocr_model_name)
                .unwrap_or_else(|| "scanforge-vlm-ocr".to_string()),
            device: std::env::var("OCR_DEVICE")
                .ok()
                .or(file.ocr_device)
                .unwrap_or_else(|| "cpu".to_string()),
            max_file_size_bytes,
            allowed_extensions,
            bind_address,
        })
    }

    /// Discovers a `scanforge` config file via `prefer`'s standard-locations
    /// search and parses it with serde. Returns `None` on anything short of
    /// a fully valid file — callers treat that the same as "no file".
    async fn discover_file() -> Option<ConfigFile> {
        let discovered = prefer::load("scanforge").await.ok()?;
        let path = discovered.source_path()?;
        let contents = tokio::fs::read_to_string(path).await.ok()?;
        ConfigFile::parse(&contents, path).ok()
    }

    pub fn is_extension_allowed(&self, ext: &str) -> bool {
        self.allowed_extensions.iter().any(|e| e == &ext.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_defaults_to_local() {
        std::env::remove_var("RUNNING_IN_CLOUD");
        assert_eq!(Mode::from_env(), Mode::Local);
    }

    #[test]
    fn extension_check_is_case_insensitive() {
        let cfg = Config {
            mode: Mode::Local,
            data_dir: PathBuf::from("/tmp"),
            bucket_name: None,
            worker_url: None,
            model_name: "m".into(),
            device: "cpu".into(),
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            bind_address: "127.0.0.1:3030".into(),
        };
        assert!(cfg.is_extension_allowed("PDF"));
        assert!(!cfg.is_extension_allowed("exe"));
    }

    #[test]
    fn config_file_parses_toml_and_json() {
        let toml_file = ConfigFile::parse(
            "storage_bucket = \"bucket\"\nbind_address = \"0.0.0.0:8080\"\n",
            Path::new("scanforge.toml"),
        )
        .unwrap();
        assert_eq!(toml_file.storage_bucket.as_deref(), Some("bucket"));

        let json_file = ConfigFile::parse(
            r#"{"storage_bucket": "bucket", "bind_address": "0.0.0.0:8080"}"#,
            Path::new("scanforge.json"),
        )
        .unwrap();
        assert_eq!(json_file.bind_address.as_deref(), Some("0.0.0.0:8080"));
    }
}
