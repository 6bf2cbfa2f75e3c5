//! Reference dataset management
//!
//! Resolves the reference hash dataset from a local path or a URL. Remote
//! datasets are downloaded once into the data directory, checked against an
//! optional SHA-256 and recorded in a manifest.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::runtime::Runtime;
use tracing::{debug, info};

use crate::error::{ScanError, ScanResult};
use crate::matching::ReferenceTable;

/// Environment variable that forbids network downloads
pub const OFFLINE_ENV: &str = "CARDSCAN_OFFLINE";

/// Where the reference dataset comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetSource {
    Path(PathBuf),
    Url(String),
}

impl FromStr for DatasetSource {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with("http://") || s.starts_with("https://") {
            Ok(DatasetSource::Url(s.to_string()))
        } else {
            Ok(DatasetSource::Path(PathBuf::from(s)))
        }
    }
}

impl fmt::Display for DatasetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetSource::Path(path) => write!(f, "{}", path.display()),
            DatasetSource::Url(url) => write!(f, "{}", url),
        }
    }
}

/// Dataset settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Local path or http(s) URL of the CSV dataset
    pub source: Option<String>,
    /// Expected SHA-256 (hex) of the downloaded file
    pub sha256: Option<String>,
    /// Never download; only use cached files
    pub offline: bool,
}

impl DatasetConfig {
    pub fn source(&self) -> Option<DatasetSource> {
        self.source
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .and_then(|s| s.parse().ok())
    }
}

/// Anything that can produce the reference table during session start-up
pub trait TableSource: Send {
    /// Human-readable origin for logs
    fn describe(&self) -> String;

    /// Produce a table whose hashes are `bits` wide
    fn load(self: Box<Self>, bits: u32) -> ScanResult<ReferenceTable>;
}

/// An already built table
impl TableSource for ReferenceTable {
    fn describe(&self) -> String {
        format!("in-memory table ({} entries)", self.len())
    }

    fn load(self: Box<Self>, bits: u32) -> ScanResult<ReferenceTable> {
        if self.bit_len() != bits {
            return Err(ScanError::DatasetLoad(format!(
                "table holds {}-bit hashes, expected {}",
                self.bit_len(),
                bits
            )));
        }
        Ok(*self)
    }
}

/// Manifest tracking downloaded datasets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub version: String,
    pub datasets: Vec<DatasetInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub url: String,
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub downloaded_at: String,
}

impl Default for DatasetManifest {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            datasets: Vec::new(),
        }
    }
}

/// Downloads and caches reference datasets
pub struct DatasetManager {
    datasets_dir: PathBuf,
    offline: bool,
    expected_sha256: Option<String>,
}

impl DatasetManager {
    /// Manager rooted in the platform data directory
    pub fn new(config: &DatasetConfig) -> Result<Self> {
        let data_dir = crate::storage::get_data_dir()?;
        Self::with_dir(data_dir.join("datasets"), config)
    }

    /// Manager with a custom cache directory
    pub fn with_dir(datasets_dir: PathBuf, config: &DatasetConfig) -> Result<Self> {
        std::fs::create_dir_all(&datasets_dir)
            .with_context(|| format!("Failed to create dataset directory {:?}", datasets_dir))?;

        Ok(Self {
            datasets_dir,
            offline: config.offline || std::env::var(OFFLINE_ENV).is_ok(),
            expected_sha256: config.sha256.as_ref().map(|s| s.trim().to_lowercase()),
        })
    }

    pub fn datasets_dir(&self) -> &Path {
        &self.datasets_dir
    }

    /// Cache location for a URL: short digest of the URL plus its file name
    pub fn cached_path(&self, url: &str) -> PathBuf {
        let digest = format!("{:x}", Sha256::digest(url.as_bytes()));
        let name = url
            .split(|c: char| c == '?' || c == '#')
            .next()
            .and_then(|u| u.rsplit('/').next())
            .filter(|n| !n.is_empty())
            .unwrap_or("dataset.csv");
        let name: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
            .collect();

        self.datasets_dir.join(format!("{}-{}", &digest[..12], name))
    }

    pub fn is_cached(&self, url: &str) -> bool {
        self.cached_path(url).is_file()
    }

    /// Resolve a source to a local file, downloading it if needed
    pub fn ensure(&self, source: &DatasetSource) -> Result<PathBuf> {
        match source {
            DatasetSource::Path(path) => {
                if !path.is_file() {
                    anyhow::bail!("Dataset file not found: {:?}", path);
                }
                Ok(path.clone())
            }
            DatasetSource::Url(url) => {
                let path = self.cached_path(url);
                if path.is_file() {
                    info!("Dataset already cached at {:?}", path);
                    return Ok(path);
                }
                self.download(url, &path)?;
                Ok(path)
            }
        }
    }

    /// Resolve and parse a dataset into a reference table
    pub fn load_table(&self, source: &DatasetSource, bits: u32) -> ScanResult<ReferenceTable> {
        let path = self
            .ensure(source)
            .map_err(|e| ScanError::DatasetLoad(format!("{:#}", e)))?;
        ReferenceTable::load_csv_file(&path, bits)
    }

    /// Download a dataset (blocking)
    fn download(&self, url: &str, path: &Path) -> Result<()> {
        if self.offline {
            anyhow::bail!(
                "Offline mode: cannot download dataset. Download {} manually and place it at {:?}",
                url,
                path
            );
        }

        info!("Downloading reference dataset from {}", url);

        let rt = Runtime::new().context("Failed to create tokio runtime")?;
        let (size, hash) = rt.block_on(async { self.download_file_async(url, path).await })?;

        self.update_manifest(url, path, size, hash)?;
        info!("Downloaded {} bytes to {:?}", size, path);
        Ok(())
    }

    async fn download_file_async(&self, url: &str, path: &Path) -> Result<(u64, String)> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(600))
            .build()
            .context("Failed to create HTTP client")?;

        let response = client
            .get(url)
            .send()
            .await
            .context("Failed to send download request")?;

        if !response.status().is_success() {
            anyhow::bail!("Download failed with status {}: {}", response.status(), url);
        }

        let total_size = response.content_length();
        debug!("Download size: {:?} bytes", total_size);

        let temp_path = path.with_extension("tmp");
        let mut file = std::fs::File::create(&temp_path).context("Failed to create temp file")?;

        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Error reading download stream")?;
            file.write_all(&chunk).context("Failed to write to temp file")?;
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;
        }

        file.flush().context("Failed to flush temp file")?;
        drop(file);

        let hash = format!("{:x}", hasher.finalize());
        if let Some(expected) = &self.expected_sha256 {
            if &hash != expected {
                std::fs::remove_file(&temp_path).ok();
                anyhow::bail!("Checksum mismatch for {}: expected {}, got {}", url, expected, hash);
            }
            info!("Checksum verified for {}", url);
        }

        std::fs::rename(&temp_path, path)
            .context("Failed to move downloaded file to final location")?;

        Ok((downloaded, hash))
    }

    fn update_manifest(&self, url: &str, path: &Path, size_bytes: u64, sha256: String) -> Result<()> {
        let mut manifest = self.load_manifest().unwrap_or_default();

        let info = DatasetInfo {
            url: url.to_string(),
            filename: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            size_bytes,
            sha256,
            downloaded_at: unix_timestamp(),
        };

        if let Some(existing) = manifest.datasets.iter_mut().find(|d| d.url == info.url) {
            *existing = info;
        } else {
            manifest.datasets.push(info);
        }

        self.save_manifest(&manifest)
    }

    pub fn load_manifest(&self) -> Result<DatasetManifest> {
        let manifest_path = self.datasets_dir.join("manifest.json");
        if manifest_path.exists() {
            let content = std::fs::read_to_string(&manifest_path)?;
            let manifest: DatasetManifest = serde_json::from_str(&content)?;
            Ok(manifest)
        } else {
            Ok(DatasetManifest::default())
        }
    }

    pub fn save_manifest(&self, manifest: &DatasetManifest) -> Result<()> {
        let manifest_path = self.datasets_dir.join("manifest.json");
        let content = serde_json::to_string_pretty(manifest)?;
        std::fs::write(manifest_path, content)?;
        Ok(())
    }
}

/// Dataset resolved through a [`DatasetManager`] when the session starts
pub struct DatasetLoader {
    manager: DatasetManager,
    source: DatasetSource,
}

impl DatasetLoader {
    pub fn new(manager: DatasetManager, source: DatasetSource) -> Self {
        Self { manager, source }
    }
}

impl TableSource for DatasetLoader {
    fn describe(&self) -> String {
        self.source.to_string()
    }

    fn load(self: Box<Self>, bits: u32) -> ScanResult<ReferenceTable> {
        self.manager.load_table(&self.source, bits)
    }
}

/// Seconds since the Unix epoch, as a string
fn unix_timestamp() -> String {
    use std::time::SystemTime;

    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    now.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CSV: &str = "scryfall_id,name,set,phash\nabc,Island,lea,12345\n";

    fn manager(dir: &TempDir, offline: bool) -> DatasetManager {
        let config = DatasetConfig {
            offline,
            ..Default::default()
        };
        DatasetManager::with_dir(dir.path().join("datasets"), &config).unwrap()
    }

    #[test]
    fn test_source_parsing() {
        assert_eq!(
            "https://example.com/phash.csv".parse::<DatasetSource>().unwrap(),
            DatasetSource::Url("https://example.com/phash.csv".to_string())
        );
        assert_eq!(
            "data/phash.csv".parse::<DatasetSource>().unwrap(),
            DatasetSource::Path(PathBuf::from("data/phash.csv"))
        );

        let config = DatasetConfig {
            source: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(config.source().is_none());
    }

    #[test]
    fn test_cached_path_is_stable_and_sanitized() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, true);

        let a = manager.cached_path("https://example.com/data/phash%20v2.csv?token=1");
        let b = manager.cached_path("https://example.com/data/phash%20v2.csv?token=1");
        let other = manager.cached_path("https://mirror.example.com/data/phash%20v2.csv");

        assert_eq!(a, b);
        assert_ne!(a, other);
        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with("-phash_20v2.csv"), "{}", name);
        assert!(a.starts_with(manager.datasets_dir()));
    }

    #[test]
    fn test_local_path_is_loaded() {
        let dir = TempDir::new().unwrap();
        let csv_path = dir.path().join("cards.csv");
        std::fs::write(&csv_path, CSV).unwrap();

        let manager = manager(&dir, true);
        let table = manager
            .load_table(&DatasetSource::Path(csv_path), 256)
            .unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.card(0).name, "Island");
    }

    #[test]
    fn test_missing_local_path_is_dataset_error() {
        let dir = TempDir::new().unwrap();
        let result = manager(&dir, true).load_table(&DatasetSource::Path(dir.path().join("nope.csv")), 256);
        assert!(matches!(result, Err(ScanError::DatasetLoad(_))));
    }

    #[test]
    fn test_offline_refuses_download() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, true);
        let err = manager
            .ensure(&DatasetSource::Url("https://example.invalid/phash.csv".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("Offline"));
    }

    #[test]
    fn test_cached_url_skips_download() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, true);
        let url = "https://example.invalid/phash.csv";
        std::fs::write(manager.cached_path(url), CSV).unwrap();

        assert!(manager.is_cached(url));
        let table = manager.load_table(&DatasetSource::Url(url.to_string()), 256).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_manifest_round_trip() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, true);
        assert!(manager.load_manifest().unwrap().datasets.is_empty());

        manager
            .update_manifest("https://example.invalid/a.csv", Path::new("x-a.csv"), 10, "ff".into())
            .unwrap();
        manager
            .update_manifest("https://example.invalid/a.csv", Path::new("x-a.csv"), 20, "ee".into())
            .unwrap();

        let manifest = manager.load_manifest().unwrap();
        assert_eq!(manifest.datasets.len(), 1);
        assert_eq!(manifest.datasets[0].size_bytes, 20);
        assert_eq!(manifest.datasets[0].filename, "x-a.csv");
    }

    #[test]
    fn test_preloaded_table_width_is_checked() {
        let table = ReferenceTable::from_entries(64, Vec::new()).unwrap();
        assert!(Box::new(table.clone()).load(64).is_ok());
        assert!(matches!(Box::new(table).load(256), Err(ScanError::DatasetLoad(_))));
    }
}
