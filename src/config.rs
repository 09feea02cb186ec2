use anyhow::{Context, Result};
use chrono::Duration;
use clap::Parser;
use std::{env, path::PathBuf};

/// Lifetime of shared files, share records and staged uploads.
pub const SHARE_TTL_HOURS: i64 = 24;

const MIB: usize = 1024 * 1024;

/// Credentials and addressing for the R2 bucket.
#[derive(Clone)]
pub struct R2Config {
    pub account_id: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
}

impl R2Config {
    /// S3-compatible endpoint for the account.
    pub fn endpoint(&self) -> String {
        format!("https://{}.r2.cloudflarestorage.com", self.account_id)
    }
}

impl std::fmt::Debug for R2Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("R2Config")
            .field("account_id", &self.account_id)
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Root of all local state (`chunks/`, `shares/`, `local-files/`, `objects/`).
    pub tmp_dir: PathBuf,
    pub max_chunk_bytes: usize,
    pub sweep_interval_secs: u64,
    pub r2: Option<R2Config>,
    pub public_url: Option<String>,
    pub cleanup_api_key: Option<String>,
    pub allow_internal_trigger: bool,
    pub cache_capacity: usize,
    pub cache_ttl_secs: u64,
    pub presign_ttl_secs: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Chunked WAV upload and sharing service")]
pub struct Args {
    /// Host to bind to (overrides WAVSHARE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides WAVSHARE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory for chunks, shares and merged files (overrides WAVSHARE_TMP_DIR)
    #[arg(long)]
    pub tmp_dir: Option<String>,

    /// Largest accepted chunk, in MiB (overrides WAVSHARE_MAX_CHUNK_MIB)
    #[arg(long)]
    pub max_chunk_mib: Option<usize>,

    /// Seconds between background sweeps, 0 disables (overrides WAVSHARE_SWEEP_INTERVAL_SECS)
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("WAVSHARE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env("WAVSHARE_PORT", 3000u16)?;
        let env_tmp = env::var("WAVSHARE_TMP_DIR").unwrap_or_else(|_| "./tmp".into());
        let env_chunk_mib = parse_env("WAVSHARE_MAX_CHUNK_MIB", 10usize)?;
        let env_sweep = parse_env("WAVSHARE_SWEEP_INTERVAL_SECS", 3600u64)?;
        let allow_internal_trigger = parse_env("WAVSHARE_ALLOW_INTERNAL_TRIGGER", true)?;

        let r2 = match (
            non_empty_env("R2_ACCOUNT_ID"),
            non_empty_env("R2_ACCESS_KEY_ID"),
            non_empty_env("R2_SECRET_ACCESS_KEY"),
            non_empty_env("R2_BUCKET_NAME"),
        ) {
            (Some(account_id), Some(access_key_id), Some(secret_access_key), Some(bucket)) => {
                Some(R2Config {
                    account_id,
                    access_key_id,
                    secret_access_key,
                    bucket,
                })
            }
            _ => None,
        };

        // --- Merge ---
        let mut cfg = Self::local(args.tmp_dir.unwrap_or(env_tmp));
        cfg.host = args.host.unwrap_or(env_host);
        cfg.port = args.port.unwrap_or(env_port);
        cfg.max_chunk_bytes = args.max_chunk_mib.unwrap_or(env_chunk_mib) * MIB;
        cfg.sweep_interval_secs = args.sweep_interval_secs.unwrap_or(env_sweep);
        cfg.r2 = r2;
        cfg.public_url = non_empty_env("R2_PUBLIC_URL").map(|u| u.trim_end_matches('/').into());
        cfg.cleanup_api_key = non_empty_env("CLEANUP_API_KEY");
        cfg.allow_internal_trigger = allow_internal_trigger;

        Ok(cfg)
    }

    /// Defaults for a purely local deployment rooted at `tmp_dir`.
    pub fn local(tmp_dir: impl Into<PathBuf>) -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            tmp_dir: tmp_dir.into(),
            max_chunk_bytes: 10 * MIB,
            sweep_interval_secs: 3600,
            r2: None,
            public_url: None,
            cleanup_api_key: None,
            allow_internal_trigger: true,
            cache_capacity: 1024,
            cache_ttl_secs: 600,
            presign_ttl_secs: 3600,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn ttl(&self) -> Duration {
        Duration::hours(SHARE_TTL_HOURS)
    }

    /// Request body cap: one chunk plus room for the multipart envelope.
    pub fn body_limit(&self) -> usize {
        self.max_chunk_bytes + MIB
    }

    pub fn chunks_dir(&self) -> PathBuf {
        self.tmp_dir.join("chunks")
    }

    pub fn shares_dir(&self) -> PathBuf {
        self.tmp_dir.join("shares")
    }

    pub fn local_files_dir(&self) -> PathBuf {
        self.tmp_dir.join("local-files")
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.tmp_dir.join("objects")
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_layout_hangs_off_tmp_dir() {
        let cfg = AppConfig::local("/srv/wav");
        assert_eq!(cfg.chunks_dir(), PathBuf::from("/srv/wav/chunks"));
        assert_eq!(cfg.shares_dir(), PathBuf::from("/srv/wav/shares"));
        assert_eq!(cfg.local_files_dir(), PathBuf::from("/srv/wav/local-files"));
        assert_eq!(cfg.max_chunk_bytes, 10 * 1024 * 1024);
        assert_eq!(cfg.ttl(), Duration::hours(24));
    }

    #[test]
    fn r2_endpoint_uses_account_id() {
        let r2 = R2Config {
            account_id: "abc123".into(),
            access_key_id: "key".into(),
            secret_access_key: "secret".into(),
            bucket: "wav".into(),
        };
        assert_eq!(r2.endpoint(), "https://abc123.r2.cloudflarestorage.com");
        assert!(!format!("{:?}", r2).contains("secret"));
    }
}
