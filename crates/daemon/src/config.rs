use anyhow::{anyhow, Context, Result};
use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// How clips are cut from the source video.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipStrategy {
    /// Always re-encode. Frame-accurate at both ends.
    Reencode,
    /// Try a stream copy first and re-encode only if it fails.
    CopyThenReencode,
}

impl FromStr for ClipStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reencode" | "re-encode" => Ok(ClipStrategy::Reencode),
            "copy_then_reencode" | "copy" => Ok(ClipStrategy::CopyThenReencode),
            other => Err(anyhow!("unknown clip strategy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub google_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_api_base: String,
    pub embedding_url: String,
    pub embedding_model: String,
    pub ffmpeg_bin: String,
    pub ytdlp_bin: String,
    /// Sources smaller than this are sent to analysis without a proxy.
    pub proxy_min_bytes: u64,
    pub clip_strategy: ClipStrategy,
    pub analysis_poll_interval: Duration,
    pub analysis_max_polls: u32,
    pub pipeline_timeout: Duration,
    pub command_timeout: Duration,
    pub query_limit: usize,
    pub thumbnail_concurrency: usize,
    pub max_upload_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 7777)),
            data_dir: PathBuf::from(".cache"),
            google_api_key: None,
            gemini_model: "gemini-3-flash-preview".to_string(),
            gemini_api_base: "https://generativelanguage.googleapis.com".to_string(),
            embedding_url: "http://127.0.0.1:8001".to_string(),
            embedding_model: "all-MiniLM-L6-v2".to_string(),
            ffmpeg_bin: "ffmpeg".to_string(),
            ytdlp_bin: "yt-dlp".to_string(),
            proxy_min_bytes: 50 * 1024 * 1024,
            clip_strategy: ClipStrategy::Reencode,
            analysis_poll_interval: Duration::from_secs(2),
            analysis_max_polls: 150,
            pipeline_timeout: Duration::from_secs(30 * 60),
            command_timeout: Duration::from_secs(10 * 60),
            query_limit: 5,
            thumbnail_concurrency: 4,
            max_upload_bytes: 2 * 1024 * 1024 * 1024,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let secs = |key: &str, default: Duration| -> Result<Duration> {
            Ok(Duration::from_secs(parse_or(&get, key, default.as_secs())?))
        };

        let config = Config {
            bind_addr: parse_or(&get, "BIND_ADDR", defaults.bind_addr)?,
            data_dir: get("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            google_api_key: get("GOOGLE_API_KEY"),
            gemini_model: get("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            gemini_api_base: get("GEMINI_API_BASE")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.gemini_api_base),
            embedding_url: get("EMBEDDING_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.embedding_url),
            embedding_model: get("EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
            ffmpeg_bin: get("FFMPEG_BIN").unwrap_or(defaults.ffmpeg_bin),
            ytdlp_bin: get("YTDLP_BIN").unwrap_or(defaults.ytdlp_bin),
            proxy_min_bytes: parse_or(&get, "PROXY_MIN_BYTES", defaults.proxy_min_bytes)?,
            clip_strategy: parse_or(&get, "CLIP_STRATEGY", defaults.clip_strategy)?,
            analysis_poll_interval: secs(
                "ANALYSIS_POLL_INTERVAL_SECS",
                defaults.analysis_poll_interval,
            )?,
            analysis_max_polls: parse_or(&get, "ANALYSIS_MAX_POLLS", defaults.analysis_max_polls)?,
            pipeline_timeout: secs("PIPELINE_TIMEOUT_SECS", defaults.pipeline_timeout)?,
            command_timeout: secs("COMMAND_TIMEOUT_SECS", defaults.command_timeout)?,
            query_limit: parse_or(&get, "QUERY_LIMIT", defaults.query_limit)?,
            thumbnail_concurrency: parse_or(
                &get,
                "THUMBNAIL_CONCURRENCY",
                defaults.thumbnail_concurrency,
            )?,
            max_upload_bytes: parse_or(&get, "MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
        };

        if config.analysis_max_polls == 0 {
            anyhow::bail!("ANALYSIS_MAX_POLLS must be at least 1");
        }
        if config.query_limit == 0 || config.thumbnail_concurrency == 0 {
            anyhow::bail!("QUERY_LIMIT and THUMBNAIL_CONCURRENCY must be at least 1");
        }

        Ok(config)
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow!("{}", e))
            .with_context(|| format!("invalid value for {}: '{}'", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind_addr.port(), 7777);
        assert_eq!(config.proxy_min_bytes, 50 * 1024 * 1024);
        assert_eq!(config.clip_strategy, ClipStrategy::Reencode);
        assert_eq!(config.analysis_max_polls, 150);
        assert!(config.google_api_key.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let config = Config::from_lookup(lookup(&[
            ("BIND_ADDR", "0.0.0.0:9000"),
            ("CLIP_STRATEGY", "copy_then_reencode"),
            ("PROXY_MIN_BYTES", "1024"),
            ("ANALYSIS_POLL_INTERVAL_SECS", "5"),
            ("EMBEDDING_URL", "http://embed:8001/"),
            ("GOOGLE_API_KEY", "  "),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.clip_strategy, ClipStrategy::CopyThenReencode);
        assert_eq!(config.proxy_min_bytes, 1024);
        assert_eq!(config.analysis_poll_interval, Duration::from_secs(5));
        assert_eq!(config.embedding_url, "http://embed:8001");
        assert!(config.google_api_key.is_none());
    }

    #[test]
    fn rejects_unparsable_values() {
        let err = Config::from_lookup(lookup(&[("QUERY_LIMIT", "many")])).unwrap_err();
        assert!(format!("{:#}", err).contains("QUERY_LIMIT"));
        assert!(Config::from_lookup(lookup(&[("CLIP_STRATEGY", "magic")])).is_err());
        assert!(Config::from_lookup(lookup(&[("ANALYSIS_MAX_POLLS", "0")])).is_err());
    }
}
