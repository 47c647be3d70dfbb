use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Global configuration loaded from `~/.config/omega/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OmegaConfig {
    /// Maximum number of downloader processes (active tasks) at once.
    pub max_concurrent_downloads: usize,
    /// Downloader executable, looked up on PATH.
    pub downloader_program: String,
    /// Page URL the video code is appended to as the `v` query parameter.
    pub video_url_base: String,
    /// Extra downloader flags used when relaunching after a missing data blocks error.
    pub format_override_args: Vec<String>,
    /// Delay before relaunching a task after a retryable error.
    pub retry_backoff_secs: f64,
    /// Delay between a recorded outcome and the next refill.
    pub refill_settle_secs: f64,
    /// Spawn delay increment between items fetched in the same refill.
    pub spawn_stagger_secs: f64,
    /// Idle timer that triggers a refill even when nothing else does.
    pub refill_interval_secs: u64,
    /// Console redraw cadence.
    pub status_interval_ms: u64,
    /// Priority given to items added without an explicit one.
    pub default_priority: i64,
    /// Directory for per-task transcripts; defaults to `~/.local/state/omega/logs`.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl Default for OmegaConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 3,
            downloader_program: "youtube-dl".to_string(),
            video_url_base: "https://www.youtube.com/watch".to_string(),
            format_override_args: vec!["-f".to_string(), "bestvideo[ext=mp4]".to_string()],
            retry_backoff_secs: 5.0,
            refill_settle_secs: 2.0,
            spawn_stagger_secs: 1.0,
            refill_interval_secs: 30,
            status_interval_ms: 1000,
            default_priority: 100,
            log_dir: None,
        }
    }
}

impl OmegaConfig {
    pub fn retry_backoff(&self) -> Duration {
        secs_f64(self.retry_backoff_secs)
    }

    pub fn refill_settle(&self) -> Duration {
        secs_f64(self.refill_settle_secs)
    }

    pub fn spawn_stagger(&self) -> Duration {
        secs_f64(self.spawn_stagger_secs)
    }

    pub fn refill_interval(&self) -> Duration {
        Duration::from_secs(self.refill_interval_secs.max(1))
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms.max(50))
    }

    /// Configured transcript directory, or the XDG state default.
    pub fn resolved_log_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.log_dir {
            return Ok(dir.clone());
        }
        let xdg_dirs = xdg::BaseDirectories::with_prefix("omega")?;
        Ok(xdg_dirs.get_state_home().join("logs"))
    }
}

/// Negative or NaN values collapse to zero instead of panicking.
fn secs_f64(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("omega")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<OmegaConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = OmegaConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: OmegaConfig = toml::from_str(&data)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = OmegaConfig::default();
        assert_eq!(cfg.max_concurrent_downloads, 3);
        assert_eq!(cfg.downloader_program, "youtube-dl");
        assert_eq!(cfg.retry_backoff(), Duration::from_secs(5));
        assert_eq!(cfg.refill_settle(), Duration::from_secs(2));
        assert_eq!(cfg.spawn_stagger(), Duration::from_secs(1));
        assert_eq!(cfg.refill_interval(), Duration::from_secs(30));
        assert_eq!(cfg.status_interval(), Duration::from_secs(1));
        assert_eq!(cfg.format_override_args, vec!["-f", "bestvideo[ext=mp4]"]);
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = OmegaConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: OmegaConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.max_concurrent_downloads, cfg.max_concurrent_downloads);
        assert_eq!(parsed.video_url_base, cfg.video_url_base);
        assert_eq!(parsed.format_override_args, cfg.format_override_args);
        assert!(parsed.log_dir.is_none());
    }

    #[test]
    fn config_toml_custom_values() {
        let toml = r#"
            max_concurrent_downloads = 8
            downloader_program = "yt-dlp"
            video_url_base = "https://www.youtube.com/watch"
            format_override_args = ["-f", "best"]
            retry_backoff_secs = 0.5
            refill_settle_secs = 0.0
            spawn_stagger_secs = 0.25
            refill_interval_secs = 10
            status_interval_ms = 500
            default_priority = 50
            log_dir = "/tmp/omega-logs"
        "#;
        let cfg: OmegaConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.max_concurrent_downloads, 8);
        assert_eq!(cfg.downloader_program, "yt-dlp");
        assert_eq!(cfg.retry_backoff(), Duration::from_millis(500));
        assert_eq!(cfg.refill_settle(), Duration::ZERO);
        assert_eq!(cfg.spawn_stagger(), Duration::from_millis(250));
        assert_eq!(cfg.default_priority, 50);
        assert_eq!(
            cfg.resolved_log_dir().unwrap(),
            PathBuf::from("/tmp/omega-logs")
        );
    }

    #[test]
    fn negative_durations_clamp_to_zero() {
        let cfg = OmegaConfig {
            retry_backoff_secs: -1.0,
            refill_interval_secs: 0,
            ..OmegaConfig::default()
        };
        assert_eq!(cfg.retry_backoff(), Duration::ZERO);
        assert_eq!(cfg.refill_interval(), Duration::from_secs(1));
    }
}
