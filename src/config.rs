use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::collection::DedupScope;

pub const DEFAULT_API_BASE_URL: &str = "https://api.wanikani.com/v2";

#[derive(Parser, Debug)]
#[command(name = "vocabsync")]
#[command(about = "Imports WaniKani vocabulary into a local flashcard collection", long_about = None)]
pub struct Cli {
    #[arg(short = 'c', long = "config")]
    pub config_path: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run one sync cycle (default).
    Sync,
    /// Show the watermark and how many notes the deck holds.
    Status,
}

pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".vocabsync")
}

pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.yaml")
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub api_key: String,
    pub deck_name: String,
    #[serde(default)]
    pub include_audio: bool,
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_rate_limit_margin")]
    pub rate_limit_margin_secs: u64,
    #[serde(default)]
    pub dedup_scope: DedupScope,
}

fn default_collection() -> String {
    "collection.db".to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_rate_limit_margin() -> u64 {
    5
}

impl Config {
    pub fn new(path: &str) -> Result<Self> {
        let cfg = Config::load_config(path)?;
        if cfg.api_key.trim().is_empty() {
            anyhow::bail!("api_key is empty in {}", path);
        }
        Ok(cfg)
    }

    fn load_config(path: &str) -> Result<Config> {
        let yaml_str = fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
        let yaml_with_env = Config::substitute_env_vars(&yaml_str)?;
        let config: Config = serde_yaml::from_str(&yaml_with_env)?;
        Ok(config)
    }

    /// Resolves the collection path against the directory holding the config file.
    pub fn collection_path(&self, config_dir: &Path) -> PathBuf {
        let path = Path::new(&self.collection);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            config_dir.join(path)
        }
    }

    pub fn rate_limit_margin(&self) -> Duration {
        Duration::from_secs(self.rate_limit_margin_secs)
    }

    /// Rewrites `last_sync` in the config file.
    ///
    /// Only the top-level `last_sync:` line is replaced (or appended), so
    /// comments and `${VAR}` placeholders survive and resolved secrets never
    /// land on disk.
    pub fn write_last_sync(path: &str, last_sync: DateTime<Utc>) -> Result<()> {
        let yaml_str = fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
        let updated = Config::replace_last_sync(&yaml_str, last_sync);

        let doc: serde_yaml::Value = serde_yaml::from_str(&updated)
            .with_context(|| format!("rewriting last_sync in {}", path))?;
        if !doc.is_mapping() {
            anyhow::bail!("config root in {} is not a mapping", path);
        }

        let tmp_path = format!("{}.tmp", path);
        fs::write(&tmp_path, updated)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    fn replace_last_sync(yaml_str: &str, last_sync: DateTime<Utc>) -> String {
        let line = format!(
            "last_sync: {}",
            last_sync.to_rfc3339_opts(SecondsFormat::Micros, true)
        );

        let mut replaced = false;
        let mut lines: Vec<String> = yaml_str
            .lines()
            .map(|l| {
                if !replaced && l.starts_with("last_sync:") {
                    replaced = true;
                    line.clone()
                } else {
                    l.to_string()
                }
            })
            .collect();
        if !replaced {
            lines.push(line);
        }

        let mut out = lines.join("\n");
        out.push('\n');
        out
    }

    fn substitute_env_vars(yaml_str: &str) -> Result<String> {
        let mut result = yaml_str.to_string();
        let mut offset = 0;

        while let Some(start) = result[offset..].find("${") {
            let actual_start = offset + start;
            if let Some(end) = result[actual_start..].find("}") {
                let var_name = &result[actual_start + 2..actual_start + end];

                // ${VAR:-default}
                let env_value = if let Some(default_start) = var_name.find(":-") {
                    let actual_var = &var_name[..default_start];
                    let default_val = &var_name[default_start + 2..];
                    env::var(actual_var).unwrap_or_else(|_| default_val.to_string())
                } else {
                    env::var(var_name).unwrap_or_else(|_| {
                        tracing::warn!("environment variable '{}' not found", var_name);
                        String::new()
                    })
                };

                result.replace_range(actual_start..actual_start + end + 1, &env_value);
                offset = actual_start + env_value.len();
            } else {
                break;
            }
        }

        Ok(result)
    }
}
