//! Environment configuration.
//!
//! Mirrors `betterbot-backend`'s pattern of a plain config struct populated
//! from `env::var` with sane defaults, loaded once at process start via
//! `dotenv`. The core never reads the environment implicitly mid-operation,
//! callers resolve a [`CoreConfig`] up front and thread it through.

use std::env;
use std::path::PathBuf;

/// Magic literal the live-execute token file must contain, verbatim.
pub const LIVE_TOKEN_MAGIC: &str = "LIVE-EXECUTE-ARMED-v1";

#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Root of the `outputs/` artifact tree.
    pub outputs_root: PathBuf,
    /// Override for the season index root (`SEASON_INDEX_ROOT`).
    pub season_index_root: PathBuf,
    /// Override for the dataset registry root (`DATASET_REGISTRY_ROOT`).
    pub dataset_registry_root: PathBuf,
    /// Whether `LIVE_EXECUTE` actions are armed at all (`ENABLE_LIVE=1`).
    pub enable_live: bool,
    /// Path to the live-execute token file (`LIVE_TOKEN_PATH`).
    pub live_token_path: Option<PathBuf>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            outputs_root: PathBuf::from("outputs"),
            season_index_root: PathBuf::from("outputs/season_index"),
            dataset_registry_root: PathBuf::from("outputs/datasets"),
            enable_live: false,
            live_token_path: None,
        }
    }
}

impl CoreConfig {
    /// Resolve configuration from environment variables, falling back to
    /// defaults rooted under `outputs/`.
    pub fn from_env() -> Self {
        let outputs_root = env::var("OUTPUTS_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("outputs"));

        let season_index_root = env::var("SEASON_INDEX_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| outputs_root.join("season_index"));

        let dataset_registry_root = env::var("DATASET_REGISTRY_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| outputs_root.join("datasets"));

        let enable_live = env::var("ENABLE_LIVE").map(|v| v == "1").unwrap_or(false);
        let live_token_path = env::var("LIVE_TOKEN_PATH").ok().map(PathBuf::from);

        Self {
            outputs_root,
            season_index_root,
            dataset_registry_root,
            enable_live,
            live_token_path,
        }
    }
}

/// Load a `.env` file if present. Only binaries should call this, at the top
/// of `main()`. The library never mutates process environment on its own.
pub fn load_dotenv() {
    let _ = dotenv::dotenv();
}

/// Initialize tracing with an `EnvFilter` + compact formatter, matching the
/// logging convention used across this crate's binaries.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quantbench=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_rooted_under_outputs() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.outputs_root, PathBuf::from("outputs"));
        assert!(!cfg.enable_live);
    }
}
