//! Filesystem locations used by Agora.
//!
//! # Storage Structure
//!
//! All application data is stored under `~/.agora/`:
//!
//! ```text
//! ~/.agora/
//! ├── config/       # agents.json, .env.local
//! └── state/        # conversation records
//! ```
//!
//! # Environment Variables
//!
//! - `AGORA_STATE_DIR`: Override the base directory
//! - `AGORA_CONFIG_DIR`: Override the config directory

use std::path::PathBuf;

/// Environment variable for a custom base directory.
pub const STATE_DIR_ENV: &str = "AGORA_STATE_DIR";

/// Environment variable for a custom config directory.
pub const CONFIG_DIR_ENV: &str = "AGORA_CONFIG_DIR";

/// Default base directory name under home.
const DEFAULT_STATE_DIR: &str = ".agora";

const CONFIG_SUBDIR: &str = "config";
const STATE_SUBDIR: &str = "state";

/// Get the Agora base directory.
///
/// Resolved from:
/// 1. `AGORA_STATE_DIR` if set
/// 2. `~/.agora` if a home directory is available
/// 3. `.agora` in the current directory
pub fn state_dir() -> PathBuf {
    std::env::var(STATE_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(DEFAULT_STATE_DIR))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR))
        })
}

/// Get the config directory (`~/.agora/config/` or `AGORA_CONFIG_DIR`).
pub fn config_dir() -> PathBuf {
    std::env::var(CONFIG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| state_dir().join(CONFIG_SUBDIR))
}

/// Get the runtime state directory holding conversation records.
pub fn runtime_state_dir() -> PathBuf {
    state_dir().join(STATE_SUBDIR)
}

/// Get the agents definition file path.
pub fn agents_file() -> PathBuf {
    config_dir().join("agents.json")
}

/// Get the `.env.local` file path for secrets and overrides.
pub fn env_file() -> PathBuf {
    config_dir().join(".env.local")
}

/// Ensure the config and state directories exist.
///
/// # Errors
/// Returns an error if any directory cannot be created.
pub fn ensure_all_dirs() -> std::io::Result<()> {
    std::fs::create_dir_all(config_dir())?;
    std::fs::create_dir_all(runtime_state_dir())?;
    Ok(())
}

/// Load environment overrides.
///
/// Reads `~/.agora/config/.env.local` first, then a local `.env.local` or
/// `.env`. Variables already set in the process environment win.
pub fn load_env() {
    let env_path = env_file();
    if env_path.exists() {
        let _ = dotenvy::from_path(&env_path);
    }
    let _ = dotenvy::from_filename(".env.local").or_else(|_| dotenvy::dotenv());
}

#[cfg(test)]
mod tests {
    use super::*;

    // Environment variables can't be isolated across parallel tests, so these
    // only check the path shapes.

    #[test]
    fn test_runtime_state_dir_name() {
        assert!(runtime_state_dir().ends_with("state"));
    }

    #[test]
    fn test_agents_file_name() {
        assert!(agents_file().ends_with("agents.json"));
    }

    #[test]
    fn test_env_file_name() {
        assert!(env_file().ends_with(".env.local"));
    }
}
