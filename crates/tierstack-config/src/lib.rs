pub mod error;

pub use error::*;

use std::path::{Path, PathBuf};

/// Environment variable that points directly at a stack file
pub const CONFIG_PATH_ENV: &str = "TIERSTACK_CONFIG_PATH";

/// Directory name used for per-project files (stack file, state, lock)
pub const PROJECT_DIR: &str = ".tierstack";

const CANDIDATES: [&str; 4] = ["stack.local.kdl", ".stack.local.kdl", "stack.kdl", ".stack.kdl"];

/// Get the global tierstack config directory, creating it if needed
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("tierstack");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Locate the stack file starting from the current directory
pub fn find_stack_file() -> Result<PathBuf> {
    let current_dir = std::env::current_dir()?;
    find_stack_file_in(&current_dir)
}

/// Locate the stack file starting from `dir`
///
/// Search order:
/// 1. `TIERSTACK_CONFIG_PATH`
/// 2. `dir`: stack.local.kdl, .stack.local.kdl, stack.kdl, .stack.kdl
/// 3. `dir/.tierstack/`: same order
/// 4. `~/.config/tierstack/stack.kdl`
pub fn find_stack_file_in(dir: &Path) -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            tracing::debug!(path = %path.display(), "Using stack file from environment");
            return Ok(path);
        }
        tracing::warn!(path = %path.display(), "{} points at a missing file", CONFIG_PATH_ENV);
    }

    for filename in &CANDIDATES {
        let path = dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    let project_dir = dir.join(PROJECT_DIR);
    if project_dir.is_dir() {
        for filename in &CANDIDATES {
            let path = project_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("tierstack").join("stack.kdl");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::StackFileNotFound)
}

/// Project root for a stack file: the directory holding it, or the parent
/// of `.tierstack/` when the file lives there
pub fn project_root_for(stack_file: &Path) -> PathBuf {
    let parent = stack_file.parent().unwrap_or_else(|| Path::new("."));
    if parent.file_name().is_some_and(|n| n == PROJECT_DIR) {
        parent.parent().unwrap_or(parent).to_path_buf()
    } else {
        parent.to_path_buf()
    }
}
