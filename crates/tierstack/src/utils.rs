use crate::StackOptions;
use colored::Colorize;
use std::path::PathBuf;
use tierstack_cloud::{CloudError, MemoryProvider, MemorySecretStore, StackState, StateManager};
use tierstack_config::ConfigError;
use tierstack_core::{StackConfig, StackError};

/// Stack configuration with everything needed to locate its state
pub struct LoadedStack {
    pub config: StackConfig,

    /// Stack file, `None` when running on defaults
    pub source: Option<PathBuf>,

    /// Directory holding `.tierstack/`
    pub project_root: PathBuf,
}

impl LoadedStack {
    pub fn state_manager(&self) -> StateManager {
        StateManager::new(&self.project_root)
    }

    /// In-memory provider and secret store holding everything in `state`
    pub fn backends(&self, state: &StackState) -> (MemoryProvider, MemorySecretStore) {
        let (region, account) = (&self.config.region, &self.config.account);
        (
            MemoryProvider::from_state(region, account, state),
            MemorySecretStore::from_state(region, account, state),
        )
    }
}

/// Load the stack file (explicit, discovered or none) and apply CLI overrides
pub fn load_stack(options: &StackOptions) -> anyhow::Result<LoadedStack> {
    let source = match &options.config {
        Some(path) => Some(path.clone()),
        None => match tierstack_config::find_stack_file() {
            Ok(path) => Some(path),
            Err(ConfigError::StackFileNotFound) => None,
            Err(e) => return Err(e.into()),
        },
    };

    let mut config = match &source {
        Some(path) => tierstack_core::load_stack(path)?,
        None => {
            tracing::info!("No stack file found, using defaults");
            StackConfig::default()
        }
    };
    apply_overrides(options, &mut config)?;

    let project_root = match &source {
        Some(path) => tierstack_config::project_root_for(path),
        None => std::env::current_dir()?,
    };

    Ok(LoadedStack {
        config,
        source,
        project_root,
    })
}

fn apply_overrides(options: &StackOptions, config: &mut StackConfig) -> anyhow::Result<()> {
    if let Some(cidr) = &options.base_cidr {
        config.network.cidr = cidr.parse()?;
    }
    if let Some(az_count) = options.az_count {
        config.network.az_count = az_count;
    }
    if let Some(size) = options.compute_fleet_size {
        config.compute.fleet_size = size;
    }
    if let Some(size) = options.db_fleet_size {
        config.database.fleet_size = size;
    }
    if let Some(repo_ref) = &options.trusted_repo_ref {
        config.ci_trust.repo_ref = repo_ref.clone();
    }
    Ok(())
}

/// Print which stack file was loaded
pub fn print_stack_source(loaded: &LoadedStack) {
    match &loaded.source {
        Some(path) => println!("📄 Stack file: {}", path.display().to_string().cyan()),
        None => println!("📄 Stack file: {}", "(none, using defaults)".dimmed()),
    }
    println!("Stack: {}", loaded.config.name.cyan());
}

/// Short error category for the failure line
pub fn error_kind(err: &anyhow::Error) -> &'static str {
    if let Some(e) = err.downcast_ref::<StackError>() {
        return e.kind();
    }
    match err.downcast_ref::<CloudError>() {
        Some(CloudError::Stack(e)) => e.kind(),
        Some(CloudError::LockError(_) | CloudError::StateError(_)) => "StateError",
        Some(_) => "ProvisioningError",
        None if err.downcast_ref::<ConfigError>().is_some() => "ConfigError",
        None => "Error",
    }
}
