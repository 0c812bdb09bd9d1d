use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config directory not found")]
    ConfigDirNotFound,

    #[error(
        "stack file not found. Looked in:\n\
        - current directory: stack.local.kdl, .stack.local.kdl, stack.kdl, .stack.kdl\n\
        - ./.tierstack/ directory\n\
        - ~/.config/tierstack/stack.kdl\n\
        Set TIERSTACK_CONFIG_PATH to point at a file directly"
    )]
    StackFileNotFound,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
