use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemoError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Environment variable {name} has invalid value {value:?}")]
    EnvVar { name: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, MemoError>;
