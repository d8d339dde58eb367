use thiserror::Error;

pub type CourierResult<T> = Result<T, CourierError>;

#[derive(Debug, Error)]
pub enum CourierError {
    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
