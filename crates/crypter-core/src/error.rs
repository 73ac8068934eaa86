use thiserror::Error;

pub type CrypterResult<T> = Result<T, CrypterError>;

#[derive(Debug, Error)]
pub enum CrypterError {
    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
