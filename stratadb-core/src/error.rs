use thiserror::Error;

pub type Result<T> = std::result::Result<T, StrataError>;

#[derive(Error, Debug, Clone)]
pub enum StrataError {
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("timestamp out of range: {0}")]
    InvalidTime(i64),

    #[error("timestamp in the future: {0}")]
    Future(i64),

    #[error("invalid range: [{0}, {1})")]
    Range(i64, i64),

    #[error("not found")]
    NotFound,

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("wildcard or empty field not allowed here")]
    NoWild,

    #[error("slot or range out of record bounds: {0}")]
    Bounds(usize),

    #[error("corrupt data: {0}")]
    Corrupt(String),

    #[error("short read: wanted {wanted} bytes, got {got}")]
    ShortRead { wanted: usize, got: usize },

    #[error("short write: wanted {wanted} bytes, wrote {wrote}")]
    ShortWrite { wanted: usize, wrote: usize },

    #[error("handle is closed")]
    Closed,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StrataError {
    fn from(err: std::io::Error) -> Self {
        StrataError::Io(err.to_string())
    }
}
