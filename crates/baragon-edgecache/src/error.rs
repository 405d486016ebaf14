#[derive(Debug, thiserror::Error)]
pub enum EdgeCacheError {
    #[error("edge cache request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("edge cache API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("unexpected edge cache response: {0}")]
    Decode(String),
}

pub type EdgeCacheResult<T> = Result<T, EdgeCacheError>;
