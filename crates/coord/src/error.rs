/// Errors from the coordination layer.
#[derive(Debug, thiserror::Error)]
pub enum CoordError {
    /// The shared store could not be reached or rejected the command.
    /// Always soft: callers skip the tick and try again later.
    #[error("Shared store unavailable: {0}")]
    Unavailable(String),

    /// A queue entry or snapshot could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl CoordError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CoordError::Unavailable(_))
    }
}

impl From<redis::RedisError> for CoordError {
    fn from(err: redis::RedisError) -> Self {
        CoordError::Unavailable(err.to_string())
    }
}
