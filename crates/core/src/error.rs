use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Tab not found: {0}")]
    TabNotFound(String),

    #[error("Browser engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Search upstream error: {0}")]
    Upstream(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for the errors a request handler should map to a 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::SessionNotFound(_) | Error::TabNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
