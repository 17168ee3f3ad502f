use thiserror::Error;

#[derive(Error, Debug)]
pub enum SubFinderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Invalid exclude pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    #[error("{backend}: {message}")]
    Backend { backend: String, message: String },

    #[error("{backend} doesn't support \"{language}\" language")]
    UnsupportedLanguage { backend: String, language: String },

    #[error("{backend} doesn't support \"{ext}\" ext")]
    UnsupportedExt { backend: String, ext: String },

    #[error("Invalid response from {backend}: {message}")]
    InvalidResponse { backend: String, message: String },

    #[error("Refusing to write subtitle with unsafe file name '{0}'")]
    UnsafeFilename(String),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl SubFinderError {
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            backend: backend.into(),
            message: message.into(),
        }
    }

    pub fn invalid_response(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            backend: backend.into(),
            message: message.into(),
        }
    }

    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }
}

pub type Result<T> = std::result::Result<T, SubFinderError>;
