use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Corruption,
    TypeMismatch,
    InvalidInput,
    NotInitialized,
    CloseFailure,
    WalReplay,
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
    pub causes: Vec<Error>,
}

impl Error {
    pub fn new(kind: ErrorKind, context: impl Into<String>) -> Self {
        Error {
            kind,
            context: context.into(),
            causes: Vec::new(),
        }
    }

    /// One failure wrapping several component failures (close, replay).
    pub fn aggregate(kind: ErrorKind, context: impl Into<String>, causes: Vec<Error>) -> Self {
        Error {
            kind,
            context: context.into(),
            causes,
        }
    }

    pub fn corruption(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::Corruption, context)
    }

    pub fn invalid_input(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::InvalidInput, context)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.context)?;
        for cause in &self.causes {
            write!(f, "; caused by {}", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            kind: ErrorKind::Io,
            context: err.to_string(),
            causes: Vec::new(),
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error {
            kind: ErrorKind::Corruption,
            context: err.to_string(),
            causes: Vec::new(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            kind: ErrorKind::Corruption,
            context: err.to_string(),
            causes: Vec::new(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
