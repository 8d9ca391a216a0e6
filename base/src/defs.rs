use std::error::Error as StdError;
use std::fmt::{Display, Formatter, Result as FmtResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    IoError,
    MalformedData,
    UnsupportedFeature,
    InconsistentState,
    ImageError,
    ValidationError,
    NumericalError,
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub description: String,
    pub source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind, description: String) -> Self {
        Self {
            kind,
            description,
            source: None,
        }
    }

    pub fn with_source<E: StdError + Send + Sync + 'static>(
        kind: ErrorKind,
        description: String,
        source: E,
    ) -> Self {
        Self {
            kind,
            description,
            source: Some(Box::new(source)),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{:?}: {}", self.kind, self.description)?;
        if let Some(source) = &self.source {
            write!(f, " ({})", source)?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|s| s.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::with_source(ErrorKind::IoError, "I/O failure".to_string(), err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// Wraps foreign failures into `Error`, attaching a lazily built description.
pub trait IntoResult<T> {
    fn res<F: FnOnce() -> String>(self, desc_fn: F) -> Result<T>;
}

impl<T, E: StdError + Send + Sync + 'static> IntoResult<T>
    for std::result::Result<T, E>
{
    fn res<F: FnOnce() -> String>(self, desc_fn: F) -> Result<T> {
        self.map_err(|e| Error::with_source(ErrorKind::IoError, desc_fn(), e))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_error_display_includes_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let res: std::result::Result<(), _> = Err(io);
        let err = res
            .res(|| "failed to open file 'x'".to_string())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::IoError);
        assert_eq!(&err.description, "failed to open file 'x'");
        assert_eq!(err.to_string(), "IoError: failed to open file 'x' (gone)");
    }
}
