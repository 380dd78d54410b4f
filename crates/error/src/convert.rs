use crate::{ConfluxError, ErrorCode, ErrorContext};

impl From<std::io::Error> for ConfluxError {
    fn from(err: std::io::Error) -> Self {
        ConfluxError::new(ErrorCode::InternalPanic, err.to_string())
    }
}

impl From<serde_json::Error> for ConfluxError {
    fn from(err: serde_json::Error) -> Self {
        ConfluxError::new(ErrorCode::SerializationFailed, err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfluxError {
    fn from(err: serde_yaml::Error) -> Self {
        let line = err.location().map(|l| l.line());
        let mut error = ConfluxError::new(ErrorCode::InvalidConfig, err.to_string());
        if let Some(line) = line {
            error = error.with_hint(format!("Check the YAML near line {}", line));
        }
        error.with_context(ErrorContext::Config {
            file_path: None,
            field: None,
        })
    }
}
