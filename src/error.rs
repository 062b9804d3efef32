/// Failures surfaced to the operator. Shape mismatches between trees are not
/// errors; they come back as diff records.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("malformed snapshot: {0}")]
    MalformedSnapshot(String),
    #[error("snapshot store unavailable: {0}")]
    StoreUnavailable(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Operator-facing explanation, one line, no debug noise.
    pub fn explain(&self) -> String {
        match self {
            Error::DeviceUnavailable(reason) => {
                format!("The heating controller could not be reached ({reason}). Nothing was changed.")
            }
            Error::MalformedSnapshot(reason) => {
                format!("The settings document could not be read: {reason}")
            }
            Error::StoreUnavailable(reason) => {
                format!("The snapshot file could not be accessed ({reason}). Nothing was changed.")
            }
        }
    }
}

// serde_yaml puts the line/column into its Display output.
impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::MalformedSnapshot(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::DeviceUnavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_error_carries_location() {
        let err: Error = serde_yaml::from_str::<Vec<u32>>("- 1\n- nope\n")
            .unwrap_err()
            .into();
        match err {
            Error::MalformedSnapshot(msg) => assert!(msg.contains("line 2")),
            other => panic!("expected MalformedSnapshot, got {:?}", other),
        }
    }

    #[test]
    fn test_explain_mentions_reason() {
        let err = Error::DeviceUnavailable("timed out after 30s".into());
        assert!(err.explain().contains("timed out after 30s"));
        assert!(err.to_string().starts_with("device unavailable"));
    }
}
