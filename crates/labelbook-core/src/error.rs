use thiserror::Error;

/// Top-level error type for the Labelbook record store.
///
/// Storage code reports database failures as `Storage` strings so that the
/// core crate stays free of the SQLite dependency; everything else has a
/// dedicated variant so callers can tell "nothing matched" apart from a
/// broken disk.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LabelbookError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("Invalid field '{field}' (allowed: {allowed})")]
    InvalidField { field: String, allowed: String },

    #[error("Invalid {field} '{value}': expected {expected}")]
    InvalidValue {
        field: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("No {entity} record with id {id}")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Nothing to export: no records matched the filter")]
    NothingToExport,

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for LabelbookError {
    fn from(err: toml::de::Error) -> Self {
        LabelbookError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for LabelbookError {
    fn from(err: toml::ser::Error) -> Self {
        LabelbookError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for LabelbookError {
    fn from(err: serde_json::Error) -> Self {
        LabelbookError::Serialization(err.to_string())
    }
}

impl From<csv::Error> for LabelbookError {
    fn from(err: csv::Error) -> Self {
        // Keep plain I/O failures in the I/O bucket so they log the same way.
        if err.is_io_error() {
            match err.into_kind() {
                csv::ErrorKind::Io(io) => LabelbookError::Io(io),
                other => LabelbookError::Csv(format!("{:?}", other)),
            }
        } else {
            LabelbookError::Csv(err.to_string())
        }
    }
}

/// A specialized `Result` type for Labelbook operations.
pub type Result<T> = std::result::Result<T, LabelbookError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LabelbookError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: LabelbookError = io_err.into();
        assert!(matches!(err, LabelbookError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_invalid_field_display() {
        let err = LabelbookError::InvalidField {
            field: "password".into(),
            allowed: "sku, status".into(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid field 'password' (allowed: sku, status)"
        );
    }

    #[test]
    fn test_not_found_display() {
        let err = LabelbookError::NotFound {
            entity: "shipping log",
            id: 42,
        };
        assert_eq!(err.to_string(), "No shipping log record with id 42");
    }

    #[test]
    fn test_error_from_toml_de() {
        let bad_toml = "invalid = [[[";
        let err: std::result::Result<toml::Value, _> = toml::from_str(bad_toml);
        let err: LabelbookError = err.unwrap_err().into();
        assert!(matches!(err, LabelbookError::Config(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let err: LabelbookError = err.unwrap_err().into();
        assert!(matches!(err, LabelbookError::Serialization(_)));
    }

    #[test]
    fn test_csv_io_error_maps_to_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let csv_err = csv::Error::from(io_err);
        let err: LabelbookError = csv_err.into();
        assert!(matches!(err, LabelbookError::Io(_)));
    }

    #[test]
    fn test_result_type_with_question_mark() {
        fn inner() -> Result<String> {
            let io_result: std::result::Result<i32, std::io::Error> = Ok(42);
            let _value = io_result?;
            Ok("success".to_string())
        }

        assert_eq!(inner().unwrap(), "success");
    }
}
