//! Unified error types for the geogate core library.
//!
//! [`GeogateError`] covers every failure mode of the geofence subsystem.
//! Modules keep their own narrower error types ([`ConfigError`],
//! [`DoorClientError`], [`SettingsError`]) and convert into this one.
//!
//! The variants follow the five error families the engine distinguishes:
//!
//! - **Identity**: no device identifier has been stored yet
//! - **Authorization**: the server refused auto-unlock for this device
//! - **Permission**: the platform refused location access
//! - **Transient**: any HTTP exchange with the door server failed
//! - **Location**: a location fix could not be obtained
//!
//! Polling and background paths catch these at their own boundary and
//! record them; one-shot calls (toggle, manual validation) return them.
//!
//! [`ConfigError`]: crate::config::ConfigError
//! [`DoorClientError`]: crate::door::DoorClientError
//! [`SettingsError`]: crate::settings::SettingsError

use std::path::PathBuf;
use thiserror::Error;

/// The unified error type for all geogate operations.
#[derive(Debug, Error)]
pub enum GeogateError {
    // =========================================================================
    // IDENTITY ERRORS
    // =========================================================================
    /// No device identifier is stored for this installation.
    #[error("Device not identified. Register the device before enabling auto-unlock.")]
    DeviceNotIdentified,

    // =========================================================================
    // AUTHORIZATION ERRORS
    // =========================================================================
    /// The server does not allow this device to auto-unlock.
    #[error("Device not authorized: {0}")]
    NotAuthorized(String),

    // =========================================================================
    // PERMISSION ERRORS
    // =========================================================================
    /// Foreground location permission was denied.
    #[error("Location permission denied. Allow location access to use auto-unlock.")]
    LocationPermissionDenied,

    // =========================================================================
    // TRANSIENT NETWORK ERRORS
    // =========================================================================
    /// The HTTP request could not be completed.
    #[error("Request to {endpoint} failed: {message}")]
    RequestFailed {
        /// Server path that was called.
        endpoint: String,
        /// Transport-level failure description.
        message: String,
    },

    /// The server answered with a non-success status.
    #[error("Server returned {status} for {endpoint}")]
    UnexpectedStatus {
        /// Server path that was called.
        endpoint: String,
        /// HTTP status code.
        status: u16,
    },

    /// The server answered with a body that could not be decoded.
    #[error("Invalid response from {endpoint}: {message}")]
    InvalidResponse {
        /// Server path that was called.
        endpoint: String,
        /// Decoding failure description.
        message: String,
    },

    // =========================================================================
    // LOCATION ERRORS
    // =========================================================================
    /// A location fix could not be obtained.
    #[error("Location unavailable: {0}")]
    LocationUnavailable(String),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// An error occurred while persisting or reading settings.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for geogate operations.
pub type Result<T> = std::result::Result<T, GeogateError>;

/// Short alias for [`GeogateError`].
pub type Error = GeogateError;

impl GeogateError {
    /// Returns `true` if no device identifier is available.
    #[inline]
    #[must_use]
    pub const fn is_identity_error(&self) -> bool {
        matches!(self, Self::DeviceNotIdentified)
    }

    /// Returns `true` if the server refused this device.
    #[inline]
    #[must_use]
    pub const fn is_authorization_error(&self) -> bool {
        matches!(self, Self::NotAuthorized(_))
    }

    /// Returns `true` if the platform refused location access.
    #[inline]
    #[must_use]
    pub const fn is_permission_error(&self) -> bool {
        matches!(self, Self::LocationPermissionDenied)
    }

    /// Returns `true` for network failures worth retrying on the next tick.
    #[inline]
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RequestFailed { .. } | Self::UnexpectedStatus { .. } | Self::InvalidResponse { .. }
        )
    }

    /// Returns `true` if a location fix could not be obtained.
    #[inline]
    #[must_use]
    pub const fn is_location_error(&self) -> bool {
        matches!(self, Self::LocationUnavailable(_))
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is related to I/O or persistence.
    #[inline]
    #[must_use]
    pub const fn is_io_error(&self) -> bool {
        matches!(self, Self::PersistenceError(_) | Self::IoError(_))
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 403 Forbidden - understood but refused
            Self::NotAuthorized(_) | Self::LocationPermissionDenied => 403,

            // 409 Conflict - state precondition not met
            Self::DeviceNotIdentified => 409,

            // 422 Unprocessable Entity - semantic errors
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) => 422,

            // 404 Not Found
            Self::ConfigNotFound(_) => 404,

            // 500 Internal Server Error
            Self::PersistenceError(_) | Self::IoError(_) => 500,

            // 502 Bad Gateway - the door server misbehaved
            Self::RequestFailed { .. }
            | Self::UnexpectedStatus { .. }
            | Self::InvalidResponse { .. } => 502,

            // 503 Service Unavailable - no location fix
            Self::LocationUnavailable(_) => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::DeviceNotIdentified => "DEVICE_NOT_IDENTIFIED",
            Self::NotAuthorized(_) => "NOT_AUTHORIZED",
            Self::LocationPermissionDenied => "LOCATION_PERMISSION_DENIED",
            Self::RequestFailed { .. } => "REQUEST_FAILED",
            Self::UnexpectedStatus { .. } => "UNEXPECTED_STATUS",
            Self::InvalidResponse { .. } => "INVALID_RESPONSE",
            Self::LocationUnavailable(_) => "LOCATION_UNAVAILABLE",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for GeogateError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::LoadError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {}: {}", path.display(), source))
            }
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::door::DoorClientError> for GeogateError {
    fn from(err: crate::door::DoorClientError) -> Self {
        use crate::door::DoorClientError;
        match err {
            DoorClientError::InvalidUrl { endpoint, source } => Self::RequestFailed {
                endpoint,
                message: source.to_string(),
            },
            DoorClientError::Transport { endpoint, source } => Self::RequestFailed {
                endpoint,
                message: source.to_string(),
            },
            DoorClientError::Status { endpoint, status } => {
                Self::UnexpectedStatus { endpoint, status }
            }
            DoorClientError::Decode { endpoint, source } => Self::InvalidResponse {
                endpoint,
                message: source.to_string(),
            },
        }
    }
}

impl From<crate::settings::SettingsError> for GeogateError {
    fn from(err: crate::settings::SettingsError) -> Self {
        use crate::settings::SettingsError;
        match err {
            SettingsError::Io { path, source } => {
                Self::PersistenceError(format!("{}: {}", path.display(), source))
            }
            SettingsError::Corrupt { path, source } => Self::PersistenceError(format!(
                "Corrupt settings file {}: {}",
                path.display(),
                source
            )),
            SettingsError::InvalidValue { key, value } => {
                Self::PersistenceError(format!("Invalid value for '{key}': '{value}'"))
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoErr, ErrorKind};

    fn request_failed() -> GeogateError {
        GeogateError::RequestFailed {
            endpoint: "/esp32/door/check-if-validation-needed".into(),
            message: "connection refused".into(),
        }
    }

    #[test]
    fn test_error_families() {
        assert!(GeogateError::DeviceNotIdentified.is_identity_error());
        assert!(GeogateError::NotAuthorized("revoked".into()).is_authorization_error());
        assert!(GeogateError::LocationPermissionDenied.is_permission_error());
        assert!(request_failed().is_transient());
        assert!(GeogateError::UnexpectedStatus {
            endpoint: "/x".into(),
            status: 500
        }
        .is_transient());
        assert!(GeogateError::LocationUnavailable("no fix".into()).is_location_error());

        assert!(!GeogateError::DeviceNotIdentified.is_transient());
        assert!(!GeogateError::LocationPermissionDenied.is_location_error());
    }

    #[test]
    fn test_config_error_classification() {
        assert!(GeogateError::ConfigNotFound(PathBuf::from("/test")).is_config_error());
        assert!(GeogateError::ConfigParseError("syntax error".into()).is_config_error());
        assert!(GeogateError::ConfigValidationError("bad url".into()).is_config_error());
        assert!(!GeogateError::DeviceNotIdentified.is_config_error());
    }

    #[test]
    fn test_io_error_classification() {
        assert!(GeogateError::PersistenceError("disk full".into()).is_io_error());
        assert!(GeogateError::IoError(IoErr::new(ErrorKind::NotFound, "test")).is_io_error());
        assert!(!request_failed().is_io_error());
    }

    #[test]
    fn test_http_status_codes() {
        assert_eq!(GeogateError::NotAuthorized(String::new()).http_status_code(), 403);
        assert_eq!(GeogateError::LocationPermissionDenied.http_status_code(), 403);
        assert_eq!(GeogateError::DeviceNotIdentified.http_status_code(), 409);
        assert_eq!(request_failed().http_status_code(), 502);
        assert_eq!(
            GeogateError::LocationUnavailable("timeout".into()).http_status_code(),
            503
        );
        assert_eq!(
            GeogateError::PersistenceError("error".into()).http_status_code(),
            500
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            GeogateError::DeviceNotIdentified.error_code(),
            "DEVICE_NOT_IDENTIFIED"
        );
        assert_eq!(request_failed().error_code(), "REQUEST_FAILED");
        assert_eq!(
            GeogateError::ConfigNotFound(PathBuf::new()).error_code(),
            "CONFIG_NOT_FOUND"
        );
    }

    #[test]
    fn test_from_settings_error() {
        let err: GeogateError = crate::settings::SettingsError::InvalidValue {
            key: "last_geo_unlock_time".into(),
            value: "soon".into(),
        }
        .into();
        assert!(err.is_io_error());
        assert!(err.to_string().contains("last_geo_unlock_time"));
    }

    #[test]
    fn test_error_display_messages() {
        let err = GeogateError::NotAuthorized("Device blocked by admin".into());
        assert!(err.to_string().contains("Device blocked by admin"));

        let err = request_failed();
        assert!(err.to_string().contains("check-if-validation-needed"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<GeogateError>();
        assert_sync::<GeogateError>();
    }
}
