//! Conversions from Scaleway SDK and HTTP failures into driver errors.

use scaleway_rs::{ScalewayApiError, ScalewayError};

use crate::config::ConfigError;
use crate::driver::DriverError;

/// Maps a Scaleway error type onto the HTTP status the API pairs it with.
pub(super) fn status_for_error_type(etype: &str) -> u16 {
    match etype {
        "invalid_arguments" | "invalid_request_error" => 400,
        "denied_authentication" | "authentication_error" => 401,
        "permission_denied" | "quotas_exceeded" => 403,
        "not_found" | "unknown_resource" => 404,
        "conflict" | "resource_still_in_use" | "already_exists" => 409,
        "precondition_failed" | "transient_state" => 412,
        _ => 500,
    }
}

pub(super) fn describe_api_error(api_err: &ScalewayApiError) -> String {
    match api_err.resource_id.as_deref() {
        Some(id) => format!("{} ({}: {id})", api_err.message, api_err.etype),
        None => format!("{} ({})", api_err.message, api_err.etype),
    }
}

/// Builds a driver error from a non-success HTTP response body.
pub(super) fn from_response(status: u16, body: &[u8]) -> DriverError {
    let message = serde_json::from_slice::<ScalewayApiError>(body).map_or_else(
        |_| String::from_utf8_lossy(body).into_owned(),
        |api_err| describe_api_error(&api_err),
    );
    DriverError::Api { status, message }
}

pub(super) fn transport(err: &reqwest::Error) -> DriverError {
    DriverError::Transport {
        message: err.to_string(),
    }
}

impl From<ScalewayError> for DriverError {
    fn from(value: ScalewayError) -> Self {
        match value {
            ScalewayError::Api(api_err) => Self::Api {
                status: status_for_error_type(&api_err.etype),
                message: describe_api_error(&api_err),
            },
            other => Self::Transport {
                message: other.to_string(),
            },
        }
    }
}

impl From<ConfigError> for DriverError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}
