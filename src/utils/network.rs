//! Azure error classification
//!
//! Maps SDK errors onto the stowage error taxonomy. HTTP failures are
//! classified by their status code; the message markers below only apply to
//! errors that carry no response.

use crate::error::StowageError;
use azure_core::error::ErrorKind;
use azure_core::StatusCode;

/// Service error codes that mean the addressed resource is absent
const NOT_FOUND_INDICATORS: &[&str] = &[
    "blobnotfound",
    "containernotfound",
    "resourcenotfound",
    "the specified blob does not exist",
    "the specified container does not exist",
];

/// Service error codes for credential and authorization failures
const AUTH_INDICATORS: &[&str] = &[
    "authenticationfailed",
    "invalidauthenticationinfo",
];

const PERMISSION_INDICATORS: &[&str] = &[
    "authorizationfailure",
    "authorizationpermissionmismatch",
    "insufficientaccountpermissions",
];

const CONFLICT_INDICATORS: &[&str] = &[
    "leasealreadypresent",
    "leaseidmismatch",
    "leaseidmissing",
    "leaseisbrokenandcannotberenewed",
    "conditionnotmet",
    "blobalreadyexists",
];

const NETWORK_INDICATORS: &[&str] = &[
    "timed out",
    "timeout",
    "connection refused",
    "connection reset",
    "dns error",
    "error sending request",
];

/// Map an Azure SDK error onto the stowage error taxonomy
pub fn classify_azure_error(error: &azure_core::Error, context: &str) -> StowageError {
    match error.kind() {
        ErrorKind::Io => StowageError::network(format!("{context}: {error}")),
        ErrorKind::HttpResponse { status, error_code } => {
            classify_status(*status, error_code.as_deref(), &format!("{context}: {error}"))
        }
        _ => classify_error_message(&error.to_string(), context),
    }
}

/// Classify a service response by its status, using the error code to split 403s
pub fn classify_status(status: StatusCode, error_code: Option<&str>, message: &str) -> StowageError {
    match status {
        StatusCode::NotFound => StowageError::not_found(message),
        StatusCode::Unauthorized => StowageError::authentication(message),
        StatusCode::Forbidden => match error_code {
            // Bad keys and signature mismatches come back as 403
            Some(code) if code.eq_ignore_ascii_case("AuthenticationFailed") => {
                StowageError::authentication(message)
            }
            _ => StowageError::permission_denied(message),
        },
        // Lease and precondition failures
        StatusCode::Conflict | StatusCode::PreconditionFailed => StowageError::conflict(message),
        StatusCode::RequestTimeout
        | StatusCode::TooManyRequests
        | StatusCode::BadGateway
        | StatusCode::ServiceUnavailable
        | StatusCode::GatewayTimeout => StowageError::network(message),
        _ => StowageError::azure_api(message),
    }
}

/// Classify an error without a response by the error codes and phrases it carries
pub fn classify_error_message(message: &str, context: &str) -> StowageError {
    let lowered = message.to_lowercase();
    let contains_any = |indicators: &[&str]| indicators.iter().any(|i| lowered.contains(i));

    if contains_any(NOT_FOUND_INDICATORS) {
        StowageError::not_found(format!("{context}: {message}"))
    } else if contains_any(AUTH_INDICATORS) {
        StowageError::authentication(format!("{context}: {message}"))
    } else if contains_any(PERMISSION_INDICATORS) {
        StowageError::permission_denied(format!("{context}: {message}"))
    } else if contains_any(CONFLICT_INDICATORS) {
        StowageError::conflict(format!("{context}: {message}"))
    } else if contains_any(NETWORK_INDICATORS) {
        StowageError::network(format!("{context}: {message}"))
    } else {
        StowageError::azure_api(format!("{context}: {message}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_not_found() {
        let err = classify_error_message(
            "BlobNotFound: The specified blob does not exist.",
            "Failed to download blob",
        );
        assert!(err.is_not_found());

        let err = classify_error_message("ContainerNotFound", "Failed to upload blob");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_classify_conflict() {
        let err = classify_error_message(
            "LeaseAlreadyPresent: x-ms-request-id 5e1f404a",
            "Failed to acquire lease",
        );
        assert!(err.is_conflict());

        let err = classify_error_message("LeaseIdMissing", "Failed to write");
        assert!(err.is_conflict());
    }

    #[test]
    fn test_classify_auth_and_permission() {
        let err = classify_error_message("AuthorizationFailure", "x");
        assert!(matches!(err, StowageError::PermissionDenied(_)));

        let err = classify_error_message("AuthenticationFailed: signature mismatch", "x");
        assert!(matches!(err, StowageError::AuthenticationError(_)));
    }

    #[test]
    fn test_classify_network_and_fallback() {
        let err = classify_error_message("operation timed out", "x");
        assert!(matches!(err, StowageError::NetworkError(_)));

        let err = classify_error_message("something unexpected", "x");
        assert!(matches!(err, StowageError::AzureApiError(_)));
    }

    fn http_error(status: StatusCode, code: &str, detail: &str) -> azure_core::Error {
        azure_core::Error::message(
            ErrorKind::HttpResponse {
                status,
                error_code: Some(code.to_string()),
            },
            detail.to_string(),
        )
    }

    #[test]
    fn test_status_wins_over_message_content() {
        let err = http_error(
            StatusCode::Conflict,
            "LeaseAlreadyPresent",
            "There is already a lease present. x-ms-request-id:5e1f404a-0001-503d-dns0-000000000000",
        );
        let classified = classify_azure_error(&err, "Failed to acquire lease");
        assert!(classified.is_conflict());
        assert!(!classified.is_not_found());

        let err = http_error(StatusCode::NotFound, "BlobNotFound", "request 409-503");
        assert!(classify_azure_error(&err, "x").is_not_found());
    }

    #[test]
    fn test_status_classification() {
        let cases = [
            (StatusCode::PreconditionFailed, "ConditionNotMet"),
            (StatusCode::Conflict, "BlobAlreadyExists"),
        ];
        for (status, code) in cases {
            assert!(classify_azure_error(&http_error(status, code, ""), "x").is_conflict());
        }

        let err = classify_azure_error(
            &http_error(StatusCode::Forbidden, "AuthenticationFailed", ""),
            "x",
        );
        assert!(matches!(err, StowageError::AuthenticationError(_)));

        let err = classify_azure_error(
            &http_error(StatusCode::Forbidden, "AuthorizationPermissionMismatch", ""),
            "x",
        );
        assert!(matches!(err, StowageError::PermissionDenied(_)));

        let err = classify_azure_error(
            &http_error(StatusCode::ServiceUnavailable, "ServerBusy", ""),
            "x",
        );
        assert!(matches!(err, StowageError::NetworkError(_)));

        let err = classify_azure_error(&http_error(StatusCode::BadRequest, "InvalidXmlDocument", ""), "x");
        assert!(matches!(err, StowageError::AzureApiError(_)));
    }

    #[test]
    fn test_io_errors_are_network() {
        let err = azure_core::Error::message(ErrorKind::Io, "connection reset by peer");
        assert!(matches!(
            classify_azure_error(&err, "x"),
            StowageError::NetworkError(_)
        ));
    }

    #[test]
    fn test_context_is_preserved() {
        let err = classify_error_message("BlobNotFound", "Failed to fetch properties for 'a/b'");
        assert!(err.to_string().contains("Failed to fetch properties for 'a/b'"));
    }
}
