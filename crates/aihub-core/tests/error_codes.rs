//! Client-facing error surface.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use aihub_core::{ErrorBody, ErrorCode, GatewayError};

#[test]
fn not_found_body_shape() {
    let err = GatewayError::NotFound("/unknown/v1/ping".into());
    let body = ErrorBody::new(&err, "wlrs-water-form-assistant");
    let v: serde_json::Value = serde_json::from_str(&body.to_json()).unwrap();

    assert_eq!(v["error"], "not_found");
    assert_eq!(v["tenant"], "wlrs-water-form-assistant");
    assert!(v["message"].as_str().unwrap().contains("/unknown/v1/ping"));
    assert_eq!(v.as_object().unwrap().len(), 3);
    assert_eq!(err.code().http_status(), 404);
}

#[test]
fn provider_text_never_leaks() {
    let err = GatewayError::CredentialUnavailable("IMDS said: secret-ish detail".into());
    let body = ErrorBody::new(&err, "t1");
    assert_eq!(body.error, "credential_unavailable");
    assert!(!body.message.contains("IMDS"));

    let err = GatewayError::BackendUnavailable("tcp connect error 10.0.0.4:443".into());
    assert!(!err.public_message().contains("10.0.0.4"));

    let err = GatewayError::Internal("mutex poisoned".into());
    assert_eq!(err.public_message(), "internal error");
}

#[test]
fn status_and_retryability() {
    let cases = [
        (ErrorCode::UnknownTenant, 404, false),
        (ErrorCode::TenantDisabled, 403, false),
        (ErrorCode::NotFound, 404, false),
        (ErrorCode::BackendDisabled, 403, false),
        (ErrorCode::CredentialUnavailable, 502, false),
        (ErrorCode::Throttled, 429, true),
        (ErrorCode::BackendTimeout, 504, true),
        (ErrorCode::BackendUnavailable, 502, false),
        (ErrorCode::ClientClosed, 499, false),
        (ErrorCode::PayloadTooLarge, 413, false),
    ];
    for (code, status, retry) in cases {
        assert_eq!(code.http_status(), status, "code={}", code.as_str());
        assert_eq!(code.is_retryable(), retry, "code={}", code.as_str());
    }
}

#[test]
fn throttled_message_carries_delay() {
    let err = GatewayError::Throttled { remaining: 0, retry_after_secs: 7 };
    assert_eq!(err.code(), ErrorCode::Throttled);
    assert!(err.public_message().contains("7s"));
}
