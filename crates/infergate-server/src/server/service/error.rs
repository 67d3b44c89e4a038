use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use infergate_core::Error;

/// A core error on its way out as an HTTP response.
///
/// | error                   | status | body              |
/// |-------------------------|--------|-------------------|
/// | `QueueFull`             | 503    | `queue_full`      |
/// | `ServiceShutdown`       | 503    | the error's text  |
/// | anything else           | 504    | the error's text  |
///
/// A backend failure is only reported once its retries are exhausted, so it
/// shares the gateway-timeout status with deadline and cancellation errors.
#[derive(Debug)]
pub struct HttpError(pub Error);

impl From<Error> for HttpError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl HttpError {
    pub const fn status(&self) -> StatusCode {
        match self.0 {
            Error::QueueFull | Error::ServiceShutdown => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        (self.status(), self.0.to_string()).into_response()
    }
}
