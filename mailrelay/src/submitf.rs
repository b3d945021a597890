//! HTTP contact form adapter.
//!
//! A browser posts `{"name", "email", "message"}` as JSON. The adapter checks
//! the `Origin` header against `server.allowed_origins`, validates the form,
//! and forwards it to the relay's internal socket as an [`EmailRequest`]
//! addressed to `smtp.from_addr`.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use mailrelay_common::{Config, EmailRequest, incoming, internal};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;

use crate::{
    error::{FormError, FormServerError},
    sendmail,
};

/// One contact form submission. Absent fields are empty and fail validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FormData {
    /// The visitor's name.
    pub name: String,
    /// Where the visitor wants a reply; not the sender of the mail.
    pub email: String,
    pub message: String,
}

impl FormData {
    /// # Errors
    ///
    /// The first field that is blank, or an email without `@`.
    pub fn validate(&self) -> Result<(), FormError> {
        if self.name.trim().is_empty() {
            return Err(FormError::MissingName);
        }
        if !self.email.contains('@') {
            return Err(FormError::InvalidEmail);
        }
        if self.message.trim().is_empty() {
            return Err(FormError::MissingMessage);
        }
        Ok(())
    }

    /// The relay request that delivers this submission to `recipient`.
    #[must_use]
    pub fn to_request(&self, recipient: &str) -> EmailRequest {
        let body = format!(
            "New contact form submission:\n\nName: {}\nEmail: {}\n\nMessage:\n{}",
            self.name, self.email, self.message
        );

        EmailRequest::new(
            recipient,
            format!("Contact Form Submission from {}", self.name),
            body,
        )
    }
}

/// Every path and method goes to the same handler, which answers CORS
/// preflights itself and accepts only POST.
#[must_use]
pub fn router(config: Arc<Config>) -> Router {
    let timeout = config.server.timeout();

    Router::new()
        .fallback(handle_submission)
        .with_state(config)
        .layer(TimeoutLayer::new(timeout))
}

/// The form adapter bound to `server.external_addr`.
pub struct FormServer {
    listener: TcpListener,
    router: Router,
}

impl FormServer {
    /// # Errors
    ///
    /// If `server.external_addr` cannot be bound.
    pub async fn bind(config: Arc<Config>) -> Result<Self, FormServerError> {
        let address = config.server.external_addr.clone();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| FormServerError::Bind { address, source })?;

        Ok(Self {
            listener,
            router: router(config),
        })
    }

    /// # Errors
    ///
    /// If the socket has no local address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until `shutdown` fires, then let requests in progress finish.
    ///
    /// # Errors
    ///
    /// If the server stops on an I/O error.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), FormServerError> {
        if let Ok(address) = self.listener.local_addr() {
            internal!(level = INFO, "Form adapter listening on {address}");
        }

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(FormServerError::Serve)?;

        internal!(level = INFO, "Form adapter stopped");
        Ok(())
    }
}

/// CORS headers for every response. Only an allowed origin is echoed back.
fn cors_headers(allowed_origin: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static("86400"),
    );

    if let Some(value) = allowed_origin.and_then(|origin| HeaderValue::from_str(origin).ok()) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }

    headers
}

async fn handle_submission(
    State(config): State<Arc<Config>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    incoming!(level = DEBUG, %method, "Handling submission request");

    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let allowed = config
        .server
        .allowed_origins
        .iter()
        .any(|candidate| candidate == origin);
    let cors = cors_headers(allowed.then_some(origin));

    if method == Method::OPTIONS {
        let status = if allowed {
            StatusCode::OK
        } else {
            StatusCode::FORBIDDEN
        };
        return (status, cors).into_response();
    }

    if !allowed {
        internal!(level = WARN, origin, "Rejected submission from unknown origin");
        return (StatusCode::FORBIDDEN, cors, "Forbidden").into_response();
    }

    if method != Method::POST {
        internal!(level = WARN, %method, "Rejected submission with wrong method");
        return (StatusCode::METHOD_NOT_ALLOWED, cors, "Method not allowed").into_response();
    }

    let form: FormData = match serde_json::from_slice(&body) {
        Ok(form) => form,
        Err(err) => {
            internal!(level = ERROR, "Failed to decode form submission: {err}");
            return (StatusCode::BAD_REQUEST, cors, "Invalid request body").into_response();
        }
    };

    incoming!(
        level = DEBUG,
        name = %form.name,
        email = %form.email,
        message_bytes = form.message.len(),
        "Received form submission"
    );

    if let Err(err) = form.validate() {
        internal!(level = WARN, "Form validation failed: {err}");
        return (StatusCode::BAD_REQUEST, cors, err.to_string()).into_response();
    }

    let request = form.to_request(&config.smtp.from_addr);
    if let Err(err) = sendmail::submit(&request, &config.server.internal_addr).await {
        internal!(level = ERROR, "Failed to forward submission to the relay: {err}");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            cors,
            "Failed to process submission",
        )
            .into_response();
    }

    internal!(
        level = INFO,
        name = %form.name,
        subject = %request.subject,
        "Form submission forwarded to the relay"
    );

    (
        StatusCode::OK,
        cors,
        Json(serde_json::json!({ "status": "success" })),
    )
        .into_response()
}
