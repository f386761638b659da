//! gRPC Authentication Gate
//!
//! Runs before every call and reads the `authorization` metadata entry:
//! - absent: the call proceeds without credentials (signup needs none)
//! - `Bearer <token>`: the token is fully validated, including revocation,
//!   and the resulting identity is attached
//! - `Basic <base64(identifier:secret)>`: the pair is decoded and attached
//!   unverified; the login handler checks it against the stored hash
//! - anything else is rejected
//!
//! Handlers read what the gate attached through [`require_credentials`] and
//! [`require_basic`].
//!
//! ## Usage
//!
//! ```ignore
//! use tonic::transport::Server;
//! use taskd_api::grpc_interceptor::AuthGate;
//!
//! let gate = AuthGate::new(codec, metrics);
//!
//! Server::builder()
//!     .add_service(AuthServiceServer::with_interceptor(service, gate))
//!     .serve(addr)
//!     .await?;
//! ```

use std::{sync::Arc, time::Instant};

use base64::{Engine, engine::general_purpose::STANDARD};
use taskd_auth::{AuthError, AuthErrorKind, AuthMetrics, TokenCodec};
use taskd_observe::logging::{auth_span, record_auth_result};
use taskd_types::{BasicCredentials, Credentials, TokenType, VerifiedIdentity};
use tonic::{
    Request, Status,
    metadata::{MetadataMap, MetadataValue},
};
use tracing::Instrument;

/// Metadata key carrying credentials. gRPC normalizes keys to lowercase.
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Metadata key carrying the per-call request id back to the caller
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request id assigned by the gate, stored in request extensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Parsed `authorization` value
#[derive(Clone, PartialEq, Eq)]
pub enum Scheme {
    /// `Bearer <token>`
    Bearer(String),
    /// `Basic <payload>`, payload still encoded
    Basic(String),
    /// Any other scheme name
    Unsupported(String),
}

impl std::fmt::Debug for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scheme::Bearer(_) => f.write_str("Bearer(..)"),
            Scheme::Basic(_) => f.write_str("Basic(..)"),
            Scheme::Unsupported(name) => f.debug_tuple("Unsupported").field(name).finish(),
        }
    }
}

impl Scheme {
    /// Split `"<scheme> <credential>"`; the scheme name is case-insensitive
    ///
    /// # Errors
    ///
    /// `MalformedCredentials` if the scheme or, for a known scheme, the
    /// credential is empty.
    pub fn parse(header: &str) -> Result<Self, AuthError> {
        let header = header.trim();
        let (name, credential) = match header.split_once(' ') {
            Some((name, credential)) => (name, credential.trim()),
            None => (header, ""),
        };

        if name.is_empty() {
            return Err(AuthError::MalformedCredentials("empty authorization value".into()));
        }

        let scheme = match name.to_ascii_lowercase().as_str() {
            "bearer" => Scheme::Bearer(credential.to_string()),
            "basic" => Scheme::Basic(credential.to_string()),
            _ => return Ok(Scheme::Unsupported(name.to_string())),
        };

        if credential.is_empty() {
            return Err(AuthError::MalformedCredentials(format!("{} credential is empty", name)));
        }

        Ok(scheme)
    }

    /// Lowercase scheme label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            Scheme::Bearer(_) => "bearer",
            Scheme::Basic(_) => "basic",
            Scheme::Unsupported(_) => "unsupported",
        }
    }
}

/// Decode a basic payload into an identifier and secret
///
/// The payload is standard base64 of `identifier:secret`, split on the first
/// `:` so secrets may contain colons. Only the identifier is trimmed; the
/// secret is passed on byte for byte.
///
/// # Errors
///
/// `MalformedCredentials` for bad base64, non-UTF-8 text, a missing `:` or
/// an empty identifier.
pub fn decode_basic(payload: &str) -> Result<BasicCredentials, AuthError> {
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| AuthError::MalformedCredentials(format!("basic payload is not base64: {}", e)))?;

    let text = String::from_utf8(bytes)
        .map_err(|_| AuthError::MalformedCredentials("basic payload is not UTF-8".into()))?;

    let (identifier, secret) = text
        .split_once(':')
        .ok_or_else(|| AuthError::MalformedCredentials("basic payload has no ':'".into()))?;

    let identifier = identifier.trim();
    if identifier.is_empty() {
        return Err(AuthError::MalformedCredentials("basic identifier is empty".into()));
    }

    Ok(BasicCredentials { identifier: identifier.to_string(), secret: secret.to_string() })
}

/// Interceptor that authenticates every call
#[derive(Clone)]
pub struct AuthGate {
    codec: Arc<TokenCodec>,
    metrics: Option<Arc<AuthMetrics>>,
}

impl AuthGate {
    /// Create a gate validating bearer tokens with `codec`
    pub fn new(codec: Arc<TokenCodec>, metrics: Option<Arc<AuthMetrics>>) -> Self {
        Self { codec, metrics }
    }

    /// Work out which credentials, if any, a call carries
    async fn authenticate(&self, metadata: &MetadataMap) -> Result<Option<Credentials>, AuthError> {
        let Some(value) = metadata.get(AUTHORIZATION_HEADER) else {
            return Ok(None);
        };

        let header = value.to_str().map_err(|_| {
            AuthError::MalformedCredentials("authorization value is not ASCII".into())
        })?;

        let scheme = Scheme::parse(header)?;
        let label = scheme.label();
        let span = auth_span(label);
        let start = Instant::now();
        let _timer = self.metrics.as_ref().map(|m| m.start_validation_timer(label));

        let result = match scheme {
            Scheme::Bearer(token) => self
                .codec
                .validate(&token, None)
                .instrument(span.clone())
                .await
                .map(|claims| Credentials::Token(claims.to_identity())),
            Scheme::Basic(payload) => decode_basic(&payload).map(Credentials::Basic),
            Scheme::Unsupported(name) => Err(AuthError::UnsupportedScheme(name)),
        };

        let elapsed_ms = start.elapsed().as_millis();
        match &result {
            Ok(credentials) => {
                let subject = match credentials {
                    Credentials::Token(identity) => Some(identity.subject.to_string()),
                    Credentials::Basic(_) => None,
                };
                record_auth_result(&span, subject.as_deref(), "success", elapsed_ms);
                if let Some(m) = &self.metrics {
                    m.record_validation_success(label);
                }
                tracing::debug!(scheme = label, duration_ms = elapsed_ms, "Credentials accepted");
            },
            Err(e) => {
                record_auth_result(&span, None, e.label(), elapsed_ms);
                if let Some(m) = &self.metrics {
                    m.record_validation_failure(label, e.label());
                }
                tracing::warn!(
                    scheme = label,
                    error = %e,
                    error_type = e.label(),
                    duration_ms = elapsed_ms,
                    "Credentials rejected"
                );
            },
        }

        result.map(Some)
    }
}

/// Synchronous interceptor implementation for AuthGate
///
/// Uses tokio::task::block_in_place to safely block within a tokio runtime
/// context, which requires the multi-threaded runtime.
impl tonic::service::Interceptor for AuthGate {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let request_id = taskd_observe::new_request_id();

        let auth_future = self.authenticate(request.metadata());
        let auth_result =
            tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(auth_future));

        match auth_result {
            Ok(credentials) => {
                if let Some(credentials) = credentials {
                    request.extensions_mut().insert(credentials);
                }
                request.extensions_mut().insert(RequestId(request_id));
                Ok(request)
            },
            Err(e) => Err(with_request_id(auth_error_to_status(&e), &request_id)),
        }
    }
}

/// Convert AuthError to gRPC Status
///
/// Only the coarse error class crosses the trust boundary; the detailed
/// error is logged here.
pub fn auth_error_to_status(error: &AuthError) -> Status {
    let kind = error.kind();
    let message = kind.public_message();

    match kind {
        AuthErrorKind::Unauthenticated => {
            tracing::debug!(error = %error, "Rejecting call as unauthenticated");
            Status::unauthenticated(message)
        },
        AuthErrorKind::InvalidArgument => {
            tracing::debug!(error = %error, "Rejecting call with invalid credentials");
            Status::invalid_argument(message)
        },
        AuthErrorKind::Internal => {
            tracing::error!(error = %error, "Authentication failed internally");
            Status::internal(message)
        },
    }
}

/// Attach the request id to an outgoing status
pub fn with_request_id(mut status: Status, request_id: &str) -> Status {
    if let Ok(value) = MetadataValue::try_from(request_id) {
        status.metadata_mut().insert(REQUEST_ID_HEADER, value);
    }
    status
}

/// Request id assigned by the gate, or a fresh one if the gate did not run
pub fn request_id<T>(request: &Request<T>) -> String {
    request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_else(taskd_observe::new_request_id)
}

/// Identity attached by the gate, checked against the token type a handler needs
///
/// # Errors
///
/// - `UNAUTHENTICATED` if no token was presented, or basic credentials were
/// - `INVALID_ARGUMENT` if the token is of the wrong type
#[allow(clippy::result_large_err)]
pub fn require_credentials<T>(
    request: &Request<T>,
    expected: TokenType,
) -> Result<VerifiedIdentity, Status> {
    let error = match request.extensions().get::<Credentials>() {
        Some(Credentials::Token(identity)) if identity.token_type == expected => {
            return Ok(identity.clone());
        },
        Some(Credentials::Token(identity)) => {
            AuthError::WrongTokenType { expected, actual: identity.token_type }
        },
        Some(Credentials::Basic(_)) => AuthError::UnsupportedScheme("basic".into()),
        None => AuthError::MissingCredentials,
    };

    Err(auth_error_to_status(&error))
}

/// Unverified basic credentials attached by the gate
///
/// # Errors
///
/// `UNAUTHENTICATED` if the call carried no basic credentials.
#[allow(clippy::result_large_err)]
pub fn require_basic<T>(request: &Request<T>) -> Result<BasicCredentials, Status> {
    match request.extensions().get::<Credentials>() {
        Some(Credentials::Basic(credentials)) => Ok(credentials.clone()),
        Some(Credentials::Token(_)) => {
            Err(auth_error_to_status(&AuthError::UnsupportedScheme("bearer".into())))
        },
        None => Err(auth_error_to_status(&AuthError::MissingCredentials)),
    }
}
