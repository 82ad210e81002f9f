use std::sync::Arc;

use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header;
use actix_web::{FromRequest, HttpMessage, HttpRequest};
use futures::future::{ready, LocalBoxFuture, Ready};
use tracing::debug;

use crate::auth::token::TokenCodec;
use crate::error::AppError;

/// Identity established by the gate for the rest of the request.
#[derive(Debug, Clone)]
pub struct Identity {
    pub username: String,
}

/// Per-request bearer-token gate.
///
/// A missing token leaves the request anonymous; downstream extractors
/// decide whether that is allowed. An invalid token also continues
/// anonymously unless strict mode is configured, in which case the request
/// is rejected at the gate.
pub struct AuthenticationGate {
    codec: Arc<TokenCodec>,
    strict: bool,
}

impl AuthenticationGate {
    pub fn new(codec: Arc<TokenCodec>, strict: bool) -> Self {
        Self { codec, strict }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthenticationGate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = actix_web::Error;
    type Transform = AuthenticationGateMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthenticationGateMiddleware {
            service,
            codec: self.codec.clone(),
            strict: self.strict,
        }))
    }
}

pub struct AuthenticationGateMiddleware<S> {
    service: S,
    codec: Arc<TokenCodec>,
    strict: bool,
}

fn bearer_token(req: &ServiceRequest) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

impl<S, B> Service<ServiceRequest> for AuthenticationGateMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if let Some(token) = bearer_token(&req) {
            match self.codec.verify(token) {
                Ok(subject) => {
                    req.extensions_mut().insert(Identity { username: subject });
                }
                Err(err) if self.strict => {
                    return Box::pin(ready(Err(AppError::Token(err).into())));
                }
                Err(err) => {
                    debug!(error = %err, "ignoring invalid bearer token");
                }
            }
        }

        let fut = self.service.call(req);
        Box::pin(fut)
    }
}

/// Extractor for handlers that require an authenticated caller; absence of a
/// gate-established identity is a 401.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub username: String,
}

impl FromRequest for AuthenticatedUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        let identity = req.extensions().get::<Identity>().cloned();
        ready(match identity {
            Some(identity) => Ok(AuthenticatedUser {
                username: identity.username,
            }),
            None => Err(AppError::Unauthorized("No authorization token provided".into()).into()),
        })
    }
}
