//! Shared-secret authentication for the API surface.
//!
//! Producers and consumers authenticate with `Authorization: Bearer <secret>`
//! or the `X-API-Key: <secret>` alternative. There are no user accounts; the
//! secret is configured at startup and compared verbatim.

use std::future::{Future, Ready};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header;
use secrecy::{ExposeSecret, SecretString};

use crate::error::Error;

pub const API_KEY_HEADER: &str = "X-API-Key";

#[derive(Clone)]
pub struct BearerAuth {
    secret: Arc<SecretString>,
}

impl BearerAuth {
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret: Arc::new(secret),
        }
    }
}

impl<S: 'static, B> Transform<S, ServiceRequest> for BearerAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = actix_web::Error;
    type InitError = ();
    type Transform = BearerAuthMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(BearerAuthMiddleware {
            service: Arc::new(service),
            secret: self.secret.clone(),
        }))
    }
}

pub struct BearerAuthMiddleware<S> {
    service: Arc<S>,
    secret: Arc<SecretString>,
}

impl<S, B> Service<ServiceRequest> for BearerAuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = actix_web::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let svc = Arc::clone(&self.service);
        let secret = Arc::clone(&self.secret);

        Box::pin(async move {
            if !is_authorized(&req, &secret) {
                tracing::warn!("rejected request with missing or invalid credentials");
                return Err(Error::Unauthorized.into());
            }

            svc.call(req).await
        })
    }
}

fn is_authorized(req: &ServiceRequest, secret: &SecretString) -> bool {
    let expected = secret.expose_secret().as_str();

    let bearer = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    if bearer == Some(expected) {
        return true;
    }

    let api_key = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    api_key == Some(expected)
}
