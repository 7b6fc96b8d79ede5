use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use futures::future::{ready, Ready};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use uuid::Uuid;

use crate::error::AppError;

/// Header set by the authenticating gateway
pub const VIEWER_ID_HEADER: &str = "x-user-id";

/// Authenticated viewer, placed in request extensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewerId(pub Uuid);

/// Gateway Identity Middleware
///
/// Tokens are verified upstream; this only trusts and parses the forwarded
/// viewer id.
pub struct GatewayIdentityMiddleware;

impl<S, B> Transform<S, ServiceRequest> for GatewayIdentityMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = GatewayIdentityMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(GatewayIdentityMiddlewareService {
            service: Rc::new(service),
        }))
    }
}

pub struct GatewayIdentityMiddlewareService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for GatewayIdentityMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();

        Box::pin(async move {
            let raw = req
                .headers()
                .get(VIEWER_ID_HEADER)
                .and_then(|h| h.to_str().ok())
                .ok_or_else(|| AppError::Authentication("Missing viewer identity".to_string()))?;

            let viewer_id = Uuid::parse_str(raw.trim()).map_err(|e| {
                tracing::warn!("Malformed viewer id from gateway: {}", e);
                AppError::Authentication("Malformed viewer identity".to_string())
            })?;

            req.extensions_mut().insert(ViewerId(viewer_id));

            service.call(req).await
        })
    }
}

impl actix_web::FromRequest for ViewerId {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(
        req: &actix_web::HttpRequest,
        _payload: &mut actix_web::dev::Payload,
    ) -> Self::Future {
        match req.extensions().get::<ViewerId>() {
            Some(viewer_id) => ready(Ok(*viewer_id)),
            None => ready(Err(AppError::Authentication(
                "Viewer not authenticated".to_string(),
            )
            .into())),
        }
    }
}
