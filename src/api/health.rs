use actix_web::{get, web, HttpResponse};

use crate::error::Error;
use crate::service::MessageService;

/// Liveness probe. Unauthenticated by design so orchestrators can reach it.
#[get("/healthcheck")]
pub async fn healthcheck(service: web::Data<MessageService>) -> Result<HttpResponse, Error> {
    if !service.is_healthy().await {
        return Err(Error::Unhealthy);
    }

    Ok(HttpResponse::NoContent().finish())
}
