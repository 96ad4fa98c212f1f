use actix_web::{get, post, web, HttpResponse};

use crate::error::Error;
use crate::service::{MessageService, NewMessageRequest};

#[post("/queues/{queue}/messages")]
pub async fn produce(
    path: web::Path<String>,
    body: web::Json<NewMessageRequest>,
    service: web::Data<MessageService>,
) -> Result<HttpResponse, Error> {
    service.produce(&path, body.into_inner()).await?;

    Ok(HttpResponse::NoContent().finish())
}

/// Long-polls for one message. 200 with `{id, content}` on a claim, 204 when
/// the polling window closes empty.
#[get("/queues/{queue}/messages")]
pub async fn consume(
    path: web::Path<String>,
    service: web::Data<MessageService>,
) -> Result<HttpResponse, Error> {
    match service.fetch(&path).await? {
        Some(message) => Ok(HttpResponse::Ok().json(message)),
        None => Ok(HttpResponse::NoContent().finish()),
    }
}

#[post("/queues/{queue}/messages/{id}/ack")]
pub async fn ack(
    path: web::Path<(String, String)>,
    service: web::Data<MessageService>,
) -> Result<HttpResponse, Error> {
    let (queue, id) = &*path;

    service.ack(id, queue).await?;

    Ok(HttpResponse::NoContent().finish())
}

#[post("/queues/{queue}/messages/{id}/nack")]
pub async fn nack(
    path: web::Path<(String, String)>,
    service: web::Data<MessageService>,
) -> Result<HttpResponse, Error> {
    let (queue, id) = &*path;

    service.nack(id, queue).await?;

    Ok(HttpResponse::NoContent().finish())
}
