//! Operator-facing queue management: statistics, message inspection, and the
//! DLQ-only requeue/delete operations.

use actix_web::{delete, get, post, web, HttpResponse};
use serde::Deserialize;

use crate::error::Error;
use crate::message::is_dlq_name;
use crate::queue::QueueStats;
use crate::service::{MessageService, QueueService};

#[get("/queues")]
pub async fn queues_overview(service: web::Data<QueueService>) -> Result<HttpResponse, Error> {
    let overview = service.queues_overview().await?;

    Ok(HttpResponse::Ok().json(overview))
}

#[get("/queues/{queue}")]
pub async fn queue_stats(
    path: web::Path<String>,
    service: web::Data<QueueService>,
) -> Result<HttpResponse, Error> {
    let queue = path.into_inner();

    // a queue with no rows is indistinguishable from one that never existed
    let stats = service
        .queue_stats(&queue)
        .await?
        .unwrap_or_else(|| QueueStats {
            is_dlq: is_dlq_name(&queue),
            name: queue,
            message_count: 0,
        });

    Ok(HttpResponse::Ok().json(stats))
}

#[derive(Debug, Deserialize)]
struct BrowseParams {
    cursor: Option<String>,
    limit: Option<i64>,
}

#[get("/queues/{queue}/browse")]
pub async fn browse(
    path: web::Path<String>,
    params: web::Query<BrowseParams>,
    service: web::Data<MessageService>,
) -> Result<HttpResponse, Error> {
    let cursor = params.cursor.as_deref().filter(|c| !c.is_empty());

    let page = service.browse(&path, cursor, params.limit).await?;

    Ok(HttpResponse::Ok().json(page))
}

#[get("/queues/{queue}/messages/{id}")]
pub async fn message_details(
    path: web::Path<(String, String)>,
    service: web::Data<MessageService>,
) -> Result<HttpResponse, Error> {
    let (queue, id) = &*path;

    let details = service.details(id, queue).await?;

    Ok(HttpResponse::Ok().json(details))
}

#[post("/queues/{queue}/messages/requeue")]
pub async fn requeue_all(
    path: web::Path<String>,
    service: web::Data<MessageService>,
) -> Result<HttpResponse, Error> {
    service.requeue_all(&path).await?;

    Ok(HttpResponse::NoContent().finish())
}

#[post("/queues/{queue}/messages/{id}/requeue")]
pub async fn requeue_one(
    path: web::Path<(String, String)>,
    service: web::Data<MessageService>,
) -> Result<HttpResponse, Error> {
    let (queue, id) = &*path;

    service.requeue_one(id, queue).await?;

    Ok(HttpResponse::NoContent().finish())
}

#[delete("/queues/{queue}/messages")]
pub async fn delete_all(
    path: web::Path<String>,
    service: web::Data<MessageService>,
) -> Result<HttpResponse, Error> {
    service.delete_all(&path).await?;

    Ok(HttpResponse::NoContent().finish())
}

#[delete("/queues/{queue}/messages/{id}")]
pub async fn delete_one(
    path: web::Path<(String, String)>,
    service: web::Data<MessageService>,
) -> Result<HttpResponse, Error> {
    let (queue, id) = &*path;

    service.delete_one(id, queue).await?;

    Ok(HttpResponse::NoContent().finish())
}
