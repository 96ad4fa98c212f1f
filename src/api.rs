use actix_web::dev::HttpServiceFactory;
use actix_web::web;

use crate::auth::BearerAuth;

pub mod admin;
pub mod health;
pub mod messages;
pub mod metrics;

/// The full `/api/v1` surface behind the shared-secret middleware: the
/// producer/consumer lifecycle plus the DLQ admin operations.
pub fn v1(auth: BearerAuth) -> impl HttpServiceFactory {
    web::scope("/api/v1")
        .wrap(auth)
        .service(messages::produce)
        .service(messages::consume)
        .service(messages::ack)
        .service(messages::nack)
        .service(admin::queues_overview)
        .service(admin::queue_stats)
        .service(admin::browse)
        .service(admin::requeue_all)
        .service(admin::requeue_one)
        .service(admin::delete_all)
        .service(admin::delete_one)
        .service(admin::message_details)
}
