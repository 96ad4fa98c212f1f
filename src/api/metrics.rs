use actix_web::dev::HttpServiceFactory;
use actix_web::{web, HttpResponse};

use crate::auth::BearerAuth;
use crate::metrics::PrometheusMetrics;

/// Prometheus exposition endpoint, registered only when metrics are enabled
/// and guarded by its own secret.
pub fn service(auth: BearerAuth) -> impl HttpServiceFactory {
    web::resource("/metrics")
        .wrap(auth)
        .route(web::get().to(render))
}

async fn render(prometheus: web::Data<PrometheusMetrics>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4; charset=utf-8")
        .body(prometheus.render())
}
