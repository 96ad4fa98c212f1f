use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use serde::Serialize;
use snafu::Snafu;

/// Error body shape shared by every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("message content exceeds the configured size limit"))]
    ContentExceedsLimit,

    #[snafu(display("processAfter is in the past"))]
    ProcessAfterInPast,

    #[snafu(display("processAfter is too far in the future"))]
    ProcessAfterTooFar,

    #[snafu(display("request body is not valid"))]
    InvalidBody,

    #[snafu(display("operation is only supported for dead-letter queues"))]
    DlqOnlyOperation,

    #[snafu(display("Unauthorized"))]
    Unauthorized,

    #[snafu(display("message not found"))]
    MessageNotFound,

    #[snafu(display("service is unhealthy"))]
    Unhealthy,

    #[snafu(display("Error returned from database"))]
    Sqlx {
        #[snafu(source)]
        source: sqlx::Error,
    },

    #[snafu(display("Error running migrations"))]
    Migration {
        #[snafu(source)]
        source: sqlx::migrate::MigrateError,
    },

    #[snafu(display("Internal server error"))]
    Internal {
        #[snafu(source(false))]
        source: Option<eyre::Report>,
    },
}

impl From<sqlx::Error> for Error {
    fn from(source: sqlx::Error) -> Self {
        Self::Sqlx { source }
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(source: sqlx::migrate::MigrateError) -> Self {
        Self::Migration { source }
    }
}

impl From<eyre::Report> for Error {
    fn from(e: eyre::Report) -> Self {
        Self::Internal { source: Some(e) }
    }
}

impl Error {
    pub fn internal(e: impl Into<eyre::Report>) -> Self {
        Self::Internal {
            source: Some(e.into()),
        }
    }

    /// Stable machine-readable code, part of the wire contract.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ContentExceedsLimit => "bad_request.body.content.exceeds_limit",
            Self::ProcessAfterInPast => "bad_request.body.processAfter.in_past",
            Self::ProcessAfterTooFar => "bad_request.body.processAfter.too_far",
            Self::InvalidBody => "bad_request.body.invalid",
            Self::DlqOnlyOperation => "bad_request.dlq_only_operation",
            Self::Unauthorized => "unauthorized",
            Self::MessageNotFound => "not_found.message",
            Self::Unhealthy => "forq.unhealthy",
            Self::Sqlx { .. } | Self::Migration { .. } | Self::Internal { .. } => "internal",
        }
    }
}

impl actix_web::ResponseError for Error {
    // Business-logic failures report as 207 with a typed code in the body.
    // Unusual, but part of the upstream compatibility surface.
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,

            Self::ContentExceedsLimit
            | Self::ProcessAfterInPast
            | Self::ProcessAfterTooFar
            | Self::InvalidBody
            | Self::DlqOnlyOperation
            | Self::MessageNotFound
            | Self::Sqlx { .. }
            | Self::Migration { .. }
            | Self::Internal { .. } => StatusCode::MULTI_STATUS,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            code: self.code().to_owned(),
        })
    }
}
