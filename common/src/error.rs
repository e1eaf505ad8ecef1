use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unknown node")]
    UnknownNode,
    #[error("no nodes available")]
    NoNodesAvailable,
    #[error("failed to acquire {0} lock")]
    LockPoisoned(&'static str),
    #[error(transparent)]
    Any(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status_code = match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::UnknownNode => StatusCode::NOT_FOUND,
            ApiError::NoNodesAvailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::LockPoisoned(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Any(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status_code, self.to_string()).into_response()
    }
}
