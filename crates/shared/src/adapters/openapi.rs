use std::fmt::Debug;

use axum::{
    Json,
    response::{IntoResponse, Response},
};
use http::StatusCode;
use serde::Serialize;
use tracing::{error, warn};
use utoipa::IntoResponses;

use crate::error::{CommonError, ErrorKind};

pub const API_VERSION_TAG: &str = "v1";

pub struct JsonResponse<T: Serialize, E: Serialize>(Result<T, E>);

impl<T: Serialize, E: Serialize + IntoResponse> JsonResponse<T, E> {
    pub fn new_error(error: E) -> Self {
        Self(Err(error))
    }

    pub fn new_ok(value: T) -> Self {
        Self(Ok(value))
    }
}

impl<T: Serialize, E: Serialize + IntoResponse> IntoResponses for JsonResponse<T, E> {
    fn responses() -> std::collections::BTreeMap<
        String,
        utoipa::openapi::RefOr<utoipa::openapi::response::Response>,
    > {
        std::collections::BTreeMap::new()
    }
}

impl<T: Serialize> IntoResponse for JsonResponse<T, CommonError> {
    fn into_response(self) -> Response {
        match self.0 {
            Ok(value) => (StatusCode::OK, Json(value)).into_response(),
            Err(error) => {
                // caller mistakes are expected traffic, only server faults are errors
                match error.kind() {
                    ErrorKind::Internal => error!("Error: {:?}", error),
                    ErrorKind::InvalidArgument | ErrorKind::NotFound => {
                        warn!("Request rejected: {:?}", error)
                    }
                }

                error.into_response()
            }
        }
    }
}

impl<T: Serialize, E: Serialize + IntoResponse + Debug> From<Result<T, E>> for JsonResponse<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => JsonResponse::new_ok(value),
            Err(error) => JsonResponse::new_error(error),
        }
    }
}
