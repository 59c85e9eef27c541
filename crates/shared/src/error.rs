use axum::{
    Json,
    response::{IntoResponse, Response},
};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::{IntoResponses, PartialSchema, ToSchema};

/// Coarse classification every [`CommonError`] falls into.
///
/// `InvalidArgument` is never retried automatically, `Internal` is safe to retry
/// with backoff by a higher layer, `NotFound` means the lookup id is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    Internal,
}

#[derive(Error, Debug, Serialize)]
pub enum CommonError {
    #[error("invalid argument: {msg}")]
    InvalidArgument {
        msg: String,
        #[serde(skip)]
        #[source]
        source: Option<anyhow::Error>,
    },
    #[error("could not find resource: {msg}")]
    NotFound {
        msg: String,
        lookup_id: String,
        #[serde(skip)]
        #[source]
        source: Option<anyhow::Error>,
    },
    #[error("internal error: {msg}")]
    Internal {
        msg: String,
        #[serde(skip)]
        #[source]
        source: Option<anyhow::Error>,
    },
    #[error("unknown error")]
    Unknown(
        #[serde(skip)]
        #[from]
        anyhow::Error,
    ),
    #[error("repository error: {msg}")]
    Repository {
        msg: String,
        #[serde(skip)]
        #[source]
        source: Option<anyhow::Error>,
    },
    #[error("sqlite database error")]
    SqliteError {
        #[serde(skip)]
        #[from]
        #[source]
        source: libsql::Error,
    },
    #[error("io error")]
    IoError {
        #[serde(skip)]
        #[from]
        #[source]
        source: std::io::Error,
    },
    #[error("url parse error")]
    UrlParseError {
        #[serde(skip)]
        #[from]
        #[source]
        source: url::ParseError,
    },
    #[error("serde json error")]
    SerdeSerializationError {
        #[serde(skip)]
        #[from]
        #[source]
        source: serde_json::Error,
    },
    #[error("address parse error")]
    AddrParseError {
        #[serde(skip)]
        #[from]
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("reqwest error")]
    ReqwestError {
        #[serde(skip)]
        #[from]
        #[source]
        source: reqwest::Error,
    },
}

impl CommonError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        CommonError::InvalidArgument {
            msg: msg.into(),
            source: None,
        }
    }

    pub fn invalid_argument_with_source(
        msg: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        CommonError::InvalidArgument {
            msg: msg.into(),
            source: Some(source.into()),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        CommonError::Internal {
            msg: msg.into(),
            source: None,
        }
    }

    pub fn internal_with_source(msg: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        CommonError::Internal {
            msg: msg.into(),
            source: Some(source.into()),
        }
    }

    pub fn not_found(msg: impl Into<String>, lookup_id: impl Into<String>) -> Self {
        CommonError::NotFound {
            msg: msg.into(),
            lookup_id: lookup_id.into(),
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CommonError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            CommonError::NotFound { .. } => ErrorKind::NotFound,
            CommonError::Internal { .. }
            | CommonError::Unknown(_)
            | CommonError::Repository { .. }
            | CommonError::SqliteError { .. }
            | CommonError::IoError { .. }
            | CommonError::UrlParseError { .. }
            | CommonError::SerdeSerializationError { .. }
            | CommonError::AddrParseError { .. }
            | CommonError::ReqwestError { .. } => ErrorKind::Internal,
        }
    }

    /// Name used in the JSON error body, also understood by [`CommonError::from_error_response`].
    pub fn name(&self) -> &'static str {
        match self {
            CommonError::InvalidArgument { .. } => "InvalidArgument",
            CommonError::NotFound { .. } => "NotFound",
            CommonError::Internal { .. } => "Internal",
            CommonError::Repository { .. } => "Repository",
            CommonError::Unknown(_)
            | CommonError::SqliteError { .. }
            | CommonError::IoError { .. }
            | CommonError::UrlParseError { .. }
            | CommonError::SerdeSerializationError { .. }
            | CommonError::AddrParseError { .. }
            | CommonError::ReqwestError { .. } => "InternalServerError",
        }
    }

    /// Rebuild an error from a body returned by a remote service.
    pub fn from_error_response(response: ErrorResponse) -> Self {
        let ErrorResponse { name, message } = response;
        match name.as_str() {
            "InvalidArgument" => CommonError::InvalidArgument {
                msg: message,
                source: None,
            },
            "NotFound" => CommonError::NotFound {
                msg: message,
                lookup_id: String::new(),
                source: None,
            },
            _ => CommonError::Internal {
                msg: format!("{name}: {message}"),
                source: None,
            },
        }
    }
}

impl ToSchema for CommonError {
    fn name() -> std::borrow::Cow<'static, str> {
        std::borrow::Cow::Borrowed("Error")
    }

    fn schemas(
        _schemas: &mut Vec<(
            String,
            utoipa::openapi::RefOr<utoipa::openapi::schema::Schema>,
        )>,
    ) {
        // nothing by default
    }
}

impl PartialSchema for CommonError {
    fn schema() -> utoipa::openapi::RefOr<utoipa::openapi::schema::Schema> {
        utoipa::openapi::ObjectBuilder::new()
            .property(
                "name",
                utoipa::openapi::ObjectBuilder::new()
                    .schema_type(utoipa::openapi::schema::Type::String),
            )
            .required("name")
            .property(
                "message",
                utoipa::openapi::ObjectBuilder::new()
                    .schema_type(utoipa::openapi::schema::Type::String),
            )
            .required("message")
            .into()
    }
}

impl IntoResponses for CommonError {
    fn responses() -> std::collections::BTreeMap<
        String,
        utoipa::openapi::RefOr<utoipa::openapi::response::Response>,
    > {
        let mut responses = std::collections::BTreeMap::new();

        let error_content = utoipa::openapi::ContentBuilder::new()
            .schema(Some(CommonError::schema()))
            .build();

        responses.insert(
            "400".to_string(),
            utoipa::openapi::ResponseBuilder::new()
                .description("Invalid argument")
                .content("application/json", error_content.clone())
                .into(),
        );

        responses.insert(
            "404".to_string(),
            utoipa::openapi::ResponseBuilder::new()
                .description("Resource not found")
                .content("application/json", error_content.clone())
                .into(),
        );

        responses.insert(
            "500".to_string(),
            utoipa::openapi::ResponseBuilder::new()
                .description("Internal error")
                .content("application/json", error_content)
                .into(),
        );

        responses
    }
}

impl IntoResponse for CommonError {
    fn into_response(self) -> Response {
        let status = match self.kind() {
            ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(ErrorResponse {
            name: self.name().to_string(),
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub name: String,
    pub message: String,
}

#[cfg(all(test, feature = "unit_test"))]
mod unit_test {
    use super::*;

    #[test]
    fn test_library_errors_classify_as_internal() {
        let err = CommonError::from(std::io::Error::other("disk gone"));
        assert_eq!(err.kind(), ErrorKind::Internal);

        let err = CommonError::Repository {
            msg: "insert failed".to_string(),
            source: None,
        };
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_error_response_round_trips_kind() {
        let original = CommonError::invalid_argument("bad key metadata");
        let response = ErrorResponse {
            name: original.name().to_string(),
            message: original.to_string(),
        };

        let rebuilt = CommonError::from_error_response(response);
        assert_eq!(rebuilt.kind(), ErrorKind::InvalidArgument);
        assert!(
            rebuilt.to_string().contains("bad key metadata"),
            "message should be preserved, got: {rebuilt}"
        );
    }

    #[test]
    fn test_unknown_error_names_fall_back_to_internal() {
        let rebuilt = CommonError::from_error_response(ErrorResponse {
            name: "Teapot".to_string(),
            message: "short and stout".to_string(),
        });
        assert_eq!(rebuilt.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_status_codes_follow_kind() {
        let res = CommonError::not_found("key missing", "ABC").into_response();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = CommonError::invalid_argument("nope").into_response();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = CommonError::internal("kms down").into_response();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
