use axum::extract::{Json, Path, Query, State};
use serde::{Deserialize, Serialize};
use shared::{
    adapters::openapi::{API_VERSION_TAG, JsonResponse},
    error::CommonError,
};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::logic::data_key::DataKey;
use crate::logic::encryption_key::EncryptionKey;
use crate::logic::storage::{
    CreateKeyRequest, GetEncryptionKeyResponse, KeyStorageService, ListPublicKeysResponse,
};
use crate::repository::Repository;

pub const PATH_PREFIX: &str = "/api";
pub const API_VERSION_1: &str = "v1";
pub const SERVICE_ROUTE_KEY: &str = "key-storage";
/// Path segments between a coordinator's base url and the individual routes.
pub const API_PATH_PREFIX: &str = "api/key-storage/v1";
pub const ENCRYPTION_KEY_PATH: &str = "encryption-key";
pub const DATA_KEY_PATH: &str = "data-key";

pub type KeyStorageApi = KeyStorageService<Repository>;

pub fn create_router() -> OpenApiRouter<KeyStorageApi> {
    OpenApiRouter::new()
        .routes(routes!(route_create_encryption_key))
        .routes(routes!(route_get_data_key))
        .routes(routes!(route_get_encryption_key))
        .routes(routes!(route_list_public_keys))
}

#[utoipa::path(
    post,
    path = format!("{}/{}/{}/encryption-key", PATH_PREFIX, SERVICE_ROUTE_KEY, API_VERSION_1),
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    request_body = CreateKeyRequest,
    responses(
        (status = 200, description = "Key split stored and countersigned", body = EncryptionKey),
        (status = 400, description = "Bad Request", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "Store key split",
    description = "Accept this coordinator's split of a jointly generated key, store it under the local key encryption key and return the key with this coordinator's signature appended",
    operation_id = "create-encryption-key",
)]
async fn route_create_encryption_key(
    State(ctx): State<KeyStorageApi>,
    Json(request): Json<CreateKeyRequest>,
) -> JsonResponse<EncryptionKey, CommonError> {
    let res = ctx.create_key(request).await;
    JsonResponse::from(res)
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct GetDataKeyRequest {}

#[utoipa::path(
    post,
    path = format!("{}/{}/{}/data-key", PATH_PREFIX, SERVICE_ROUTE_KEY, API_VERSION_1),
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    request_body = GetDataKeyRequest,
    responses(
        (status = 200, description = "Freshly issued data key", body = DataKey),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "Issue data key",
    description = "Issue a short-lived data key the peer coordinator uses to encrypt key splits sent here",
    operation_id = "get-data-key",
)]
async fn route_get_data_key(
    State(ctx): State<KeyStorageApi>,
    Json(_request): Json<GetDataKeyRequest>,
) -> JsonResponse<DataKey, CommonError> {
    let res = ctx.get_data_key().await;
    JsonResponse::from(res)
}

#[utoipa::path(
    get,
    path = format!("{}/{}/{}/encryption-key/{{key_id}}", PATH_PREFIX, SERVICE_ROUTE_KEY, API_VERSION_1),
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    params(
        ("key_id" = String, Path, description = "Encryption key ID"),
    ),
    responses(
        (status = 200, description = "Stored key without private material", body = GetEncryptionKeyResponse),
        (status = 404, description = "Not Found", body = CommonError),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "Get encryption key",
    description = "Get a stored key split record, with its private material removed",
    operation_id = "get-encryption-key",
)]
async fn route_get_encryption_key(
    State(ctx): State<KeyStorageApi>,
    Path(key_id): Path<String>,
) -> JsonResponse<GetEncryptionKeyResponse, CommonError> {
    let res = ctx
        .get_encryption_key(&key_id)
        .await
        .map(|key| GetEncryptionKeyResponse { key });
    JsonResponse::from(res)
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListPublicKeysParams {
    /// Maximum number of keys returned, 5 when absent
    pub limit: Option<usize>,
}

#[utoipa::path(
    get,
    path = format!("{}/{}/{}/public-keys", PATH_PREFIX, SERVICE_ROUTE_KEY, API_VERSION_1),
    tags = [SERVICE_ROUTE_KEY, API_VERSION_TAG],
    params(
        ListPublicKeysParams
    ),
    responses(
        (status = 200, description = "Currently active public keys", body = ListPublicKeysResponse),
        (status = 500, description = "Internal Server Error", body = CommonError),
    ),
    summary = "List public keys",
    description = "List the public key material of keys that are active now, soonest expiring first",
    operation_id = "list-public-keys",
)]
async fn route_list_public_keys(
    State(ctx): State<KeyStorageApi>,
    Query(params): Query<ListPublicKeysParams>,
) -> JsonResponse<ListPublicKeysResponse, CommonError> {
    let res = ctx
        .list_active_public_keys(params.limit)
        .await
        .map(|keys| ListPublicKeysResponse { keys });
    JsonResponse::from(res)
}

#[cfg(all(test, feature = "unit_test"))]
mod unit_test {
    use std::sync::Arc;

    use super::*;
    use crate::logic::data_key::DataKeyExchange;
    use crate::logic::kek::{KeyEncryptionAead, KeyEncryptionKey};
    use crate::logic::signing::{Ed25519Signer, PublicKeySign, PublicKeyVerify};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use shared::primitives::SqlMigrationLoader;
    use shared::test_utils::repository::setup_in_memory_database;
    use tower::ServiceExt;

    async fn test_app() -> (libsql::Database, axum::Router) {
        let (db, conn) = setup_in_memory_database(vec![Repository::load_sql_migrations()])
            .await
            .unwrap();
        let kek: Arc<dyn KeyEncryptionAead> = Arc::new(
            KeyEncryptionKey::local("local-kek:///router-test", vec![9u8; 32]).unwrap(),
        );
        let signer: Arc<dyn PublicKeySign> = Arc::new(Ed25519Signer::generate());

        let data_key_kek: Arc<dyn KeyEncryptionAead> = Arc::new(
            KeyEncryptionKey::local("local-kek:///router-test-data-keys", vec![7u8; 32]).unwrap(),
        );
        let data_key_signer = Arc::new(Ed25519Signer::generate());
        let verifier: Arc<dyn PublicKeyVerify> = Arc::new(data_key_signer.verifier());
        let exchange = DataKeyExchange::new(
            data_key_kek,
            data_key_signer,
            verifier,
            chrono::Duration::hours(1),
        );
        let service =
            KeyStorageService::new(Repository::new(conn), kek, Some(signer), exchange).unwrap();

        let (router, _) = create_router().split_for_parts();
        (db, router.with_state(service))
    }

    #[tokio::test]
    async fn test_data_key_route_issues_key() {
        shared::setup_test!();

        let (_db, app) = test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/key-storage/v1/data-key")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let data_key: DataKey = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            data_key.encrypted_data_key_kek_uri,
            "local-kek:///router-test-data-keys"
        );
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        shared::setup_test!();

        let (_db, app) = test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/key-storage/v1/encryption-key/missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let error: shared::error::ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(error.name, "NotFound");
    }

    #[tokio::test]
    async fn test_bad_split_is_bad_request() {
        shared::setup_test!();

        let (_db, app) = test_app().await;
        let body = serde_json::json!({
            "key_id": "k1",
            "key": {
                "key_id": "k1",
                "public_key": "cHVi",
                "public_key_material": "UEtN",
                "key_type": "MULTI_PARTY_HYBRID_EVEN_KEYSPLIT",
                "creation_time": "2024-05-01T00:00:00.000Z",
                "activation_time": "2024-05-01T00:00:00.000Z",
                "expiration_time": "2024-05-09T00:00:00.000Z",
                "ttl_time": "2025-05-01T00:00:00.000Z"
            },
            "key_split_encryption_type": "DIRECT",
            "encrypted_key_split": "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/key-storage/v1/encryption-key")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_public_keys_empty() {
        shared::setup_test!();

        let (_db, app) = test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/key-storage/v1/public-keys?limit=3")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let listed: ListPublicKeysResponse = serde_json::from_slice(&body).unwrap();
        assert!(listed.keys.is_empty());
    }
}
