use axum::Router;
use key_management::router::{KeyStorageApi, create_router};
use tower_http::cors::CorsLayer;
use utoipa::openapi::OpenApi;

pub(crate) fn initiate_routers(service: KeyStorageApi) -> Router {
    let (key_storage_router, _) = create_router().split_for_parts();
    let key_storage_router = key_storage_router.with_state(service);

    Router::new()
        .merge(key_storage_router)
        .layer(CorsLayer::permissive())
}

pub(crate) fn generate_openapi_spec() -> OpenApi {
    let (_, spec) = create_router().split_for_parts();
    spec
}

#[cfg(all(test, feature = "unit_test"))]
mod unit_test {
    use super::*;

    #[test]
    fn test_openapi_lists_key_storage_routes() {
        let spec = generate_openapi_spec();
        let paths: Vec<&String> = spec.paths.paths.keys().collect();
        assert!(paths.contains(&&"/api/key-storage/v1/encryption-key".to_string()));
        assert!(paths.contains(&&"/api/key-storage/v1/data-key".to_string()));
        assert!(paths.contains(&&"/api/key-storage/v1/encryption-key/{key_id}".to_string()));
        assert!(paths.contains(&&"/api/key-storage/v1/public-keys".to_string()));
    }
}
