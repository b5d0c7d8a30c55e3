//! HTTP API route definitions.

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::get,
    Router,
};
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;

use super::handlers::{healthz, not_found, root, AppState};
use super::middleware::{
    access_log_layer, admit_origin, cors_layer, decode_json_body, maintenance_gate,
    panic_response, record_metrics, PanicScopeLayer,
};
use crate::policy::maintenance::HEALTH_PATH;

/// Mount point of the authentication routes.
pub const AUTH_PREFIX: &str = "/api/auth";
/// Mount point of the APV record routes.
pub const APV_PREFIX: &str = "/api/apv";
/// Mount point of the upload routes.
pub const UPLOAD_PREFIX: &str = "/api/upload";

/// Downstream route groups supplied by the embedding application.
///
/// A group that is not supplied is simply not mounted; its paths fall through
/// to the 404 fallback.
#[derive(Debug, Default)]
pub struct RouteGroups {
    auth: Option<Router<AppState>>,
    apv: Option<Router<AppState>>,
    upload: Option<Router<AppState>>,
}

impl RouteGroups {
    /// No groups mounted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount the authentication group at [`AUTH_PREFIX`].
    pub fn auth(mut self, router: Router<AppState>) -> Self {
        self.auth = Some(router);
        self
    }

    /// Mount the APV group at [`APV_PREFIX`].
    pub fn apv(mut self, router: Router<AppState>) -> Self {
        self.apv = Some(router);
        self
    }

    /// Mount the upload group at [`UPLOAD_PREFIX`].
    pub fn upload(mut self, router: Router<AppState>) -> Self {
        self.upload = Some(router);
        self
    }

    fn mount(self, mut router: Router<AppState>) -> Router<AppState> {
        for (prefix, group) in [
            (AUTH_PREFIX, self.auth),
            (APV_PREFIX, self.apv),
            (UPLOAD_PREFIX, self.upload),
        ] {
            if let Some(group) = group {
                router = router.nest(prefix, group);
            }
        }
        router
    }
}

/// Create the API router.
///
/// Stages run outermost first: metrics, panic guard, origin admission, CORS
/// headers, maintenance gate, JSON body decoding, access log, then dispatch.
pub fn create_router(state: AppState, groups: RouteGroups) -> Router {
    let router = Router::new()
        .route("/", get(root).fallback(not_found))
        .route(HEALTH_PATH, get(healthz).fallback(not_found));

    groups
        .mount(router)
        .fallback(not_found)
        .layer(
            ServiceBuilder::new()
                .layer(from_fn(record_metrics))
                .layer(CatchPanicLayer::custom(panic_response))
                .layer(PanicScopeLayer)
                .layer(from_fn_with_state(state.clone(), admit_origin))
                .layer(cors_layer(state.origins.clone()))
                .layer(from_fn_with_state(state.clone(), maintenance_gate))
                .layer(from_fn_with_state(state.clone(), decode_json_body))
                .layer(access_log_layer()),
        )
        .with_state(state)
}
