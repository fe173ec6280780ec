use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Path, Query, Request, State},
    http::{request::Parts, HeaderMap},
    routing::{get, post, put},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;
use tracing::info;

use cloak_core::{
    IdentityCore, IdentityStatus, MaskOutcome, MaskRequest, PublicProfile, Reassignment,
    RevealedIdentity,
};
use cloak_shared::{CallerContext, Pseudonym, Role, UserId};
use cloak_store::{AuditFilter, AuditPage, ClassMember, MenteeSummary, RelationshipEdge};

use crate::config::ServerConfig;
use crate::error::ServerError;

pub const HEADER_CALLER_ID: &str = "x-caller-id";
pub const HEADER_CALLER_ROLE: &str = "x-caller-role";
pub const HEADER_CALLER_PSEUDONYM: &str = "x-caller-pseudonym";
pub const HEADER_GATEWAY_TOKEN: &str = "x-gateway-token";

#[derive(Clone)]
pub struct AppState {
    pub core: IdentityCore,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/identities/:user_id/mask", post(mask_identity))
        .route("/identities/export", post(export_identities))
        .route("/pseudonyms/generate", post(generate_pseudonyms))
        .route("/pseudonyms/:pseudonym/unmask", post(unmask_identity))
        .route("/profiles/:pseudonym", get(public_profile))
        .route("/mentorships", post(assign_mentor))
        .route(
            "/mentorships/:mentee",
            put(reassign_mentor).delete(remove_mentor),
        )
        .route("/mentors/:pseudonym/mentees", get(list_mentees))
        .route("/classes/:class_id/members", get(list_class_members))
        .route("/audit", get(audit_trail))
        .route("/me/identity", get(identity_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Caller context
// ---------------------------------------------------------------------------

/// The authenticated caller, as asserted by the upstream gateway.
pub struct Caller(pub CallerContext);

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        caller_from_headers(&parts.headers, state.config.gateway_token.as_deref()).map(Caller)
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn caller_from_headers(
    headers: &HeaderMap,
    gateway_token: Option<&str>,
) -> Result<CallerContext, ServerError> {
    let Some(expected) = gateway_token else {
        return Err(ServerError::Unauthenticated(
            "caller API is disabled: CLOAK_GATEWAY_TOKEN is not configured".into(),
        ));
    };
    let presented = header(headers, HEADER_GATEWAY_TOKEN).unwrap_or("");
    // constant-time comparison
    if presented.len() != expected.len()
        || presented.as_bytes().ct_eq(expected.as_bytes()).unwrap_u8() != 1
    {
        return Err(ServerError::Unauthenticated("invalid gateway token".into()));
    }

    let user_id = header(headers, HEADER_CALLER_ID)
        .ok_or_else(|| ServerError::Unauthenticated("missing caller id".into()))?
        .parse::<i64>()
        .map_err(|_| ServerError::Unauthenticated("invalid caller id".into()))?;

    let role: Role = header(headers, HEADER_CALLER_ROLE)
        .ok_or_else(|| ServerError::Unauthenticated("missing caller role".into()))?
        .parse()
        .map_err(|_| ServerError::Unauthenticated("invalid caller role".into()))?;

    let mut caller = CallerContext::new(UserId(user_id), role);
    if let Some(raw) = header(headers, HEADER_CALLER_PSEUDONYM) {
        let pseudonym = Pseudonym::parse(raw)
            .map_err(|_| ServerError::BadRequest("malformed caller pseudonym".into()))?;
        caller = caller.with_pseudonym(pseudonym);
    }
    Ok(caller)
}

// ---------------------------------------------------------------------------
// Extractors with JSON error bodies
// ---------------------------------------------------------------------------

/// `Json` whose rejections render as [`ServerError`].
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(ApiJson(value))
    }
}

pub struct ApiPath<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state).await?;
        Ok(ApiPath(value))
    }
}

pub struct ApiQuery<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(ApiQuery(value))
    }
}

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Deserialize)]
struct MaskBody {
    mentor: Option<String>,
    class_id: Option<String>,
    reason: Option<String>,
}

#[derive(Deserialize)]
struct ReasonBody {
    reason: String,
}

#[derive(Deserialize)]
struct GenerateBody {
    count: Option<usize>,
}

#[derive(Serialize)]
struct GenerateResponse {
    pseudonyms: Vec<Pseudonym>,
}

#[derive(Deserialize)]
struct AssignBody {
    mentor: String,
    mentee: String,
    reason: Option<String>,
}

#[derive(Deserialize)]
struct ReassignBody {
    mentor: String,
    reason: Option<String>,
}

#[derive(Deserialize)]
struct OptionalReason {
    reason: Option<String>,
}

#[derive(Deserialize)]
struct ClassMembersQuery {
    /// Pseudonym the caller is asking as. Defaults to the caller's own.
    #[serde(rename = "as")]
    as_pseudonym: Option<String>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn mask_identity(
    State(state): State<AppState>,
    Caller(caller): Caller,
    ApiPath(user_id): ApiPath<i64>,
    ApiJson(body): ApiJson<MaskBody>,
) -> Result<Json<MaskOutcome>, ServerError> {
    let mentor = body
        .mentor
        .as_deref()
        .map(Pseudonym::parse)
        .transpose()
        .map_err(cloak_core::CoreError::from)?;

    let req = MaskRequest {
        user_id: UserId(user_id),
        mentor,
        class_id: body.class_id,
        reason: body.reason,
    };
    Ok(Json(state.core.mask_identity(&caller, req).await?))
}

async fn unmask_identity(
    State(state): State<AppState>,
    Caller(caller): Caller,
    ApiPath(pseudonym): ApiPath<String>,
    ApiJson(body): ApiJson<ReasonBody>,
) -> Result<Json<RevealedIdentity>, ServerError> {
    let revealed = state
        .core
        .unmask_identity(&caller, &pseudonym, &body.reason)
        .await?;
    Ok(Json(revealed))
}

async fn export_identities(
    State(state): State<AppState>,
    Caller(caller): Caller,
    ApiJson(body): ApiJson<ReasonBody>,
) -> Result<Json<Vec<RevealedIdentity>>, ServerError> {
    let all = state
        .core
        .export_masked_identities(&caller, &body.reason)
        .await?;
    Ok(Json(all))
}

async fn generate_pseudonyms(
    State(state): State<AppState>,
    Caller(caller): Caller,
    ApiJson(body): ApiJson<GenerateBody>,
) -> Result<Json<GenerateResponse>, ServerError> {
    let pseudonyms = state
        .core
        .generate_pseudonyms(&caller, body.count.unwrap_or(1))
        .await?;
    Ok(Json(GenerateResponse { pseudonyms }))
}

async fn public_profile(
    State(state): State<AppState>,
    Caller(caller): Caller,
    ApiPath(pseudonym): ApiPath<String>,
) -> Result<Json<PublicProfile>, ServerError> {
    Ok(Json(
        state.core.resolve_public_profile(&caller, &pseudonym).await?,
    ))
}

async fn assign_mentor(
    State(state): State<AppState>,
    Caller(caller): Caller,
    ApiJson(body): ApiJson<AssignBody>,
) -> Result<Json<RelationshipEdge>, ServerError> {
    let edge = state
        .core
        .assign_mentor(&caller, &body.mentor, &body.mentee, body.reason)
        .await?;
    Ok(Json(edge))
}

async fn reassign_mentor(
    State(state): State<AppState>,
    Caller(caller): Caller,
    ApiPath(mentee): ApiPath<String>,
    ApiJson(body): ApiJson<ReassignBody>,
) -> Result<Json<Reassignment>, ServerError> {
    let swap = state
        .core
        .reassign_mentor(&caller, &mentee, &body.mentor, body.reason)
        .await?;
    Ok(Json(swap))
}

async fn remove_mentor(
    State(state): State<AppState>,
    Caller(caller): Caller,
    ApiPath(mentee): ApiPath<String>,
    ApiQuery(query): ApiQuery<OptionalReason>,
) -> Result<Json<RelationshipEdge>, ServerError> {
    let edge = state
        .core
        .remove_mentor(&caller, &mentee, query.reason)
        .await?;
    Ok(Json(edge))
}

async fn list_mentees(
    State(state): State<AppState>,
    Caller(caller): Caller,
    ApiPath(mentor): ApiPath<String>,
) -> Result<Json<Vec<MenteeSummary>>, ServerError> {
    Ok(Json(state.core.list_mentees(&caller, &mentor).await?))
}

async fn list_class_members(
    State(state): State<AppState>,
    Caller(caller): Caller,
    ApiPath(class_id): ApiPath<String>,
    ApiQuery(query): ApiQuery<ClassMembersQuery>,
) -> Result<Json<Vec<ClassMember>>, ServerError> {
    let requesting = match (query.as_pseudonym, &caller.pseudonym) {
        (Some(p), _) => p,
        (None, Some(own)) => own.as_str().to_string(),
        (None, None) => {
            return Err(ServerError::BadRequest(
                "no pseudonym to list the class as".into(),
            ))
        }
    };
    let members = state
        .core
        .list_class_members(&caller, &class_id, &requesting)
        .await?;
    Ok(Json(members))
}

async fn audit_trail(
    State(state): State<AppState>,
    Caller(caller): Caller,
    ApiQuery(filter): ApiQuery<AuditFilter>,
) -> Result<Json<AuditPage>, ServerError> {
    Ok(Json(state.core.get_audit_trail(&caller, &filter).await?))
}

async fn identity_status(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Json<IdentityStatus>, ServerError> {
    let status = state
        .core
        .get_identity_status_for_self(&caller, caller.user_id)
        .await?;
    Ok(Json(status))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use cloak_core::{CloakConfig, CoreContext, MemoryAlertSink, MemoryVault};
    use cloak_shared::crypto::generate_symmetric_key;
    use cloak_shared::{EnvelopeCrypto, MembershipStage};
    use cloak_store::{Database, NewIdentity};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const GATEWAY: &str = "gw-secret";

    fn app() -> (Router, IdentityCore) {
        app_with_gateway(Some(GATEWAY))
    }

    fn app_with_gateway(gateway_token: Option<&str>) -> (Router, IdentityCore) {
        let db = Database::open_in_memory().unwrap();
        let crypto =
            EnvelopeCrypto::new(generate_symmetric_key(), generate_symmetric_key()).unwrap();
        let ctx = CoreContext::new(
            db,
            crypto,
            Arc::new(MemoryVault::new()),
            Arc::new(MemoryAlertSink::new()),
        );
        let core = IdentityCore::new(ctx);
        let config = ServerConfig {
            core: CloakConfig::with_keys(generate_symmetric_key(), generate_symmetric_key()),
            http_addr: ([127, 0, 0, 1], 0).into(),
            gateway_token: gateway_token.map(str::to_string),
        };
        let state = AppState {
            core: core.clone(),
            config: Arc::new(config),
        };
        (build_router(state), core)
    }

    fn request(
        method: &str,
        uri: &str,
        caller: Option<(i64, &str)>,
        body: Option<Value>,
    ) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(HEADER_GATEWAY_TOKEN, GATEWAY);
        if let Some((id, role)) = caller {
            builder = builder
                .header(HEADER_CALLER_ID, id.to_string())
                .header(HEADER_CALLER_ROLE, role);
        }
        match body {
            Some(v) => builder
                .header("content-type", "application/json")
                .body(Body::from(v.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn pre_member(core: &IdentityCore, name: &str) -> UserId {
        core.register_identity(&NewIdentity {
            username: name.to_string(),
            email: format!("{name}@x.com"),
            phone: None,
            real_name: None,
            address: None,
            membership_stage: MembershipStage::PreMember,
        })
        .await
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app();
        let (status, body) = send(&app, request("GET", "/health", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_mask_and_unmask_over_http() {
        let (app, core) = app();
        let user = pre_member(&core, "alice").await;

        let (status, masked) = send(
            &app,
            request(
                "POST",
                &format!("/identities/{}/mask", user.0),
                Some((1, "admin")),
                Some(json!({ "reason": "approved" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let pseudonym = masked["pseudonym"].as_str().unwrap().to_string();

        let unmask_uri = format!("/pseudonyms/{pseudonym}/unmask");
        let (status, body) = send(
            &app,
            request("POST", &unmask_uri, Some((1, "admin")), Some(json!({ "reason": "r" }))),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["kind"], "unauthorized");

        let (status, body) = send(
            &app,
            request("POST", &unmask_uri, Some((2, "super_admin")), Some(json!({ "reason": "r" }))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pii"]["email"], "alice@x.com");

        let (status, body) = send(
            &app,
            request("GET", &format!("/profiles/{pseudonym}"), Some((3, "member")), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body.to_string().contains("alice"));

        let (status, body) = send(
            &app,
            request(
                "POST",
                &format!("/identities/{}/mask", user.0),
                Some((1, "admin")),
                Some(json!({})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "already_masked");
    }

    #[tokio::test]
    async fn test_caller_headers_required() {
        let (app, _) = app();

        let (status, body) = send(&app, request("GET", "/me/identity", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["kind"], "unauthenticated");

        let forged = Request::builder()
            .uri("/me/identity")
            .header(HEADER_GATEWAY_TOKEN, "wrong-secret")
            .header(HEADER_CALLER_ID, "1")
            .header(HEADER_CALLER_ROLE, "super_admin")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, forged).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_caller_api_disabled_without_gateway_token() {
        let (app, core) = app_with_gateway(None);
        let user = pre_member(&core, "alice").await;
        let admin = CallerContext::new(UserId(1), Role::Admin);
        let masked = core
            .mask_identity(
                &admin,
                MaskRequest {
                    user_id: user,
                    mentor: None,
                    class_id: None,
                    reason: None,
                },
            )
            .await
            .unwrap();

        let forged = Request::builder()
            .method("POST")
            .uri(format!("/pseudonyms/{}/unmask", masked.pseudonym))
            .header(HEADER_CALLER_ID, "666")
            .header(HEADER_CALLER_ROLE, "super_admin")
            .header("content-type", "application/json")
            .body(Body::from(json!({ "reason": "r" }).to_string()))
            .unwrap();
        let (status, body) = send(&app, forged).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["kind"], "unauthenticated");
        assert!(!body.to_string().contains("alice"));

        let (status, _) = send(&app, request("GET", "/health", None, None)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_malformed_requests_get_json_errors() {
        let (app, _) = app();

        let (status, body) = send(
            &app,
            request(
                "POST",
                "/identities/abc/mask",
                Some((1, "admin")),
                Some(json!({})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "bad_request");
        assert!(body["error"].is_string());

        let broken = Request::builder()
            .method("POST")
            .uri("/identities/1/mask")
            .header(HEADER_GATEWAY_TOKEN, GATEWAY)
            .header(HEADER_CALLER_ID, "1")
            .header(HEADER_CALLER_ROLE, "admin")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(&app, broken).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "bad_request");

        let (status, body) = send(
            &app,
            request("GET", "/audit?page=many", Some((1, "super_admin")), None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "bad_request");
    }

    #[tokio::test]
    async fn test_self_status_and_validation_errors() {
        let (app, core) = app();
        let user = pre_member(&core, "bob").await;

        let (status, body) = send(
            &app,
            request("GET", "/me/identity", Some((user.0, "member")), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pii"]["email"], "bob@x.com");

        let (status, body) = send(
            &app,
            request("GET", "/profiles/PN-bad", Some((user.0, "member")), None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "validation_error");
    }
}
