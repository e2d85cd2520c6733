//!
//! nexusfarma HTTP server
//! ----------------------
//! Axum router for the access layer of NexusFarma.
//!
//! Responsibilities:
//! - Login/logout backed by the credential authenticator, with the signed session
//!   token carried in an HttpOnly cookie.
//! - Session read and explicit refresh after a profile update.
//! - Registration, password reset and admin user management (access level, sub-role,
//!   deletion).
//! - The route guard as middleware over the `/dashboard` tree.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::clients::{ClientRegistry, StoreBackend};
use crate::config::ServerConfig;
use crate::error::{AppError, AppResult, AuthError};
use crate::identity::guard::{self, GuardDecision};
use crate::identity::{
    ephemeral_secret, AccessLevel, CredentialAuthenticator, Location, LoginRequest, NewUser, ProfilePatch,
    RequestContext, SessionClaims, SessionIssuer, SubRole, UserDirectory,
};

pub const SESSION_COOKIE: &str = "nexusfarma_session";

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub directory: UserDirectory,
    pub authenticator: Arc<CredentialAuthenticator>,
    pub issuer: Arc<SessionIssuer>,
    pub secure_cookie: bool,
}

impl AppState {
    pub fn from_config(cfg: &ServerConfig, clients: &ClientRegistry) -> anyhow::Result<Self> {
        let directory = clients.directory()?;
        let secret = match cfg.session_secret.clone() {
            Some(s) => s,
            None => {
                warn!(target: "startup", "no session secret configured; sessions will not survive a restart");
                ephemeral_secret()?
            }
        };
        let issuer = SessionIssuer::new(&secret, cfg.session_max_age)?;
        let authenticator = CredentialAuthenticator::new(directory.clone(), cfg.missing_principal);
        Ok(Self {
            directory,
            authenticator: Arc::new(authenticator),
            issuer: Arc::new(issuer),
            secure_cookie: cfg.secure_cookie,
        })
    }

    fn session_cookie(&self, claims: &SessionClaims) -> AppResult<HeaderValue> {
        self.session_cookie_at(claims, chrono::Utc::now().timestamp())
    }

    /// Cookie carrying `claims`; it lives exactly as long as the token inside it.
    fn session_cookie_at(&self, claims: &SessionClaims, now: i64) -> AppResult<HeaderValue> {
        let token = self.issuer.encode(claims).map_err(|e| AppError::internal("token_encode".to_string(), e.to_string()))?;
        let secure = if self.secure_cookie { "; Secure" } else { "" };
        let cookie = format!(
            "{}={}; HttpOnly; Path=/; SameSite=Lax; Max-Age={}{}",
            SESSION_COOKIE,
            token,
            claims.remaining_secs_at(now),
            secure
        );
        HeaderValue::from_str(&cookie).map_err(|e| AppError::internal("cookie_header".to_string(), e.to_string()))
    }

    fn clear_cookie(&self) -> HeaderValue {
        let secure = if self.secure_cookie { "; Secure" } else { "" };
        HeaderValue::from_str(&format!("{}=; HttpOnly; Path=/; SameSite=Lax; Max-Age=0{}", SESSION_COOKIE, secure))
            .unwrap_or_else(|_| HeaderValue::from_static("nexusfarma_session=; Path=/; Max-Age=0"))
    }

    /// Claims from the session cookie. Missing, tampered and expired tokens all give `None`.
    fn claims_from_headers(&self, headers: &HeaderMap) -> Option<SessionClaims> {
        let token = parse_cookie(headers, SESSION_COOKIE)?;
        match self.issuer.verify(&token) {
            Ok(c) => Some(c),
            Err(e) => {
                debug!(error = %e, "session cookie rejected");
                None
            }
        }
    }

    fn require_session(&self, headers: &HeaderMap) -> AppResult<SessionClaims> {
        self.claims_from_headers(headers)
            .ok_or_else(|| AppError::auth("unauthenticated", "sign in required"))
    }

    fn require_admin(&self, headers: &HeaderMap) -> AppResult<SessionClaims> {
        let claims = self.require_session(headers)?;
        if !claims.is_admin() {
            return Err(AuthError::Forbidden.into());
        }
        Ok(claims)
    }
}

fn log_startup(cfg: &ServerConfig) {
    let backend = match &cfg.backend {
        StoreBackend::File(p) => format!("file:{}", p.display()),
        StoreBackend::Memory => "memory".to_string(),
    };
    info!(
        target: "startup",
        "nexusfarma starting: http_port={}, store={}, session_days={}, secure_cookie={}, missing_principal={:?}",
        cfg.http_port,
        backend,
        cfg.session_max_age.as_secs() / 86_400,
        cfg.secure_cookie,
        cfg.missing_principal
    );
}

/// Build the full router over `state`.
pub fn router(state: AppState) -> Router {
    let dashboard = Router::new()
        .route("/dashboard", get(dashboard_page))
        .route("/dashboard/{*rest}", get(dashboard_page))
        .route_layer(middleware::from_fn_with_state(state.clone(), route_guard));

    Router::new()
        .route("/", get(|| async { "nexusfarma ok" }))
        .route("/login", get(login_page))
        .route("/register", get(register_page))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/session", get(get_session).post(update_session))
        .route("/api/auth/register", post(register))
        .route("/api/auth/forgot-password", post(forgot_password))
        .route("/api/auth/reset-password", post(reset_password))
        .route("/api/auth/select-location", post(select_location))
        .route("/api/users", get(list_users))
        .route("/api/users/{id}", axum::routing::delete(delete_user))
        .route("/api/users/{id}/access-level", post(set_access_level))
        .route("/api/users/{id}/sub-role", post(set_sub_role))
        .merge(dashboard)
        .with_state(state)
}

/// Serve on an already bound listener until the process stops.
pub async fn serve(listener: tokio::net::TcpListener, state: AppState) -> anyhow::Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Start the HTTP server described by `cfg`.
pub async fn run(cfg: ServerConfig) -> anyhow::Result<()> {
    log_startup(&cfg);
    let clients = ClientRegistry::new(cfg.backend.clone());
    let state = AppState::from_config(&cfg, &clients)?;
    let addr: SocketAddr = format!("0.0.0.0:{}", cfg.http_port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding HTTP listener on {}", addr))?;
    info!("Starting server on {}", addr);
    serve(listener, state).await
}

fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for value in headers.get_all(header::COOKIE) {
        let Ok(s) = value.to_str() else { continue };
        for part in s.split(';') {
            let p = part.trim();
            if let Some((k, v)) = p.split_once('=') {
                if k == name && !v.is_empty() { return Some(v.to_string()); }
            }
        }
    }
    None
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Where a freshly signed-in principal should land.
fn landing_for(claims: &SessionClaims) -> &'static str {
    if claims.is_coordinator() { guard::SELECT_LOCATION } else { guard::home_for(claims.location) }
}

async fn route_guard(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    let claims = state.claims_from_headers(req.headers());
    match guard::evaluate(claims.as_ref(), &path) {
        GuardDecision::Redirect(target) => {
            debug!(path = %path, target = target, "guard.redirect");
            Redirect::to(target).into_response()
        }
        GuardDecision::Allow => {
            req.extensions_mut().insert(RequestContext::new(claims, guard::classify(&path)));
            next.run(req).await
        }
    }
}

async fn dashboard_page(Extension(ctx): Extension<RequestContext>, uri: Uri) -> Json<serde_json::Value> {
    let user = ctx.claims.as_ref().map(|c| {
        json!({
            "id": c.sub,
            "name": c.name,
            "email": c.email,
            "role": c.role,
            "sub_role": c.sub_role,
            "location": c.location,
            "access_level": c.access_level,
        })
    });
    Json(json!({
        "area": ctx.route.as_str(),
        "path": uri.path(),
        "request_id": ctx.request_id,
        "user": user,
    }))
}

async fn login_page() -> &'static str { "nexusfarma login" }

async fn register_page() -> &'static str { "nexusfarma register" }

#[derive(Debug, Deserialize)]
struct LoginPayload { email: String, password: String }

#[derive(Debug, Deserialize)]
struct EmailPayload { email: String }

#[derive(Debug, Deserialize)]
struct ResetPayload { code: String, password: String }

#[derive(Debug, Deserialize)]
struct LocationPayload { location: Location }

#[derive(Debug, Deserialize)]
struct AccessLevelPayload { access_level: AccessLevel }

#[derive(Debug, Deserialize)]
struct SubRolePayload {
    #[serde(default)]
    sub_role: Option<SubRole>,
}

async fn login(State(state): State<AppState>, headers: HeaderMap, Json(payload): Json<LoginPayload>) -> AppResult<Response> {
    let req = LoginRequest { email: payload.email, password: payload.password, ip: client_ip(&headers) };
    let principal = match state.authenticator.authenticate(&req).await {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, ip = ?req.ip, "login rejected");
            return Err(e.into());
        }
    };
    let claims = state.issuer.issue(&principal);
    let mut h = HeaderMap::new();
    h.insert(header::SET_COOKIE, state.session_cookie(&claims)?);
    let body = json!({"status": "ok", "user": principal, "redirect": landing_for(&claims)});
    Ok((StatusCode::OK, h, Json(body)).into_response())
}

async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    let mut h = HeaderMap::new();
    h.insert(header::SET_COOKIE, state.clear_cookie());
    (StatusCode::OK, h, Json(json!({"status": "ok", "redirect": guard::LOGIN_PATH})))
}

async fn get_session(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<SessionClaims>> {
    Ok(Json(state.require_session(&headers)?))
}

/// Profile update trigger: persist the patch, then re-issue the token with only those fields merged.
async fn update_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(patch): Json<ProfilePatch>,
) -> AppResult<Response> {
    let claims = state.require_session(&headers)?;
    let patch = patch.normalized();
    if patch.is_empty() {
        return Ok(Json(claims).into_response());
    }
    state.directory.update_profile(&claims.sub, &patch).await?;
    let refreshed = state.issuer.refresh(&claims, &patch);
    let mut h = HeaderMap::new();
    h.insert(header::SET_COOKIE, state.session_cookie(&refreshed)?);
    Ok((StatusCode::OK, h, Json(refreshed)).into_response())
}

async fn register(State(state): State<AppState>, Json(new): Json<NewUser>) -> AppResult<Response> {
    let principal = state.directory.register(new).await?;
    Ok((StatusCode::CREATED, Json(json!({"status": "ok", "user": principal}))).into_response())
}

async fn forgot_password(State(state): State<AppState>, Json(payload): Json<EmailPayload>) -> AppResult<Json<serde_json::Value>> {
    match state.directory.provider().send_password_reset(&payload.email).await {
        Ok(()) => {}
        Err(e @ AuthError::ExternalServiceFailure(_)) => return Err(e.into()),
        // Same answer whether or not the account exists
        Err(e) => debug!(error = %e, "password reset request not delivered"),
    }
    Ok(Json(json!({"status": "ok"})))
}

async fn reset_password(State(state): State<AppState>, Json(payload): Json<ResetPayload>) -> AppResult<Json<serde_json::Value>> {
    state.directory.provider().reset_password(&payload.code, &payload.password).await?;
    Ok(Json(json!({"status": "ok"})))
}

async fn select_location(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<LocationPayload>,
) -> AppResult<Json<serde_json::Value>> {
    let claims = state.require_session(&headers)?;
    if !claims.is_coordinator() {
        return Err(AppError::forbidden("coordinator_only", "only coordinators choose a working location"));
    }
    Ok(Json(json!({"status": "ok", "redirect": guard::home_for(payload.location)})))
}

async fn list_users(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<serde_json::Value>> {
    state.require_admin(&headers)?;
    let users = state.directory.list().await?;
    Ok(Json(json!({"users": users})))
}

async fn set_access_level(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<AccessLevelPayload>,
) -> AppResult<Json<serde_json::Value>> {
    let admin = state.require_admin(&headers)?;
    let user = state.directory.set_access_level(&id, payload.access_level).await?;
    info!(by = %admin.sub, user_id = %id, "admin.access_level");
    Ok(Json(json!({"status": "ok", "user": user})))
}

async fn set_sub_role(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<SubRolePayload>,
) -> AppResult<Json<serde_json::Value>> {
    let admin = state.require_admin(&headers)?;
    let user = state.directory.set_sub_role(&id, payload.sub_role).await?;
    info!(by = %admin.sub, user_id = %id, "admin.sub_role");
    Ok(Json(json!({"status": "ok", "user": user})))
}

async fn delete_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    let admin = state.require_admin(&headers)?;
    state.directory.delete(&id).await?;
    info!(by = %admin.sub, user_id = %id, "admin.delete_user");
    Ok(Json(json!({"status": "ok"})))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_cookie(v: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(header::COOKIE, HeaderValue::from_str(v).unwrap());
        h
    }

    #[test]
    fn cookie_parsing() {
        let h = headers_with_cookie("theme=dark; nexusfarma_session=abc.def; other=1");
        assert_eq!(parse_cookie(&h, SESSION_COOKIE).as_deref(), Some("abc.def"));
        assert_eq!(parse_cookie(&h, "missing"), None);
        let empty = headers_with_cookie("nexusfarma_session=");
        assert_eq!(parse_cookie(&empty, SESSION_COOKIE), None);
    }

    #[test]
    fn forwarded_ip_takes_first_hop() {
        let mut h = HeaderMap::new();
        h.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.7, 172.16.0.1"));
        assert_eq!(client_ip(&h).as_deref(), Some("10.0.0.7"));
        assert_eq!(client_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn cookie_attributes() {
        let cfg = ServerConfig { backend: StoreBackend::Memory, secure_cookie: true, ..ServerConfig::default() };
        let state = AppState::from_config(&cfg, &ClientRegistry::new(StoreBackend::Memory)).unwrap();
        let p = crate::identity::Principal {
            id: "u".into(),
            email: "u@caf.test".into(),
            name: "U".into(),
            role: Default::default(),
            sub_role: None,
            location: Location::Caf,
            access_level: AccessLevel::User,
            avatar_color: None,
            birthdate: None,
            created_at: 0,
        };
        let now = 1_700_000_000;
        let v = state.session_cookie_at(&state.issuer.issue_at(&p, now), now).unwrap();
        let s = v.to_str().unwrap();
        assert!(s.starts_with("nexusfarma_session="));
        assert!(s.contains("HttpOnly"));
        assert!(s.contains("Path=/"));
        assert!(s.contains(&format!("Max-Age={}", 30 * 24 * 3600)));
        assert!(s.ends_with("; Secure"));
        assert!(state.clear_cookie().to_str().unwrap().contains("Max-Age=0"));

        // a token refreshed an hour into its life keeps its expiry, and so does the cookie
        let issued = state.issuer.issue_at(&p, now - 3600);
        let patch = crate::identity::ProfilePatch { name: Some("Outro".into()), ..Default::default() };
        let refreshed = state.issuer.refresh(&issued, &patch);
        let v = state.session_cookie_at(&refreshed, now).unwrap();
        assert!(v.to_str().unwrap().contains(&format!("Max-Age={};", 30 * 24 * 3600 - 3600)));
    }
}
