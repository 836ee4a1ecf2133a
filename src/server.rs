//! Host HTTP surface: health, agent listing, navigation menu and per-domain
//! admin toggles, merged with the agent mounts produced at startup.

use std::future::Future;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tower_http::cors::CorsLayer;

use crate::domain::{DomainAgentState, DomainError, DomainStore, normalize_host};
use crate::error::{HostError, HostResult};
use crate::lifecycle::{LifecycleController, LifecycleState};
use crate::navigation::{self, AgentListing, MenuEntry};
use crate::registry::AgentRegistry;

/// Shared state of the host routes.
pub struct HostState {
    pub registry: Arc<AgentRegistry>,
    pub domains: Arc<dyn DomainStore>,
    pub lifecycle: Arc<LifecycleController>,
    /// Bearer token for the admin routes. Admin is disabled when `None`.
    pub admin_token: Option<String>,
    /// Domain used when the `Host` header is missing or unusable.
    pub default_domain: String,
}

impl HostState {
    /// Domain a request is addressed to.
    fn domain(&self, headers: &HeaderMap) -> String {
        headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .and_then(normalize_host)
            .unwrap_or_else(|| self.default_domain.clone())
    }

    fn domain_state(&self, domain: &str) -> Result<DomainAgentState, (StatusCode, String)> {
        self.domains.load(domain).map_err(|e| {
            tracing::warn!(domain, error = %e, "failed to load domain agent state");
            domain_error(e)
        })
    }

    fn require_admin(&self, headers: &HeaderMap) -> Result<(), (StatusCode, String)> {
        let Some(expected) = self.admin_token.as_deref() else {
            return Err((
                StatusCode::FORBIDDEN,
                "admin API is disabled: no admin token configured".to_string(),
            ));
        };
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);
        match presented {
            Some(token) if token_matches(token, expected) => Ok(()),
            _ => Err((
                StatusCode::UNAUTHORIZED,
                "missing or invalid admin token".to_string(),
            )),
        }
    }

    fn require_agent(&self, name: &str) -> Result<(), (StatusCode, String)> {
        if self.registry.get_by_name(name).is_some() {
            Ok(())
        } else {
            Err((StatusCode::NOT_FOUND, format!("agent \"{name}\" not found")))
        }
    }
}

fn token_matches(presented: &str, expected: &str) -> bool {
    presented.len() == expected.len() && presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// A bad `Host` is the client's fault; unreadable state is ours.
fn domain_error(e: DomainError) -> (StatusCode, String) {
    let status = match e {
        DomainError::InvalidDomain { .. } => StatusCode::BAD_REQUEST,
        DomainError::Read { .. } | DomainError::Parse { .. } | DomainError::Write { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, e.to_string())
}

/// Assemble the host router around the agent mounts.
pub fn build_app(state: Arc<HostState>, agents: Router) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/agents", get(list_agents))
        .route("/api/agents/menu", get(agent_menu))
        .route("/api/agents/enabled", put(set_enabled))
        .route("/api/agents/default", put(set_default))
        .with_state(state)
        .merge(agents)
        .layer(CorsLayer::permissive())
}

/// Serve `app` until `shutdown` resolves and in-flight requests finish.
pub async fn serve(
    listener: tokio::net::TcpListener,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> HostResult<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| HostError::Serve { source: e })
}

// ── Response types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub agents: usize,
    pub state: LifecycleState,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AgentsResponse {
    domain: String,
    default_agent: Option<String>,
    agents: Vec<AgentListing>,
}

#[derive(Debug, Serialize)]
struct MenuResponse {
    domain: String,
    menu: Vec<MenuEntry>,
}

#[derive(Debug, Deserialize)]
struct SetEnabledRequest {
    name: String,
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct SetDefaultRequest {
    #[serde(default)]
    name: Option<String>,
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn health(State(state): State<Arc<HostState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        agents: state.registry.len(),
        state: state.lifecycle.state(),
    })
}

async fn list_agents(
    State(state): State<Arc<HostState>>,
    headers: HeaderMap,
) -> Result<Json<AgentsResponse>, (StatusCode, String)> {
    let domain = state.domain(&headers);
    let domain_state = state.domain_state(&domain)?;
    Ok(Json(AgentsResponse {
        default_agent: domain_state.default_agent().map(str::to_string),
        agents: navigation::list_agents(&state.registry, &domain_state),
        domain,
    }))
}

async fn agent_menu(
    State(state): State<Arc<HostState>>,
    headers: HeaderMap,
) -> Result<Json<MenuResponse>, (StatusCode, String)> {
    let domain = state.domain(&headers);
    let domain_state = state.domain_state(&domain)?;
    Ok(Json(MenuResponse {
        menu: navigation::navigation_menu(&state.registry, &domain_state),
        domain,
    }))
}

async fn set_enabled(
    State(state): State<Arc<HostState>>,
    headers: HeaderMap,
    Json(req): Json<SetEnabledRequest>,
) -> Result<Json<DomainAgentState>, (StatusCode, String)> {
    state.require_admin(&headers)?;
    state.require_agent(&req.name)?;

    let domain = state.domain(&headers);
    let updated = state
        .domains
        .update(&domain, &mut |s: &mut DomainAgentState| {
            s.set_enabled(&req.name, req.enabled)
        })
        .map_err(domain_error)?;

    tracing::info!(domain, agent = %req.name, enabled = req.enabled, "agent enablement changed");
    Ok(Json(updated))
}

async fn set_default(
    State(state): State<Arc<HostState>>,
    headers: HeaderMap,
    Json(req): Json<SetDefaultRequest>,
) -> Result<Json<DomainAgentState>, (StatusCode, String)> {
    state.require_admin(&headers)?;
    let name = req.name.filter(|n| !n.is_empty());
    if let Some(name) = name.as_deref() {
        state.require_agent(name)?;
    }

    let domain = state.domain(&headers);
    let updated = state
        .domains
        .update(&domain, &mut |s: &mut DomainAgentState| s.set_default(name.as_deref()))
        .map_err(domain_error)?;

    tracing::info!(domain, default_agent = ?name, "default agent changed");
    Ok(Json(updated))
}
