use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Json, Path, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::any::Any;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ComposeConfig;
use crate::contracts::{Patch, Spec};
use crate::error::ComposeError;
use crate::experiments::{Arm, ExperimentConfig, ExperimentRunner, Variant};
use crate::intent::{CloudModel, IntentLadder, LocalModels, SessionBudget};
use crate::orchestrator::{Composer, ROUTE_CHIP, ROUTE_MUTATE, ROUTE_PROMOTE, ROUTE_RESOLVE};
use crate::safety::{
    pick_failure_fallback, resolve_context, ContextDefaults, ExecContext, FailureContext, Fallback,
    PolicyDecision, ProofSigner, QuotaDecision, QuotaLimiter, RiskPolicy, SafetyGuard,
};
use crate::store::{Clock, MemoryStore, Store};

#[derive(Clone)]
pub struct AppState {
    pub composer: Arc<Composer>,
    pub quota: Arc<QuotaLimiter>,
    pub context: Arc<ContextDefaults>,
}

impl AppState {
    pub fn new(composer: Arc<Composer>, quota: Arc<QuotaLimiter>, context: ContextDefaults) -> Self {
        Self {
            composer,
            quota,
            context: Arc::new(context),
        }
    }

    /// Wires a fresh in-memory store and every guard from `config`.
    pub fn from_config(
        config: &ComposeConfig,
        clock: Arc<dyn Clock>,
        local: Option<LocalModels>,
        cloud: Option<CloudModel>,
    ) -> Self {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new(
            clock.clone(),
            config.cache_ttl_ms,
            config.cache_max_entries,
        ));

        let mut ladder = IntentLadder::new(
            store.clone(),
            SessionBudget::new(config.session_max_cents, config.session_max_tokens),
        )
        .with_escalation_cost(config.escalation_cents, config.escalation_tokens);
        if let Some(local) = local {
            ladder = ladder.with_local(local);
        }
        if let Some(cloud) = cloud {
            ladder = ladder.with_cloud(cloud);
        }

        let policy = RiskPolicy {
            version: config.policy_version.clone(),
            max_cls: config.max_cls,
            max_lcp_ms: config.max_lcp_ms,
            require_a11y: config.require_a11y,
            block_pii: config.block_pii,
            ..Default::default()
        };
        let safety = SafetyGuard::new(policy, ProofSigner::new(&config.policy_secret));
        let runner = ExperimentRunner::new(store.clone(), config.ab_poll);
        let composer = Composer::new(store.clone(), ladder, safety, runner);
        let quota = QuotaLimiter::new(store, clock, config.quota.clone());

        Self::new(Arc::new(composer), Arc::new(quota), config.context.clone())
    }

    fn context(&self, headers: &HeaderMap) -> ExecContext {
        resolve_context(headers, &self.context)
    }
}

// --- Response envelope ---

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    spec: Option<Spec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    chips: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    no_js: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasons: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fallback: Option<Fallback>,
}

fn ok_result(result: impl Serialize) -> Result<Envelope, ApiError> {
    let result = serde_json::to_value(result).map_err(|e| ApiError::internal(e.into()))?;
    Ok(Envelope {
        ok: true,
        result: Some(result),
        ..Default::default()
    })
}

fn set_sup_headers(headers: &mut HeaderMap, decision: &PolicyDecision) {
    headers.insert("x-sup-mode", HeaderValue::from_static(decision.mode.as_str()));
    if let Ok(value) = HeaderValue::from_str(&decision.reasons.join(",")) {
        headers.insert("x-sup-reasons", value);
    }
}

/// A failure on `route`, rendered through the failure playbook.
pub struct ApiError {
    error: ComposeError,
    route: String,
}

impl ApiError {
    fn at(route: &str) -> impl FnOnce(ComposeError) -> ApiError + '_ {
        move |error| ApiError {
            error,
            route: route.to_string(),
        }
    }

    fn internal(err: anyhow::Error) -> Self {
        Self {
            error: ComposeError::Internal(err),
            route: String::new(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = self.error;
        let fallback = pick_failure_fallback(
            &FailureContext::new(error.kind())
                .route(&self.route)
                .reason(error.reason()),
        );

        let status = match &error {
            ComposeError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ComposeError::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ComposeError::ExperimentNotFound(_) | ComposeError::ProofNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::OK,
        };

        match &error {
            ComposeError::Internal(e) => error!("Internal failure on {}: {:#}", self.route, e),
            _ => info!("{} on {}: {}", error.code(), self.route, error),
        }

        // Policy refusals are a successful answer that carries a refusal.
        if let ComposeError::SupBlock { decision } | ComposeError::ProofGateFail { decision } = &error {
            let envelope = Envelope {
                ok: true,
                result: Some(json!({
                    "error": error.code(),
                    "sup": decision,
                    "fallback": fallback,
                })),
                ..Default::default()
            };
            let mut response = (status, Json(envelope)).into_response();
            set_sup_headers(response.headers_mut(), decision);
            return response;
        }

        let reasons = error.reasons();
        let envelope = Envelope {
            ok: false,
            error: Some(error.code().to_string()),
            reasons: (!reasons.is_empty()).then_some(reasons),
            fallback: Some(fallback),
            ..Default::default()
        };
        let mut response = (status, Json(envelope)).into_response();
        if let ComposeError::QuotaExceeded { retry_after_secs, .. } = error {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}

/// Unwraps a JSON body, mapping an oversized body to 413 and anything else
/// unreadable to `invalid_request`.
fn body<T>(payload: Result<Json<T>, JsonRejection>, route: &str) -> Result<T, ApiError> {
    match payload {
        Ok(Json(value)) => Ok(value),
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            Err(ApiError::at(route)(ComposeError::BodyTooLarge))
        }
        Err(rejection) => Err(ApiError::at(route)(ComposeError::InvalidRequest(rejection.body_text()))),
    }
}

// --- Middleware ---

fn set_rate_headers(headers: &mut HeaderMap, limit: u32, remaining: u32) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
}

async fn enforce_quota(State(state): State<AppState>, request: Request, next: Next) -> Response {
    match state.quota.check(request.headers()) {
        QuotaDecision::Bypass => next.run(request).await,
        QuotaDecision::Allow {
            limit,
            remaining,
            backoff,
        } => {
            if let Some(delay) = backoff {
                tokio::time::sleep(delay).await;
            }
            let mut response = next.run(request).await;
            set_rate_headers(response.headers_mut(), limit, remaining);
            response
        }
        QuotaDecision::Deny {
            limit,
            retry_after_secs,
        } => {
            let route = request.uri().path().to_string();
            warn!("Quota denied {} (retry in {}s)", route, retry_after_secs);
            let mut response = ApiError::at(&route)(ComposeError::QuotaExceeded {
                limit,
                retry_after_secs,
            })
            .into_response();
            set_rate_headers(response.headers_mut(), limit, 0);
            response
        }
    }
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!("Handler panicked: {}", detail);
    (StatusCode::OK, Json(json!({ "ok": false, "error": "unexpected" }))).into_response()
}

// --- Router ---

pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    let metered = Router::new()
        .route(ROUTE_RESOLVE, post(compose_resolve))
        .route(ROUTE_MUTATE, post(compose_mutate))
        .route(ROUTE_CHIP, post(compose_chip))
        .route("/experiments", post(create_experiment))
        .route(ROUTE_PROMOTE, post(promote_experiment))
        .route_layer(middleware::from_fn_with_state(state.clone(), enforce_quota));

    Router::new()
        // not quota-checked
        .route("/experiments/{id}/events", post(record_events))
        .route("/experiments/{id}/status", get(experiment_status))
        .route("/experiments/{id}", delete(delete_experiment))
        .route("/proof/{page_id}", get(get_proof))
        .merge(metered)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(state: AppState, addr: &str, max_body_bytes: usize) -> anyhow::Result<()> {
    let runner = state.composer.runner().clone();
    let app = router(state, max_body_bytes);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    runner.shutdown();
    info!("Server stopped");
    Ok(())
}

// --- Handlers ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolveRequest {
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    breadth: Option<String>,
}

async fn compose_resolve(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ResolveRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let req = body(payload, ROUTE_RESOLVE)?;
    let ctx = state.context(&headers);
    let resolution = state
        .composer
        .resolve(&req.prompt, &req.session_id, req.breadth.as_deref(), &ctx)
        .await
        .map_err(ApiError::at(ROUTE_RESOLVE))?;

    let decision = resolution.composition.sup.clone();
    let envelope = Envelope {
        spec: Some(resolution.composition.spec.clone()),
        chips: Some(resolution.chips.clone()),
        no_js: Some(resolution.composition.no_js),
        ..ok_result(&resolution)?
    };
    let mut response = Json(envelope).into_response();
    set_sup_headers(response.headers_mut(), &decision);
    Ok(response)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MutateRequest {
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    patch: Option<Patch>,
    #[serde(default)]
    winner: Option<Patch>,
}

async fn compose_mutate(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<MutateRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let req = body(payload, ROUTE_MUTATE)?;
    let patch = req.patch.or(req.winner).ok_or_else(|| {
        ApiError::at(ROUTE_MUTATE)(ComposeError::InvalidRequest(
            "patch or winner is required".to_string(),
        ))
    })?;
    let ctx = state.context(&headers);
    let composition = state
        .composer
        .mutate(&req.session_id, &patch, &ctx)
        .map_err(ApiError::at(ROUTE_MUTATE))?;
    composition_response(composition)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChipRequest {
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    chip: String,
}

async fn compose_chip(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ChipRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let req = body(payload, ROUTE_CHIP)?;
    let ctx = state.context(&headers);
    let composition = state
        .composer
        .apply_chip(&req.session_id, &req.chip, &ctx)
        .map_err(ApiError::at(ROUTE_CHIP))?;
    composition_response(composition)
}

fn composition_response(composition: crate::orchestrator::Composition) -> Result<Response, ApiError> {
    let envelope = Envelope {
        spec: Some(composition.spec.clone()),
        no_js: Some(composition.no_js),
        ..ok_result(&composition)?
    };
    let mut response = Json(envelope).into_response();
    set_sup_headers(response.headers_mut(), &composition.sup);
    Ok(response)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateExperimentRequest {
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    variant_a: Variant,
    #[serde(default)]
    variant_b: Variant,
    #[serde(default)]
    config: ExperimentConfig,
}

async fn create_experiment(
    State(state): State<AppState>,
    payload: Result<Json<CreateExperimentRequest>, JsonRejection>,
) -> Result<Json<Envelope>, ApiError> {
    let route = "/experiments";
    let req = body(payload, route)?;
    let experiment = state
        .composer
        .create_experiment(&req.session_id, req.variant_a, req.variant_b, req.config)
        .map_err(ApiError::at(route))?;
    Ok(Json(ok_result(experiment)?))
}

#[derive(Deserialize)]
struct EventRequest {
    arm: Arm,
    #[serde(default)]
    views: u64,
    #[serde(default)]
    conversions: u64,
}

async fn record_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<EventRequest>, JsonRejection>,
) -> Result<Json<Envelope>, ApiError> {
    let route = format!("/experiments/{}/events", id);
    let req = body(payload, &route)?;
    let experiment = state
        .composer
        .record_event(&id, req.arm, req.views, req.conversions)
        .map_err(ApiError::at(&route))?;
    Ok(Json(ok_result(experiment)?))
}

async fn experiment_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope>, ApiError> {
    let route = format!("/experiments/{}/status", id);
    let status = state
        .composer
        .experiment_status(&id)
        .map_err(ApiError::at(&route))?;
    Ok(Json(ok_result(status)?))
}

async fn delete_experiment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Envelope>, ApiError> {
    let route = format!("/experiments/{}", id);
    let removed = state
        .composer
        .delete_experiment(&id)
        .map_err(ApiError::at(&route))?;
    Ok(Json(ok_result(json!({ "id": removed.id, "deleted": true }))?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromoteRequest {
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    experiment_id: String,
}

async fn promote_experiment(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<PromoteRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let req = body(payload, ROUTE_PROMOTE)?;
    let ctx = state.context(&headers);
    let composition = state
        .composer
        .promote(&req.session_id, &req.experiment_id, &ctx)
        .map_err(ApiError::at(ROUTE_PROMOTE))?;
    composition_response(composition)
}

async fn get_proof(
    State(state): State<AppState>,
    Path(page_id): Path<String>,
) -> Result<Json<Envelope>, ApiError> {
    let route = format!("/proof/{}", page_id);
    let lookup = state
        .composer
        .proof(&page_id)
        .ok_or_else(|| ApiError::at(&route)(ComposeError::ProofNotFound(page_id.clone())))?;
    Ok(Json(ok_result(lookup)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn json_of(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_quota_error_sets_retry_after() {
        let response = ApiError::at("/compose/resolve")(ComposeError::QuotaExceeded {
            limit: 60,
            retry_after_secs: 42,
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
        let v = json_of(response).await;
        assert_eq!(v["ok"], false);
        assert_eq!(v["error"], "quota_exceeded");
        assert_eq!(v["fallback"]["ctaHref"], "/compose/resolve");
    }

    #[tokio::test]
    async fn test_contracts_failure_is_200_with_reasons() {
        let response = ApiError::at("/compose/mutate")(ComposeError::ContractsFailed {
            reasons: vec!["safety:script_in_copy:HERO_SUB".into()],
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let v = json_of(response).await;
        assert_eq!(v["error"], "contracts_failed");
        assert_eq!(v["reasons"][0], "safety:script_in_copy:HERO_SUB");
        assert_eq!(v["fallback"]["code"], "contracts_failed.generic");
    }

    #[tokio::test]
    async fn test_panic_handler_envelope() {
        let response = handle_panic(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::OK);
        let v = json_of(response).await;
        assert_eq!(v, json!({ "ok": false, "error": "unexpected" }));
    }
}
