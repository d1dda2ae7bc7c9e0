//! Gateway server.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Extension, Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

use toolbelt_core::Config;
use toolbelt_core::types::ClientKey;
use toolbelt_core::validation::{validate_model_name, validate_prompt};
use toolbelt_limiter::{FixedWindowLimiter, RateLimitConfig, RestStore};
use toolbelt_providers::{ProviderKind, ProviderRegistry};

use crate::GatewayError;
use crate::access::AccessPolicy;
use crate::credits::{CreditGate, DailyCredits, Unmetered};
use crate::dispatch::AiGateway;
use crate::error::{AiError, AiErrorCode};
use crate::middleware::{
    GeneralLimit, apply_rate_limit_headers, cors_layer, general_rate_limit, rate_limited_response,
};

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Port to listen on.
    pub port: u16,
    /// Bind address.
    pub bind_address: String,
    /// Enable CORS.
    pub cors: bool,
    /// Time allowed to produce response headers.
    pub request_timeout: Duration,
    /// Per-client limit on every `/api` route.
    pub general_limit: RateLimitConfig,
    /// Per-subject limit on `/api/ai`.
    pub ai_limit: RateLimitConfig,
    /// How often expired local windows are purged.
    pub sweep_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl GatewayConfig {
    /// Server settings from the application configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            port: config.gateway.port,
            bind_address: config.gateway.bind_address(),
            cors: config.gateway.cors,
            request_timeout: Duration::from_secs(config.gateway.timeout_secs),
            general_limit: config.limits.general.into(),
            ai_limit: config.limits.ai.into(),
            sweep_interval: Duration::from_secs(config.limits.sweep_interval_secs.max(1)),
        }
    }
}

/// Gateway server state shared across handlers.
pub struct GatewayState {
    /// Provider dispatch.
    pub ai: AiGateway,
    /// Counters for every rate-limit class.
    pub limiter: Arc<FixedWindowLimiter>,
    /// Bearer-token gate on AI routes.
    pub access: AccessPolicy,
    /// Credit accounting for AI routes.
    pub credits: Arc<dyn CreditGate>,
    /// Gateway configuration.
    pub config: GatewayConfig,
    /// Server start time.
    pub started_at: DateTime<Utc>,
}

/// Gateway server.
pub struct Gateway {
    config: GatewayConfig,
    state: Arc<GatewayState>,
}

/// Builder for constructing a Gateway with its dependencies.
pub struct GatewayBuilder {
    config: GatewayConfig,
    ai: Option<AiGateway>,
    limiter: Option<Arc<FixedWindowLimiter>>,
    access: AccessPolicy,
    credits: Option<Arc<dyn CreditGate>>,
}

impl GatewayBuilder {
    /// Create a new builder with default config.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: GatewayConfig::default(),
            ai: None,
            limiter: None,
            access: AccessPolicy::open(),
            credits: None,
        }
    }

    /// Set gateway configuration.
    #[must_use]
    pub fn with_config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the AI dispatcher.
    #[must_use]
    pub fn with_ai_gateway(mut self, ai: AiGateway) -> Self {
        self.ai = Some(ai);
        self
    }

    /// Set the rate limiter.
    #[must_use]
    pub fn with_limiter(mut self, limiter: Arc<FixedWindowLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Set the access policy.
    #[must_use]
    pub fn with_access_policy(mut self, access: AccessPolicy) -> Self {
        self.access = access;
        self
    }

    /// Set the credit gate.
    #[must_use]
    pub fn with_credit_gate(mut self, credits: Arc<dyn CreditGate>) -> Self {
        self.credits = Some(credits);
        self
    }

    /// Build the gateway.
    #[must_use]
    pub fn build(self) -> Gateway {
        let ai = self
            .ai
            .unwrap_or_else(|| AiGateway::new(ProviderRegistry::new()));
        if ai.registry().is_empty() {
            warn!("No AI providers configured; /api/ai will reject every request");
        }

        let state = GatewayState {
            ai,
            limiter: self.limiter.unwrap_or_default(),
            access: self.access,
            credits: self.credits.unwrap_or_else(|| Arc::new(Unmetered)),
            config: self.config.clone(),
            started_at: Utc::now(),
        };

        Gateway {
            config: self.config,
            state: Arc::new(state),
        }
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Gateway {
    /// Assemble a gateway from the application configuration.
    ///
    /// A counter store that cannot be set up is logged and limiting stays
    /// in-process.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid.
    pub fn from_app_config(config: &Config) -> Result<Self, GatewayError> {
        config
            .validate()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        let mut limiter = FixedWindowLimiter::default();
        if let Some(store) = &config.counter_store {
            match RestStore::from_config(store) {
                Ok(store) => limiter = limiter.with_primary(Arc::new(store)),
                Err(e) => warn!("Counter store disabled, limiting in-process: {}", e),
            }
        }
        let limiter = Arc::new(limiter);

        let credits: Arc<dyn CreditGate> = match config.limits.daily_credits {
            Some(per_day) => Arc::new(DailyCredits::new(limiter.clone(), per_day)),
            None => Arc::new(Unmetered),
        };

        let ai = AiGateway::from_config(&config.providers, config.gateway.base_url.as_deref());

        Ok(GatewayBuilder::new()
            .with_config(GatewayConfig::from_config(config))
            .with_ai_gateway(ai)
            .with_limiter(limiter)
            .with_access_policy(AccessPolicy::new(config.access.tokens.clone()))
            .with_credit_gate(credits)
            .build())
    }

    /// Shared state.
    #[must_use]
    pub fn state(&self) -> Arc<GatewayState> {
        self.state.clone()
    }

    /// HTTP router for this gateway.
    #[must_use]
    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Bind the configured address and serve until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns error if the address is invalid or cannot be bound.
    pub async fn run(&self) -> Result<(), GatewayError> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| GatewayError::Config(format!("Invalid address: {e}")))?;

        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns error if the server fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GatewayError> {
        info!(
            "Gateway listening on http://{} (providers: {:?}, limiter: {})",
            listener.local_addr()?,
            self.state.ai.registry().kinds(),
            self.state.limiter.store_name()
        );

        let sweeper = spawn_sweeper(self.state.limiter.clone(), self.config.sweep_interval);

        let result = axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        sweeper.abort();
        info!("Gateway stopped");
        result.map_err(|e| GatewayError::Server(e.to_string()))
    }
}

fn spawn_sweeper(limiter: Arc<FixedWindowLimiter>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            limiter.sweep();
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Build the HTTP router over `state`.
pub fn router(state: Arc<GatewayState>) -> Router {
    let general = GeneralLimit {
        limiter: state.limiter.clone(),
        config: state.config.general_limit,
    };

    let api = Router::new()
        .route("/providers", get(providers_handler))
        .route("/ai", post(ai_handler))
        .layer(axum::middleware::from_fn_with_state(
            general,
            general_rate_limit,
        ));

    let app = Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api)
        .layer(TimeoutLayer::new(state.config.request_timeout))
        .layer(TraceLayer::new_for_http());

    let app = if state.config.cors {
        app.layer(cors_layer())
    } else {
        app
    };

    app.with_state(state)
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    let usage = state.ai.usage();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "providers": state.ai.registry().kinds(),
        "limiter": state.limiter.store_name(),
        "uptimeSecs": (Utc::now() - state.started_at).num_seconds(),
        "usage": {
            "total": usage.total_usage(),
            "byProvider": usage.by_provider(),
        },
    }))
}

async fn providers_handler(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    let providers: Vec<Value> = state
        .ai
        .registry()
        .iter()
        .map(|(kind, provider)| {
            json!({
                "name": kind,
                "defaultModel": provider.default_model(),
                "streaming": provider.supports_streaming(),
            })
        })
        .collect();

    Json(json!({ "providers": providers }))
}

/// Body of `POST /api/ai`.
#[derive(Debug, Deserialize)]
struct AiRequestBody {
    prompt: String,
    provider: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    stream: bool,
}

async fn ai_handler(
    State(state): State<Arc<GatewayState>>,
    Extension(client): Extension<ClientKey>,
    headers: HeaderMap,
    body: Result<Json<AiRequestBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return AiError::validation(rejection.body_text()).into_response(),
    };

    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let subject = match state.access.authorize(authorization, &client) {
        Ok(subject) => subject,
        Err(e) => return e.into_response(),
    };

    let limit = state
        .limiter
        .check_rate_limit(&subject.scoped("ai"), &state.config.ai_limit)
        .await;
    if !limit.allowed {
        debug!(subject = %subject, "AI rate limit exceeded");
        return rate_limited_response(&limit, state.limiter.now_ms());
    }

    let stream = body.stream || accepts_event_stream(&headers);
    let mut response = match handle_ai(&state, &subject, body, stream).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    };
    apply_rate_limit_headers(response.headers_mut(), &limit);
    response
}

fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream"))
}

async fn handle_ai(
    state: &Arc<GatewayState>,
    subject: &ClientKey,
    body: AiRequestBody,
    stream: bool,
) -> Result<Response, AiError> {
    let provider: ProviderKind = body
        .provider
        .parse()
        .map_err(|e: toolbelt_providers::UnknownProvider| AiError::validation(e.to_string()))?;
    let prompt = validate_prompt(&body.prompt)?;
    if let Some(model) = &body.model {
        validate_model_name(model)?;
    }

    let decision = state.credits.check(subject).await;
    if !decision.allowed {
        return Err(AiError::new(
            AiErrorCode::CreditsExhausted,
            "AI credits used up, try again tomorrow",
        ));
    }

    if stream {
        return Ok(stream_reply(state.clone(), prompt, provider, body.model));
    }

    let reply = state
        .ai
        .call_ai(&prompt, provider, body.model.as_deref(), None)
        .await?;

    Ok(Json(json!({
        "text": reply.text,
        "provider": reply.provider,
        "model": reply.model,
    }))
    .into_response())
}

/// Aborts the upstream call once the SSE body is dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn stream_reply(
    state: Arc<GatewayState>,
    prompt: String,
    provider: ProviderKind,
    model: Option<String>,
) -> Response {
    let (tx, rx) = mpsc::unbounded_channel::<Event>();

    let task = tokio::spawn(async move {
        let deltas = tx.clone();
        let mut sent = 0;
        let mut on_chunk = |text: &str| {
            let delta = text.get(sent..).unwrap_or_default();
            sent = text.len();
            let _ = deltas.send(Event::default().data(json!({ "text": delta }).to_string()));
        };

        let result = state
            .ai
            .call_ai(&prompt, provider, model.as_deref(), Some(&mut on_chunk))
            .await;

        if let Err(e) = result {
            let frame = json!({ "error": e.message, "code": e.code });
            let _ = tx.send(Event::default().data(frame.to_string()));
        }
    });

    let events = stream::unfold((rx, AbortOnDrop(task)), |(mut rx, guard)| async move {
        rx.recv()
            .await
            .map(|event| (Ok::<_, Infallible>(event), (rx, guard)))
    });
    let done = stream::once(async { Ok(Event::default().data("[DONE]")) });

    Sse::new(events.chain(done))
        .keep_alive(KeepAlive::default())
        .into_response()
}
