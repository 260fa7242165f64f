//! # Shield Demo Server
//!
//! Small user directory API guarded field-by-field by the shield.
//!
//! ## Endpoints
//!
//! - `POST /graphql` - Execute a query or mutation
//! - `GET /health` - Health check
//! - `GET /metrics` - Prometheus metrics (separate port)
//!
//! ## Request format
//!
//! ```json
//! { "operation": "query", "fields": [{ "name": "me", "selection": ["id", "email"] }] }
//! ```
//!
//! The `user-id` header identifies the caller.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `PORT` - HTTP server port (default: 4000)
//! - `METRICS_PORT` - Metrics server port (default: 9090)
//! - `RUST_LOG` - Log level (default: info)
//! - `SHIELD_CONFIG` - Optional TOML file with shield settings
//! - `SHIELD_DEBUG` - Expose rule fault causes in errors
//! - `RULE_TIMEOUT_MS` - Per-rule evaluation timeout

use anyhow::Context as _;
use async_trait::async_trait;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    serve, Router,
};
use cretoai_shield::{
    and, input_rule, resolver_fn, rule, Arguments, CacheMode, EvaluationContext, ExistenceLookup,
    FieldError, FieldFailure, FieldInfo, FieldInput, FieldSpec, PermissionMap, Resolver, RuleError,
    Schema, Shield, ShieldConfig,
};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

// ============================================================================
// Data
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum Role {
    User,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct User {
    id: String,
    name: String,
    email: String,
    role: Role,
}

/// In-memory user directory shared by rules and resolvers
#[derive(Debug, Default)]
struct UserStore {
    users: RwLock<Vec<User>>,
}

impl UserStore {
    fn new(users: Vec<User>) -> Self {
        Self {
            users: RwLock::new(users),
        }
    }

    fn seeded() -> Self {
        let user = |id: &str, name: &str, role, email: &str| User {
            id: id.to_string(),
            name: name.to_string(),
            email: email.to_string(),
            role,
        };

        Self::new(vec![
            user("1", "Jamie", Role::User, "jamie@graphql.wtf"),
            user("2", "Michael", Role::Admin, "michael@example.org"),
            user("3", "Daniel", Role::User, "daniel@example.org"),
        ])
    }

    fn all(&self) -> Vec<User> {
        self.users.read().clone()
    }

    fn find(&self, id: &str) -> Option<User> {
        self.users.read().iter().find(|u| u.id == id).cloned()
    }

    fn email_exists(&self, email: &str) -> bool {
        self.users.read().iter().any(|u| u.email == email)
    }

    /// Add a user unless the email is taken; checked under the write lock
    fn insert(&self, user: User) -> bool {
        let mut users = self.users.write();
        if users.iter().any(|u| u.email == user.email) {
            return false;
        }
        users.push(user);
        true
    }
}

#[async_trait]
impl ExistenceLookup for UserStore {
    async fn exists(&self, _path: &str, value: &Value) -> Result<bool, RuleError> {
        Ok(value.as_str().map(|email| self.email_exists(email)).unwrap_or(false))
    }
}

// ============================================================================
// Schema, rules and resolvers
// ============================================================================

const USER_FIELDS: [&str; 4] = ["id", "name", "email", "role"];

const EMAIL_TAKEN: &str = "A user exists with this email. Choose another.";

fn schema() -> Schema {
    Schema::new()
        .with_type("Query", ["me", "users"])
        .with_type("Mutation", ["createUser"])
        .with_type("User", USER_FIELDS)
}

fn permissions(store: Arc<UserStore>) -> cretoai_shield::Result<PermissionMap> {
    let is_authenticated = rule("isAuthenticated")
        .cache(CacheMode::Contextual)
        .check(|input| async move { Ok(input.context.header("user-id").is_some()) });

    let admins = store.clone();
    let is_admin = rule("isAdmin")
        .cache(CacheMode::Contextual)
        .check(move |input| {
            let store = admins.clone();
            async move {
                let role = input
                    .context
                    .header("user-id")
                    .and_then(|id| store.find(id))
                    .map(|user| user.role);
                Ok(role == Some(Role::Admin))
            }
        });

    let is_not_already_registered = input_rule("isNotAlreadyRegistered")
        .cache(CacheMode::NoCache)
        .field("input.name", FieldSpec::string().required())
        .field(
            "input.email",
            FieldSpec::string().required().email().unique(store, EMAIL_TAKEN),
        )
        .build()?;

    PermissionMap::builder()
        .bind("Query", "users", and([is_authenticated.clone(), is_admin]))
        .bind("Query", "me", is_authenticated)
        .bind("Mutation", "createUser", is_not_already_registered)
        .build(&schema())
}

fn to_value(user: impl Serialize) -> anyhow::Result<Value> {
    serde_json::to_value(user).context("failed to serialize user")
}

/// Root resolvers, keyed by operation type and field
struct Resolvers {
    users: Box<dyn Resolver>,
    me: Box<dyn Resolver>,
    create_user: Box<dyn Resolver>,
    property: Box<dyn Resolver>,
}

impl Resolvers {
    fn new(store: Arc<UserStore>) -> Self {
        let all = store.clone();
        let users = resolver_fn(move |_input| {
            let store = all.clone();
            async move { to_value(store.all()) }
        });

        let directory = store.clone();
        let me = resolver_fn(move |input: FieldInput| {
            let store = directory.clone();
            async move {
                match input.context.header("user-id").and_then(|id| store.find(id)) {
                    Some(user) => to_value(user),
                    None => Ok(Value::Null),
                }
            }
        });

        let create_user = resolver_fn(move |input: FieldInput| {
            let store = store.clone();
            async move {
                let fields = input
                    .argument("input")
                    .and_then(Value::as_object)
                    .context("createUser requires an input object")?;
                let text = |name: &str| {
                    fields
                        .get(name)
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .with_context(|| format!("input.{} must be a string", name))
                };

                let user = User {
                    id: Uuid::new_v4().to_string(),
                    name: text("name")?,
                    email: text("email")?,
                    role: Role::User,
                };
                if !store.insert(user.clone()) {
                    anyhow::bail!(EMAIL_TAKEN);
                }
                info!("Created user {}", user.id);
                to_value(user)
            }
        });

        let property = resolver_fn(|input: FieldInput| async move {
            Ok(input
                .parent
                .get(input.field.field_name())
                .cloned()
                .unwrap_or(Value::Null))
        });

        Self {
            users: Box::new(users),
            me: Box::new(me),
            create_user: Box::new(create_user),
            property: Box::new(property),
        }
    }

    fn root(&self, operation: Operation, field: &str) -> Option<&dyn Resolver> {
        match (operation, field) {
            (Operation::Query, "users") => Some(self.users.as_ref()),
            (Operation::Query, "me") => Some(self.me.as_ref()),
            (Operation::Mutation, "createUser") => Some(self.create_user.as_ref()),
            _ => None,
        }
    }
}

// ============================================================================
// Execution
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Operation {
    Query,
    Mutation,
}

impl Operation {
    fn type_name(&self) -> &'static str {
        match self {
            Operation::Query => "Query",
            Operation::Mutation => "Mutation",
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    operation: Operation,
    fields: Vec<FieldRequest>,
}

#[derive(Debug, Clone, Deserialize)]
struct FieldRequest {
    name: String,
    #[serde(default)]
    arguments: Arguments,
    /// User fields to return; all of them when absent
    #[serde(default)]
    selection: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ResponseError {
    Field(FieldError),
    Execution { message: String, path: Vec<String> },
}

#[derive(Debug, Default, Serialize)]
struct ExecuteResponse {
    data: Map<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<ResponseError>,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    shield: Arc<Shield>,
    resolvers: Arc<Resolvers>,
    start_time: std::time::Instant,
}

impl AppState {
    fn new(shield: Shield, store: Arc<UserStore>) -> Self {
        Self {
            shield: Arc::new(shield),
            resolvers: Arc::new(Resolvers::new(store)),
            start_time: std::time::Instant::now(),
        }
    }
}

fn request_context(state: &AppState, headers: &HeaderMap) -> EvaluationContext {
    let mut builder = state.shield.context().headers(
        headers
            .iter()
            .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?.to_string()))),
    );

    if let Some(id) = headers.get("x-request-id").and_then(|v| v.to_str().ok()) {
        builder = builder.request_id(id);
    }

    builder.build()
}

/// Resolve every requested root field; queries run concurrently, mutations
/// in order
async fn execute(state: &AppState, ctx: &EvaluationContext, request: ExecuteRequest) -> ExecuteResponse {
    let operation = request.operation;

    let results = match operation {
        Operation::Query => {
            join_all(
                request
                    .fields
                    .iter()
                    .map(|field| resolve_root(state, ctx, operation, field)),
            )
            .await
        }
        Operation::Mutation => {
            let mut results = Vec::with_capacity(request.fields.len());
            for field in &request.fields {
                results.push(resolve_root(state, ctx, operation, field).await);
            }
            results
        }
    };

    let mut response = ExecuteResponse::default();
    for (field, (value, errors)) in request.fields.iter().zip(results) {
        response.data.insert(field.name.clone(), value);
        response.errors.extend(errors);
    }
    response
}

async fn resolve_root(
    state: &AppState,
    ctx: &EvaluationContext,
    operation: Operation,
    field: &FieldRequest,
) -> (Value, Vec<ResponseError>) {
    let path = vec![field.name.clone()];

    let Some(resolver) = state.resolvers.root(operation, &field.name) else {
        let message = format!(
            "Cannot query field \"{}\" on type \"{}\"",
            field.name,
            operation.type_name()
        );
        return (Value::Null, vec![ResponseError::Execution { message, path }]);
    };

    let info = FieldInfo::new(operation.type_name(), &field.name).with_path(path.clone());
    let value = match state
        .shield
        .resolve_field(resolver, Value::Null, field.arguments.clone(), ctx, info)
        .await
    {
        Ok(value) => value,
        Err(failure) => return (Value::Null, vec![failure_to_error(failure, path)]),
    };

    let selection = field.selection.as_deref();
    match value {
        Value::Array(users) => {
            let mut errors = Vec::new();
            let mut items = Vec::with_capacity(users.len());
            for (index, user) in users.into_iter().enumerate() {
                let mut item_path = path.clone();
                item_path.push(index.to_string());
                let (item, item_errors) = resolve_user(state, ctx, user, selection, item_path).await;
                items.push(item);
                errors.extend(item_errors);
            }
            (Value::Array(items), errors)
        }
        Value::Object(_) => resolve_user(state, ctx, value, selection, path).await,
        other => (other, Vec::new()),
    }
}

/// Pass each selected user field through the shield
async fn resolve_user(
    state: &AppState,
    ctx: &EvaluationContext,
    user: Value,
    selection: Option<&[String]>,
    path: Vec<String>,
) -> (Value, Vec<ResponseError>) {
    let names: Vec<&str> = match selection {
        Some(names) => names.iter().map(String::as_str).collect(),
        None => USER_FIELDS.to_vec(),
    };

    let results = join_all(names.iter().map(|name| {
        let mut field_path = path.clone();
        field_path.push(name.to_string());
        let info = FieldInfo::new("User", *name).with_path(field_path);
        state.shield.resolve_field(
            state.resolvers.property.as_ref(),
            user.clone(),
            Arguments::new(),
            ctx,
            info,
        )
    }))
    .await;

    let mut object = Map::new();
    let mut errors = Vec::new();
    for (name, result) in names.iter().zip(results) {
        let mut field_path = path.clone();
        field_path.push(name.to_string());

        let value = match result {
            Ok(value) => value,
            Err(failure) => {
                errors.push(failure_to_error(failure, field_path));
                Value::Null
            }
        };
        object.insert(name.to_string(), value);
    }

    (Value::Object(object), errors)
}

fn failure_to_error(failure: FieldFailure, path: Vec<String>) -> ResponseError {
    match failure {
        FieldFailure::Unauthorized(error) => ResponseError::Field(error),
        FieldFailure::Resolver(err) => ResponseError::Execution {
            message: format!("{:#}", err),
            path,
        },
    }
}

// ============================================================================
// HTTP
// ============================================================================

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    uptime_seconds: u64,
    version: String,
}

struct MetricsResponse {
    metrics: String,
}

impl IntoResponse for MetricsResponse {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            self.metrics,
        )
            .into_response()
    }
}

/// POST /graphql - Execute an operation
async fn graphql(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ExecuteRequest>,
) -> Json<ExecuteResponse> {
    let ctx = request_context(&state, &headers);
    info!(
        "Executing {:?} with {} field(s) (request {})",
        request.operation,
        request.fields.len(),
        ctx.request_id()
    );

    Json(execute(&state, &ctx, request).await)
}

/// GET /health - Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        version: cretoai_shield::VERSION.to_string(),
    })
}

/// GET /metrics - Prometheus metrics endpoint
async fn metrics(State(state): State<AppState>) -> Response {
    let uptime = state.start_time.elapsed().as_secs();

    let Some(collector) = state.shield.metrics_collector() else {
        let body = Json(ErrorResponse {
            error: "metrics_disabled".to_string(),
            message: "metrics are disabled in the shield configuration".to_string(),
        });
        return (StatusCode::NOT_FOUND, body).into_response();
    };

    let metrics = format!(
        "# HELP shield_uptime_seconds Server uptime in seconds\n\
         # TYPE shield_uptime_seconds gauge\n\
         shield_uptime_seconds {}\n\
         \n\
         {}",
        uptime,
        collector.export_prometheus()
    );

    MetricsResponse { metrics }.into_response()
}

fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace = TraceLayer::new_for_http().on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/graphql", post(graphql))
        .route("/health", get(health_check))
        .layer(ServiceBuilder::new().layer(trace).layer(cors))
        .with_state(state)
}

fn create_metrics_router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }

    info!("Starting graceful shutdown");
}

fn load_config() -> anyhow::Result<ShieldConfig> {
    match std::env::var("SHIELD_CONFIG") {
        Ok(path) => ShieldConfig::load(&path).with_context(|| format!("loading {}", path)),
        Err(_) => Ok(ShieldConfig::from_env()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting CretoAI Shield demo server v{}", cretoai_shield::VERSION);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(4000);

    let metrics_port: u16 = std::env::var("METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9090);

    let config = load_config()?;

    info!("Configuration:");
    info!("  Port: {}", port);
    info!("  Metrics Port: {}", metrics_port);
    info!("  Debug: {}", config.debug);
    info!("  Rule Timeout: {:?}", config.rule_timeout());

    let store = Arc::new(UserStore::seeded());
    let permissions = permissions(store.clone()).context("invalid permission map")?;
    let state = AppState::new(Shield::new(permissions, config), store);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], metrics_port));

    info!("Starting HTTP server on {}", addr);
    info!("Starting metrics server on {}", metrics_addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind HTTP server to {}", addr))?;
    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics server to {}", metrics_addr))?;

    let server = serve(listener, create_router(state.clone()).into_make_service())
        .with_graceful_shutdown(shutdown_signal());
    let metrics_server = serve(metrics_listener, create_metrics_router(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal());

    tokio::try_join!(
        async {
            server.await.map_err(|e| {
                error!("HTTP server error: {}", e);
                e
            })
        },
        async {
            metrics_server.await.map_err(|e| {
                error!("Metrics server error: {}", e);
                e
            })
        }
    )?;

    info!("Servers shut down gracefully");
    Ok(())
}
