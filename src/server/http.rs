//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. Requests are read in
//! full, matched to a [`Route`], authenticated, then dispatched.

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::auth::{IdentityResolver, IdentityTokenValidator, RequestContext};
use crate::config::{Args, StoreBackend};
use crate::db::MongoClient;
use crate::routes::{
    companion, error_response, health_check, leaderboard, not_found_response,
    path_segment, submissions, tasks, users, version_info, ApiRequest, FullBody,
};
use crate::services::{
    CompanionMatchmaker, LeaderboardRanker, LogNotifier, MentorNotifier, RewardLedger,
    SubmissionDesk, TaskCatalog, UserDirectory, VerificationWorkflow, WebhookNotifier,
};
use crate::store::{ImpactStore, MemoryStore, MongoImpactStore};
use crate::types::{ImpactError, Result};

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub store: Arc<dyn ImpactStore>,
    pub identity: IdentityResolver,
    pub verification: VerificationWorkflow,
    pub ledger: RewardLedger,
    pub matchmaker: CompanionMatchmaker,
    pub leaderboard: LeaderboardRanker,
    pub submissions: SubmissionDesk,
    pub catalog: TaskCatalog,
    pub users: UserDirectory,
    pub started_at: Instant,
}

impl AppState {
    /// Build state from configuration, connecting the configured store
    pub async fn from_args(args: Args) -> Result<Self> {
        let store: Arc<dyn ImpactStore> = match args.store_backend {
            StoreBackend::Memory => {
                warn!("Using in-memory store - data is lost on restart");
                Arc::new(MemoryStore::new())
            }
            StoreBackend::Mongo => {
                let client = MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await?;
                Arc::new(MongoImpactStore::new(client).await?)
            }
        };

        let notifier: Arc<dyn MentorNotifier> = match &args.mentor_webhook_url {
            Some(url) => {
                info!("Mentor requests will be posted to the configured webhook");
                Arc::new(WebhookNotifier::new(
                    url.clone(),
                    Duration::from_millis(args.mentor_webhook_timeout_ms),
                )?)
            }
            None => Arc::new(LogNotifier),
        };

        Self::with_store(args, store, notifier)
    }

    /// Build state around an existing store and notifier
    pub fn with_store(
        args: Args,
        store: Arc<dyn ImpactStore>,
        notifier: Arc<dyn MentorNotifier>,
    ) -> Result<Self> {
        let secret = args.identity_secret().ok_or_else(|| {
            ImpactError::Config("IDENTITY_JWT_SECRET is required in production mode".into())
        })?;
        let validator =
            IdentityTokenValidator::new(secret, args.identity_token_expiry_seconds)?;
        let retry = args.retry_policy();

        Ok(Self {
            identity: IdentityResolver::new(
                validator,
                Arc::clone(&store),
                retry.clone(),
                args.bootstrap_admin_list(),
            ),
            verification: VerificationWorkflow::new(Arc::clone(&store), retry.clone()),
            ledger: RewardLedger::new(Arc::clone(&store), retry.clone()),
            matchmaker: CompanionMatchmaker::new(Arc::clone(&store), notifier, retry.clone()),
            leaderboard: LeaderboardRanker::new(
                Arc::clone(&store),
                retry.clone(),
                args.leaderboard_max_limit,
                args.rank_depth_cap,
            ),
            submissions: SubmissionDesk::new(Arc::clone(&store), retry.clone()),
            catalog: TaskCatalog::new(Arc::clone(&store), retry.clone()),
            users: UserDirectory::new(Arc::clone(&store), retry),
            store,
            args,
            started_at: Instant::now(),
        })
    }
}

/// Run the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!("impact-core listening on {}", state.args.listen);

    if state.args.dev_mode {
        warn!("Development mode enabled - identity tokens use the built-in dev secret");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<FullBody>, Infallible> {
    let started = Instant::now();
    let (parts, body) = req.into_parts();

    let body = match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("[{}] request body rejected: {}", addr, e);
            return Ok(error_response(ImpactError::Validation(
                "Request body is too large or unreadable".into(),
            )));
        }
    };

    let request = ApiRequest {
        method: parts.method,
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        authorization: parts
            .headers
            .get(hyper::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string),
        body,
    };
    let method = request.method.clone();
    let path = request.path.clone();

    let response = route(&state, request).await;

    info!(
        "[{}] {} {} -> {} ({} ms)",
        addr,
        method,
        path,
        response.status().as_u16(),
        started.elapsed().as_millis()
    );
    Ok(response)
}

/// Known endpoints, with decoded path parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    ListTasks,
    CreateTask,
    GetTask(String),
    UpdateTask(String),
    DeleteTask(String),
    FindCompanion(String),
    ReleaseCompanion,
    CreateSubmission,
    PendingSubmissions,
    MySubmissions,
    GetSubmission(String),
    VerifySubmission(String),
    Leaderboard,
    UserRank(String),
    Me,
    UpdateProfile,
    SetRole(String),
    CorrectScore(String),
    LedgerAudit(String),
}

impl Route {
    pub fn parse(method: &Method, path: &str) -> Result<Option<Route>> {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

        let route = match (method, segments.as_slice()) {
            (&Method::GET, ["tasks"]) => Route::ListTasks,
            (&Method::POST, ["tasks"]) => Route::CreateTask,
            (&Method::GET, ["tasks", id]) => Route::GetTask(path_segment(id)?),
            (&Method::PUT, ["tasks", id]) => Route::UpdateTask(path_segment(id)?),
            (&Method::DELETE, ["tasks", id]) => Route::DeleteTask(path_segment(id)?),
            (&Method::POST, ["tasks", id, "companion"]) => Route::FindCompanion(path_segment(id)?),

            (&Method::POST, ["submissions"]) => Route::CreateSubmission,
            (&Method::GET, ["submissions", "pending"]) => Route::PendingSubmissions,
            (&Method::GET, ["submissions", "mine"]) => Route::MySubmissions,
            (&Method::GET, ["submissions", id]) => Route::GetSubmission(path_segment(id)?),
            (&Method::POST, ["submissions", id, "verify"]) => {
                Route::VerifySubmission(path_segment(id)?)
            }

            (&Method::GET, ["leaderboard"]) => Route::Leaderboard,

            (&Method::GET, ["users", "me"]) => Route::Me,
            (&Method::PUT, ["users", "me", "profile"]) => Route::UpdateProfile,
            (&Method::DELETE, ["users", "me", "companion"]) => Route::ReleaseCompanion,
            (&Method::GET, ["users", id, "rank"]) => Route::UserRank(path_segment(id)?),
            (&Method::PUT, ["users", id, "role"]) => Route::SetRole(path_segment(id)?),
            (&Method::POST, ["users", id, "corrections"]) => {
                Route::CorrectScore(path_segment(id)?)
            }
            (&Method::GET, ["users", id, "ledger"]) => Route::LedgerAudit(path_segment(id)?),

            _ => return Ok(None),
        };
        Ok(Some(route))
    }
}

/// Route a fully read request to its handler
pub async fn route(state: &Arc<AppState>, req: ApiRequest) -> Response<FullBody> {
    match (&req.method, req.path.as_str()) {
        (&Method::GET, "/health") => return health_check(state),
        (&Method::GET, "/version") => return version_info(),
        (&Method::OPTIONS, _) => return preflight_response(),
        _ => {}
    }

    let route = match Route::parse(&req.method, &req.path) {
        Ok(Some(route)) => route,
        Ok(None) => return not_found_response(&req.path),
        Err(e) => return error_response(e),
    };

    let ctx = match state.identity.resolve(req.authorization.as_deref()).await {
        Ok(ctx) => ctx,
        Err(e) => return error_response(e),
    };
    debug!(
        request_id = %ctx.request_id,
        principal = %ctx.principal.id,
        route = ?route,
        "Dispatching"
    );

    match dispatch(state, &ctx, route, &req).await {
        Ok(response) => response,
        Err(e) => {
            debug!(request_id = %ctx.request_id, error = %e, "Request failed");
            error_response(e)
        }
    }
}

async fn dispatch(
    state: &Arc<AppState>,
    ctx: &RequestContext,
    route: Route,
    req: &ApiRequest,
) -> Result<Response<FullBody>> {
    match route {
        Route::ListTasks => tasks::list(state).await,
        Route::CreateTask => tasks::create(state, ctx, req).await,
        Route::GetTask(id) => tasks::get(state, &id).await,
        Route::UpdateTask(id) => tasks::update(state, ctx, &id, req).await,
        Route::DeleteTask(id) => tasks::delete(state, ctx, &id).await,
        Route::FindCompanion(task_id) => companion::find(state, ctx, &task_id).await,
        Route::ReleaseCompanion => companion::release(state, ctx).await,
        Route::CreateSubmission => submissions::create(state, ctx, req).await,
        Route::PendingSubmissions => submissions::pending(state, ctx).await,
        Route::MySubmissions => submissions::mine(state, ctx).await,
        Route::GetSubmission(id) => submissions::get(state, ctx, &id).await,
        Route::VerifySubmission(id) => submissions::verify(state, ctx, &id, req).await,
        Route::Leaderboard => leaderboard::top(state, req).await,
        Route::UserRank(id) => leaderboard::rank(state, &id).await,
        Route::Me => users::me(state, ctx),
        Route::UpdateProfile => users::update_profile(state, ctx, req).await,
        Route::SetRole(id) => users::set_role(state, ctx, &id, req).await,
        Route::CorrectScore(id) => users::correct(state, ctx, &id, req).await,
        Route::LedgerAudit(id) => users::ledger(state, ctx, &id).await,
    }
}

/// CORS preflight response
fn preflight_response() -> Response<FullBody> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "Authorization, Content-Type")
        .header("Access-Control-Allow-Methods", "GET, POST, PUT, DELETE, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap()
}
