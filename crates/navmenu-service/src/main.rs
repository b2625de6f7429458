use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use navmenu_api::{
    load_route_table, AddItemRequest, NavMenuApi, PageRender, RenderPageRequest, RenderRequest,
    RenderedMenu, API_CONTRACT_VERSION,
};
use navmenu_core::{Menu, MenuItem, RouteTable};
use serde::{Deserialize, Serialize};

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Debug, Clone)]
struct ServiceState {
    api: NavMenuApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Deserialize)]
struct MigrateRequest {
    dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Parser)]
#[command(name = "navmenu-service")]
#[command(about = "Local HTTP render service for NavMenu")]
struct Args {
    #[arg(long, default_value = "./navmenu.sqlite3")]
    db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
    /// Route table JSON file (array of {name, pattern} entries).
    #[arg(long)]
    routes: Option<PathBuf>,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = StatusCode::BAD_REQUEST;
        (status, Json(self)).into_response()
    }
}

impl ServiceState {
    fn error(message: impl Into<String>) -> ServiceError {
        ServiceError { service_contract_version: SERVICE_CONTRACT_VERSION, error: message.into() }
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/db/schema-version", post(db_schema_version))
        .route("/v1/db/migrate", post(db_migrate))
        .route("/v1/menu", post(menu_upsert))
        .route("/v1/menus", get(menu_list))
        .route("/v1/menu/item", post(menu_item_add))
        .route("/v1/render", post(render_menu))
        .route("/v1/render/page", post(render_page))
        .with_state(state)
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let routes = match args.routes.as_ref() {
        Some(path) => load_route_table(path)?,
        None => RouteTable::new(),
    };
    let state = ServiceState { api: NavMenuApi::new(args.db, routes) };

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, "navmenu service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn db_schema_version(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<navmenu_store_sqlite::SchemaStatus>>, ServiceError> {
    let status = state.api.schema_status().map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(status)))
}

async fn db_migrate(
    State(state): State<ServiceState>,
    Json(request): Json<MigrateRequest>,
) -> Result<Json<ServiceEnvelope<navmenu_api::MigrateResult>>, ServiceError> {
    let result =
        state.api.migrate(request.dry_run).map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(result)))
}

async fn menu_upsert(
    State(state): State<ServiceState>,
    Json(request): Json<Menu>,
) -> Result<Json<ServiceEnvelope<Menu>>, ServiceError> {
    let menu =
        state.api.menu_upsert(request).map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(menu)))
}

async fn menu_list(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<Vec<Menu>>>, ServiceError> {
    let menus = state.api.menu_list().map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(menus)))
}

async fn menu_item_add(
    State(state): State<ServiceState>,
    Json(request): Json<AddItemRequest>,
) -> Result<Json<ServiceEnvelope<MenuItem>>, ServiceError> {
    let item = state.api.item_add(request).map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(item)))
}

async fn render_menu(
    State(state): State<ServiceState>,
    Json(request): Json<RenderRequest>,
) -> Result<Json<ServiceEnvelope<RenderedMenu>>, ServiceError> {
    let rendered =
        state.api.render(request).map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(rendered)))
}

async fn render_page(
    State(state): State<ServiceState>,
    Json(request): Json<RenderPageRequest>,
) -> Result<Json<ServiceEnvelope<PageRender>>, ServiceError> {
    let page =
        state.api.render_page(request).map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(page)))
}
