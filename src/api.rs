// 🌐 REST API with Axum
// JSON envelope {success, data, error}; admin capability from the x-admin-token header

use crate::arrivals::{ArrivalOutcome, ParticipantRef, Standing};
use crate::config::Config;
use crate::db::Registration;
use crate::desk::RegistrationDesk;
use crate::error::RegistryError;
use crate::ledger::{ListFilter, NewRegistration};
use crate::roster::{parse_processo, Participant};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::error;

pub const ADMIN_HEADER: &str = "x-admin-token";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub desk: Arc<RegistrationDesk>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(desk: RegistrationDesk, config: Config) -> Self {
        AppState {
            desk: Arc::new(desk),
            config: Arc::new(config),
        }
    }

    fn is_admin(&self, headers: &HeaderMap) -> bool {
        let presented = headers.get(ADMIN_HEADER).and_then(|v| v.to_str().ok());
        self.config.is_admin_token(presented)
    }
}

/// API Response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }
}

impl ApiResponse<()> {
    fn err(e: &RegistryError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(e.to_string()),
            code: Some(e.code()),
        }
    }
}

pub struct ApiError(RegistryError);

impl From<RegistryError> for ApiError {
    fn from(value: RegistryError) -> Self {
        ApiError(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RegistryError::Validation { .. } => StatusCode::BAD_REQUEST,
            RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::DuplicateRegistration(_) | RegistryError::AlreadyClassified { .. } => {
                StatusCode::CONFLICT
            }
            RegistryError::Forbidden(_) => StatusCode::FORBIDDEN,
            RegistryError::Storage(_) => {
                error!(error = %self.0, "storage failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(ApiResponse::err(&self.0))).into_response()
    }
}

/// Malformed JSON bodies are reported in the envelope like any other bad input
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(RegistryError::validation("body", rejection.body_text()))
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

// ============================================================================
// Request types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RegisterRequest {
    Manual(NewRegistration),
    Roster(RosterRequest),
}

/// Only a processo: the rest comes from the roster
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RosterRequest {
    pub processo: i64,
}

#[derive(Debug, Deserialize)]
pub struct TimeRequest {
    /// Processo or full name
    pub participante: String,
    pub tempo: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    q: String,
}

#[derive(Debug, Deserialize)]
pub struct ArrivalQuery {
    #[serde(default)]
    processo: String,
}

#[derive(Debug, Serialize)]
pub struct ArrivalResponse {
    processo: i64,
    #[serde(flatten)]
    outcome: ArrivalOutcome,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/roster?q= - Search the roster by name
async fn search_roster(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Vec<Participant>> {
    let hits: Vec<Participant> = state.desk.search(&query.q).into_iter().cloned().collect();
    Ok(Json(ApiResponse::ok(hits)))
}

/// GET /api/roster/:processo - Look up one student
async fn lookup_participant(
    State(state): State<AppState>,
    Path(processo): Path<String>,
) -> ApiResult<Participant> {
    let processo = parse_processo(&processo)?;
    Ok(Json(ApiResponse::ok(state.desk.lookup(processo)?.clone())))
}

/// GET /api/inscricoes - List registrations (filters: escalao, genero, nome)
async fn list_registrations(
    State(state): State<AppState>,
    Query(filter): Query<ListFilter>,
) -> ApiResult<Vec<Registration>> {
    Ok(Json(ApiResponse::ok(state.desk.list(&filter)?)))
}

/// POST /api/inscricoes - Register from the roster or manually
async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<Registration>>), ApiError> {
    let Json(request) = payload?;
    let reg = match request {
        RegisterRequest::Roster(RosterRequest { processo }) => state.desk.register(processo)?,
        RegisterRequest::Manual(new) => state.desk.register_manual(new)?,
    };
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(reg))))
}

/// DELETE /api/inscricoes - Clear the whole ledger (admin)
async fn clear_registrations(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<usize> {
    let admin = state.is_admin(&headers);
    Ok(Json(ApiResponse::ok(state.desk.clear_all(admin)?)))
}

/// GET /api/inscricoes/:processo
async fn get_registration(
    State(state): State<AppState>,
    Path(processo): Path<String>,
) -> ApiResult<Registration> {
    let processo = parse_processo(&processo)?;
    Ok(Json(ApiResponse::ok(state.desk.get(processo)?)))
}

/// DELETE /api/inscricoes/:processo (admin)
async fn delete_registration(
    State(state): State<AppState>,
    Path(processo): Path<String>,
    headers: HeaderMap,
) -> ApiResult<i64> {
    let processo = parse_processo(&processo)?;
    state.desk.delete(state.is_admin(&headers), processo)?;
    Ok(Json(ApiResponse::ok(processo)))
}

/// GET /api/escaloes - Categories present in the ledger
async fn list_categories(State(state): State<AppState>) -> ApiResult<Vec<String>> {
    Ok(Json(ApiResponse::ok(state.desk.categories()?)))
}

/// GET /api/classificacoes - Standings by finish position (admin)
async fn standings(
    State(state): State<AppState>,
    Query(filter): Query<ListFilter>,
    headers: HeaderMap,
) -> ApiResult<Vec<Standing>> {
    let admin = state.is_admin(&headers);
    Ok(Json(ApiResponse::ok(state.desk.standings(admin, &filter)?)))
}

/// POST /api/tempos - Record an elapsed time (admin)
async fn record_time(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<TimeRequest>, JsonRejection>,
) -> ApiResult<Registration> {
    let Json(request) = payload?;
    let who = ParticipantRef::parse(&request.participante)?;
    let admin = state.is_admin(&headers);
    Ok(Json(ApiResponse::ok(state.desk.record_time(admin, &who, &request.tempo)?)))
}

/// POST /api/chegadas/:processo - Record an arrival; a repeat is a conflict
async fn post_arrival(
    State(state): State<AppState>,
    Path(processo): Path<String>,
) -> ApiResult<ArrivalResponse> {
    let processo = parse_processo(&processo)?;
    let outcome = state.desk.record_arrival(processo)?;
    outcome.into_result(processo)?;
    Ok(Json(ApiResponse::ok(ArrivalResponse { processo, outcome })))
}

/// GET /chegada?processo= - Target of the dorsal QR URL; repeats report the existing position
async fn scan_arrival(
    State(state): State<AppState>,
    Query(query): Query<ArrivalQuery>,
) -> ApiResult<ArrivalResponse> {
    let processo = parse_processo(&query.processo)?;
    let outcome = state.desk.record_arrival(processo)?;
    Ok(Json(ApiResponse::ok(ArrivalResponse { processo, outcome })))
}

/// GET /api/dorsais/:processo - Dorsal image
async fn dorsal_image(
    State(state): State<AppState>,
    Path(processo): Path<String>,
) -> Result<Response, ApiError> {
    let processo = parse_processo(&processo)?;
    let bytes = state.desk.dorsal_image(processo)?;
    Ok(([(header::CONTENT_TYPE, "image/svg+xml")], bytes).into_response())
}

/// GET /api/export/inscricoes.csv - Full ledger dump
async fn export_csv(State(state): State<AppState>) -> Result<Response, ApiError> {
    let mut buf = Vec::new();
    state.desk.export_csv(&mut buf)?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"inscricoes.csv\""),
        ],
        buf,
    )
        .into_response())
}

/// GET /api/export/dorsais.zip - Archive of every dorsal image
async fn export_dorsais(State(state): State<AppState>) -> Result<Response, ApiError> {
    let bytes = state.desk.dorsal_archive()?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"dorsais.zip\""),
        ],
        bytes,
    )
        .into_response())
}

/// POST /api/import - Replace the ledger with a CSV dump (admin)
async fn import_csv(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<usize> {
    let admin = state.is_admin(&headers);
    Ok(Json(ApiResponse::ok(state.desk.import_csv(admin, body.as_bytes())?)))
}

// ============================================================================
// Router
// ============================================================================

pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/roster", get(search_roster))
        .route("/roster/:processo", get(lookup_participant))
        .route(
            "/inscricoes",
            get(list_registrations).post(register).delete(clear_registrations),
        )
        .route(
            "/inscricoes/:processo",
            get(get_registration).delete(delete_registration),
        )
        .route("/escaloes", get(list_categories))
        .route("/classificacoes", get(standings))
        .route("/tempos", post(record_time))
        .route("/chegadas/:processo", post(post_arrival))
        .route("/dorsais/:processo", get(dorsal_image))
        .route("/export/inscricoes.csv", get(export_csv))
        .route("/export/dorsais.zip", get(export_dorsais))
        .route("/import", post(import_csv))
        .with_state(state.clone());

    Router::new()
        .route("/chegada", get(scan_arrival))
        .with_state(state)
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use std::path::PathBuf;
    use tower::ServiceExt;

    const ROSTER: &str = "\
Processo,Nome,Género,Data de Nascimento,Idade,Turma
42,Ana Silva,Feminino,2016-06-01,9,4A
43,Bruno Costa,Masculino,2009-03-15,16,10B
";

    fn test_app() -> (tempfile::TempDir, Router) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("alunos.csv"), ROSTER).unwrap();
        let mut config = Config::with_data_dir(PathBuf::from(dir.path()));
        config.admin_token = Some("segredo".to_string());

        let desk = RegistrationDesk::open(&config).unwrap();
        (dir, build_router(AppState::new(desk, config)))
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_register_and_arrive_over_http() {
        let (_dir, app) = test_app();

        let (status, body) = send(&app, post_json("/api/inscricoes", serde_json::json!({"processo": 42}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["Escalão"], "Infantil A");

        let (status, body) = send(&app, post_json("/api/inscricoes", serde_json::json!({"processo": 42}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "duplicate_registration");

        let scan = || Request::builder().uri("/chegada?processo=42").body(Body::empty()).unwrap();
        let (status, body) = send(&app, scan()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "classified");
        assert_eq!(body["data"]["position"], 1);

        let (status, body) = send(&app, scan()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "already_classified");
        assert_eq!(body["data"]["position"], 1);

        let (status, body) = send(&app, post_json("/api/chegadas/42", serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "already_classified");
    }

    #[tokio::test]
    async fn test_manual_registration() {
        let (_dir, app) = test_app();

        let request = post_json(
            "/api/inscricoes",
            serde_json::json!({
                "processo": 900,
                "nome": "Visitante",
                "data_nascimento": "2009-03-15",
                "genero": "Masculino",
                "turma": "-"
            }),
        );
        let (status, body) = send(&app, request).await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["Escalão"], "Juvenil");

        let request = post_json(
            "/api/inscricoes",
            serde_json::json!({
                "processo": 901,
                "nome": "Visitante",
                "data_nascimento": "01/06/2016",
                "genero": "Feminino",
                "turma": "-"
            }),
        );
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["Data nascimento"], "2016-06-01");
        assert_eq!(body["data"]["Escalão"], "Infantil A");
    }

    #[tokio::test]
    async fn test_malformed_bodies_use_the_envelope() {
        let (_dir, app) = test_app();

        for body in [
            serde_json::json!({"processo": 902, "nome": "X", "data_nascimento": "ontem", "genero": "M", "turma": "-"}),
            serde_json::json!({"quem": "ninguém"}),
        ] {
            let (status, body) = send(&app, post_json("/api/inscricoes", body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["success"], false);
            assert_eq!(body["code"], "validation");
        }

        let request = Request::builder()
            .method("POST")
            .uri("/api/tempos")
            .header(header::CONTENT_TYPE, "application/json")
            .header(ADMIN_HEADER, "segredo")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation");
    }

    #[tokio::test]
    async fn test_admin_routes_require_token() {
        let (_dir, app) = test_app();
        send(&app, post_json("/api/inscricoes", serde_json::json!({"processo": 43}))).await;

        let delete = |token: Option<&str>| {
            let mut builder = Request::builder().method("DELETE").uri("/api/inscricoes/43");
            if let Some(token) = token {
                builder = builder.header(ADMIN_HEADER, token);
            }
            builder.body(Body::empty()).unwrap()
        };

        let (status, body) = send(&app, delete(None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["success"], false);

        let (status, _) = send(&app, delete(Some("errado"))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(&app, delete(Some("segredo"))).await;
        assert_eq!(status, StatusCode::OK);

        let get = Request::builder().uri("/api/inscricoes/43").body(Body::empty()).unwrap();
        let (status, _) = send(&app, get).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_record_time_and_bad_input() {
        let (_dir, app) = test_app();
        send(&app, post_json("/api/inscricoes", serde_json::json!({"processo": 43}))).await;

        let mut request = post_json(
            "/api/tempos",
            serde_json::json!({"participante": "Bruno Costa", "tempo": "12:45"}),
        );
        request.headers_mut().insert(ADMIN_HEADER, "segredo".parse().unwrap());
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["Tempo"], "00:12:45");

        let get = Request::builder().uri("/api/inscricoes/abc").body(Body::empty()).unwrap();
        let (status, body) = send(&app, get).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation");
    }

    #[tokio::test]
    async fn test_exports() {
        let (_dir, app) = test_app();
        send(&app, post_json("/api/inscricoes", serde_json::json!({"processo": 42}))).await;

        let request = Request::builder().uri("/api/export/inscricoes.csv").body(Body::empty()).unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("42,Ana Silva,2016-06-01"));

        let request = Request::builder().uri("/api/export/dorsais.zip").body(Body::empty()).unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/zip"
        );
    }
}
