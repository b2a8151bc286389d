//! HTTP routes and handlers

use crate::auth::AuthenticatedStudent;
use crate::error::TilawaError;
use crate::query::{PageView, SearchResults};
use crate::quran::{Reciter, Surah, SurahSummary};
use crate::state::AppState;
use crate::store::{
    Memorized, NewNote, NewPayment, NewRecitationError, NewStudent, NewStudySession, Payment,
    ProgressStore, ProgressUpdate, RecitationError, StudentAccount, StudentNote, StudentProgress,
    StudySession, VerseRef,
};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const MAX_BODY_BYTES: usize = 64 * 1024;

type ApiResult<T> = Result<Json<T>, TilawaError>;

// === Request/Response types ===

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    surahs: usize,
    backend: &'static str,
}

#[derive(Deserialize)]
struct SearchParams {
    q: Option<String>,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct AudioResponse {
    url: String,
}

#[derive(Deserialize)]
struct LoginRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Serialize)]
struct AuthResponse {
    student: StudentAccount,
    token: String,
}

#[derive(Deserialize)]
struct NotesParams {
    surah: Option<u16>,
}

// === Helpers ===

/// Run a store operation on the blocking pool
async fn with_store<T, F>(state: &Arc<AppState>, f: F) -> Result<T, TilawaError>
where
    T: Send + 'static,
    F: FnOnce(&dyn ProgressStore) -> Result<T, TilawaError> + Send + 'static,
{
    let store = Arc::clone(&state.store);
    tokio::task::spawn_blocking(move || f(store.as_ref())).await?
}

/// Body extraction failures are reported like any other validation error
fn payload<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, TilawaError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| TilawaError::Validation(vec![rejection.body_text()]))
}

/// Path numbers that do not parse are treated as unknown resources
fn path_number(raw: &str, what: &str) -> Result<u16, TilawaError> {
    raw.trim()
        .parse()
        .map_err(|_| TilawaError::NotFound(format!("{} {}", what, raw)))
}

// === Quran handlers ===

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let surahs = state.query.corpus().surahs().len();
    Json(HealthResponse {
        status: if surahs > 0 { "ok" } else { "degraded" },
        surahs,
        backend: state.store.backend(),
    })
}

async fn list_surahs(State(state): State<Arc<AppState>>) -> Json<Vec<SurahSummary>> {
    Json(state.query.surah_summaries())
}

async fn get_surah(State(state): State<Arc<AppState>>, Path(raw): Path<String>) -> ApiResult<Surah> {
    let number = path_number(&raw, "surah")?;
    state
        .query
        .surah(number)
        .cloned()
        .map(Json)
        .ok_or_else(|| TilawaError::NotFound(format!("surah {}", number)))
}

async fn get_page(State(state): State<Arc<AppState>>, Path(raw): Path<String>) -> ApiResult<PageView> {
    let number = path_number(&raw, "page")?;
    state
        .query
        .page(number)
        .map(|view| Json((*view).clone()))
        .ok_or_else(|| TilawaError::NotFound(format!("page {}", number)))
}

async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> ApiResult<SearchResults> {
    let q = params.q.unwrap_or_default();
    state.query.search(&q, params.limit).map(Json)
}

async fn reciters(State(state): State<Arc<AppState>>) -> Json<Vec<Reciter>> {
    Json(state.query.reciters().to_vec())
}

async fn reciter_audio(
    State(state): State<Arc<AppState>>,
    Path((id, raw_surah)): Path<(String, String)>,
) -> ApiResult<AudioResponse> {
    let reciter = state
        .query
        .reciter(&id)
        .ok_or_else(|| TilawaError::NotFound(format!("reciter {}", id)))?;
    let surah = path_number(&raw_surah, "surah")?;
    if state.query.surah(surah).is_none() {
        return Err(TilawaError::NotFound(format!("surah {}", surah)));
    }
    Ok(Json(AudioResponse {
        url: reciter.surah_audio_url(surah),
    }))
}

// === Auth handlers ===

async fn register(
    State(state): State<Arc<AppState>>,
    body: Result<Json<NewStudent>, JsonRejection>,
) -> Result<(StatusCode, Json<AuthResponse>), TilawaError> {
    let new = payload(body)?;
    new.validate()?;

    let student = with_store(&state, move |store| store.create_student(&new)).await?;
    let token = state.sessions.issue(student.id)?;
    info!(student_id = student.id, "Student registered");

    Ok((StatusCode::CREATED, Json(AuthResponse { student, token })))
}

async fn login(
    State(state): State<Arc<AppState>>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<AuthResponse> {
    let req = payload(body)?;

    let mut problems = Vec::new();
    if req.email.trim().is_empty() {
        problems.push("email is required".to_string());
    }
    if req.password.is_empty() {
        problems.push("password is required".to_string());
    }
    if !problems.is_empty() {
        return Err(TilawaError::Validation(problems));
    }

    state.login_throttle.check(&req.email)?;

    let email = req.email.clone();
    let student = with_store(&state, move |store| store.authenticate(&req.email, &req.password))
        .await?
        .ok_or_else(|| {
            warn!(email = %email, "Failed login attempt");
            TilawaError::Unauthorized
        })?;

    let token = state.sessions.issue(student.id)?;
    Ok(Json(AuthResponse { student, token }))
}

async fn logout(State(state): State<Arc<AppState>>, auth: AuthenticatedStudent) -> Result<StatusCode, TilawaError> {
    state.sessions.revoke(&auth.token)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn me(State(state): State<Arc<AppState>>, auth: AuthenticatedStudent) -> ApiResult<StudentAccount> {
    with_store(&state, move |store| store.find_student(auth.student_id))
        .await?
        .map(Json)
        .ok_or(TilawaError::Unauthorized)
}

// === Student handlers ===

async fn get_progress(State(state): State<Arc<AppState>>, auth: AuthenticatedStudent) -> ApiResult<StudentProgress> {
    with_store(&state, move |store| store.get_progress(auth.student_id))
        .await
        .map(Json)
}

async fn update_progress(
    State(state): State<Arc<AppState>>,
    auth: AuthenticatedStudent,
    body: Result<Json<ProgressUpdate>, JsonRejection>,
) -> ApiResult<StudentProgress> {
    let update = payload(body)?;
    update.validate()?;
    with_store(&state, move |store| store.update_progress(auth.student_id, &update))
        .await
        .map(Json)
}

async fn toggle_bookmark(
    State(state): State<Arc<AppState>>,
    auth: AuthenticatedStudent,
    body: Result<Json<VerseRef>, JsonRejection>,
) -> ApiResult<StudentProgress> {
    let verse = payload(body)?;
    ProgressUpdate {
        bookmarked_verses: Some(vec![verse]),
        ..Default::default()
    }
    .validate()?;
    with_store(&state, move |store| store.toggle_bookmark(auth.student_id, verse))
        .await
        .map(Json)
}

async fn list_notes(
    State(state): State<Arc<AppState>>,
    auth: AuthenticatedStudent,
    Query(params): Query<NotesParams>,
) -> ApiResult<Vec<StudentNote>> {
    with_store(&state, move |store| store.list_notes(auth.student_id, params.surah))
        .await
        .map(Json)
}

async fn add_note(
    State(state): State<Arc<AppState>>,
    auth: AuthenticatedStudent,
    body: Result<Json<NewNote>, JsonRejection>,
) -> Result<(StatusCode, Json<StudentNote>), TilawaError> {
    let note = payload(body)?;
    note.validate()?;
    let stored = with_store(&state, move |store| store.add_note(auth.student_id, &note)).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn memorized(State(state): State<Arc<AppState>>, auth: AuthenticatedStudent) -> ApiResult<Memorized> {
    with_store(&state, move |store| store.memorized(auth.student_id))
        .await
        .map(Json)
}

async fn list_errors(State(state): State<Arc<AppState>>, auth: AuthenticatedStudent) -> ApiResult<Vec<RecitationError>> {
    with_store(&state, move |store| store.list_errors(auth.student_id))
        .await
        .map(Json)
}

async fn add_error(
    State(state): State<Arc<AppState>>,
    auth: AuthenticatedStudent,
    body: Result<Json<NewRecitationError>, JsonRejection>,
) -> Result<(StatusCode, Json<RecitationError>), TilawaError> {
    let error = payload(body)?;
    error.validate()?;
    let stored = with_store(&state, move |store| store.add_error(auth.student_id, &error)).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn list_sessions(State(state): State<Arc<AppState>>, auth: AuthenticatedStudent) -> ApiResult<Vec<StudySession>> {
    with_store(&state, move |store| store.list_sessions(auth.student_id))
        .await
        .map(Json)
}

async fn add_session(
    State(state): State<Arc<AppState>>,
    auth: AuthenticatedStudent,
    body: Result<Json<NewStudySession>, JsonRejection>,
) -> Result<(StatusCode, Json<StudySession>), TilawaError> {
    let session = payload(body)?;
    session.validate()?;
    let stored = with_store(&state, move |store| store.add_session(auth.student_id, &session)).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn list_payments(State(state): State<Arc<AppState>>, auth: AuthenticatedStudent) -> ApiResult<Vec<Payment>> {
    with_store(&state, move |store| store.list_payments(auth.student_id))
        .await
        .map(Json)
}

async fn add_payment(
    State(state): State<Arc<AppState>>,
    auth: AuthenticatedStudent,
    body: Result<Json<NewPayment>, JsonRejection>,
) -> Result<(StatusCode, Json<Payment>), TilawaError> {
    let payment = payload(body)?;
    payment.validate()?;
    let stored = with_store(&state, move |store| store.add_payment(auth.student_id, &payment)).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let allow_origin = match origin.map(HeaderValue::from_str) {
        Some(Ok(value)) => AllowOrigin::exact(value),
        Some(Err(e)) => {
            warn!("Invalid TILAWA_CORS_ORIGIN ({}), allowing any origin", e);
            AllowOrigin::from(Any)
        }
        None => AllowOrigin::from(Any),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(state.config.cors_origin.as_deref());

    Router::new()
        .route("/health", get(health))
        .route("/api/quran/surahs", get(list_surahs))
        .route("/api/quran/surah/:n", get(get_surah))
        .route("/api/quran/page/:n", get(get_page))
        .route("/api/quran/search", get(search))
        .route("/api/quran/reciters", get(reciters))
        .route("/api/quran/reciters/:id/audio/:surah", get(reciter_audio))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
        .route("/api/student/progress", get(get_progress).post(update_progress))
        .route("/api/student/bookmarks", post(toggle_bookmark))
        .route("/api/student/notes", get(list_notes).post(add_note))
        .route("/api/student/memorized", get(memorized))
        .route("/api/student/errors", get(list_errors).post(add_error))
        .route("/api/student/sessions", get(list_sessions).post(add_session))
        .route("/api/student/payments", get(list_payments).post(add_payment))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
