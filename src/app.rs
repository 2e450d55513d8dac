use axum::{
    Form, Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Local;
use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::aggregate::{DepartmentProgress, StatusCounts};
use crate::config::{BIND_ADDR, Config};
use crate::controller::{Dashboard, DirectiveForm, Mode};
use crate::directive::DirectiveId;
use crate::downloader::{self, DEFAULT_LABEL, PLACEHOLDER};
use crate::error::DashboardError;
use crate::gateway::Gateway;
use crate::graph::{self, GraphOptions};
use crate::status::Status;
use crate::supabase::SupabaseGateway;

/// Cookie carrying the browser session id
pub const SESSION_COOKIE: &str = "session";

const XLSX_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const LOGIN_FAILED: &str = "로그인 실패: 이메일 또는 비밀번호를 확인하세요.";
const SIGNUP_SUCCEEDED: &str = "가입 성공! 이메일 인증이 필요할 수 있습니다.";
const WRITE_FAILED: &str = "저장에 실패했습니다. 잠시 후 다시 시도하세요.";
const MISSING_FIELDS: &str = "지시사항과 담당부서를 입력하세요.";
const UNKNOWN_ROW: &str = "지시사항을 찾을 수 없습니다. 목록을 새로고침하세요.";

/// Colour for rows whose stored status is unreadable (#94a3b8)
const UNKNOWN_STATUS_COLOR: &str = "#94a3b8";

/// Browser sessions unused for this long are dropped
pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

type SharedSession<G> = Arc<Mutex<BrowserSession<G>>>;

struct SessionEntry<G: Gateway> {
    session: SharedSession<G>,
    last_seen: Instant,
}

/// One browser's dashboard plus a notice for its next page view
pub struct BrowserSession<G: Gateway> {
    dashboard: Dashboard<G>,
    notice: Option<String>,
}

impl<G: Gateway> BrowserSession<G> {
    fn new(gateway: G) -> Self {
        Self {
            dashboard: Dashboard::new(gateway),
            notice: None,
        }
    }

    /// Keep a failed operation's message for the next render
    fn note(&mut self, result: Result<(), DashboardError>) {
        if let Err(e) = result {
            self.notice = Some(notice_for(&e));
        }
    }
}

fn notice_for(error: &DashboardError) -> String {
    match error {
        DashboardError::Write(_) => WRITE_FAILED.to_string(),
        DashboardError::MissingField(_) => MISSING_FIELDS.to_string(),
        DashboardError::UnknownDirective(_) => UNKNOWN_ROW.to_string(),
        other => other.to_string(),
    }
}

/// Shared application state
///
/// Each browser gets its own gateway (and so its own backend session) from
/// `make_gateway` when it signs in. Sessions idle for longer than
/// `idle_timeout` are swept whenever a new one is stored.
pub struct AppState<G: Gateway> {
    make_gateway: Box<dyn Fn() -> G + Send + Sync>,
    sessions: RwLock<HashMap<String, SessionEntry<G>>>,
    idle_timeout: Duration,
    templates: Handlebars<'static>,
}

impl<G: Gateway> AppState<G> {
    pub fn new(
        make_gateway: impl Fn() -> G + Send + Sync + 'static,
    ) -> Result<Self, handlebars::TemplateError> {
        let mut templates = Handlebars::new();
        templates.register_template_string("login", include_str!("./templates/login.hbs"))?;
        templates.register_template_string("dashboard", include_str!("./templates/dashboard.hbs"))?;

        Ok(Self {
            make_gateway: Box::new(make_gateway),
            sessions: RwLock::new(HashMap::new()),
            idle_timeout: SESSION_IDLE_TIMEOUT,
            templates,
        })
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Number of browser sessions currently held
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    fn open(&self) -> SharedSession<G> {
        Arc::new(Mutex::new(BrowserSession::new((self.make_gateway)())))
    }

    /// The browser's session, touched so it stays alive; an idle one is dropped
    async fn lookup(&self, jar: &CookieJar) -> Option<SharedSession<G>> {
        let id = jar.get(SESSION_COOKIE)?.value();
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(id)?;
        if entry.last_seen.elapsed() > self.idle_timeout {
            sessions.remove(id);
            log::debug!("expired browser session {}", id);
            return None;
        }
        entry.last_seen = Instant::now();
        Some(entry.session.clone())
    }

    /// The browser's session if it is still signed in; a lapsed one is dropped
    async fn signed_in(&self, jar: &CookieJar) -> Option<SharedSession<G>> {
        let shared = self.lookup(jar).await?;
        let authenticated = {
            let mut session = shared.lock().await;
            session.dashboard.sync_session().await;
            session.dashboard.is_authenticated()
        };
        if authenticated {
            Some(shared)
        } else {
            self.forget(jar).await;
            None
        }
    }

    async fn remember(&self, jar: CookieJar, session: SharedSession<G>) -> CookieJar {
        let id = Uuid::new_v4().to_string();
        {
            let mut sessions = self.sessions.write().await;
            let before = sessions.len();
            sessions.retain(|_, entry| entry.last_seen.elapsed() <= self.idle_timeout);
            if sessions.len() < before {
                log::debug!("expired {} idle browser sessions", before - sessions.len());
            }
            sessions.insert(
                id.clone(),
                SessionEntry {
                    session,
                    last_seen: Instant::now(),
                },
            );
        }
        log::debug!("opened browser session {}", id);
        jar.add(
            Cookie::build((SESSION_COOKIE, id))
                .path("/")
                .http_only(true)
                .same_site(SameSite::Lax),
        )
    }

    async fn forget(&self, jar: &CookieJar) {
        if let Some(cookie) = jar.get(SESSION_COOKIE) {
            if self.sessions.write().await.remove(cookie.value()).is_some() {
                log::debug!("closed browser session {}", cookie.value());
            }
        }
    }

    fn render<T: Serialize>(&self, name: &str, data: &T) -> Response {
        match self.templates.render(name, data) {
            Ok(html) => Html(html).into_response(),
            Err(e) => {
                log::warn!("failed to render {}: {}", name, e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
            }
        }
    }
}

/// Build the application router
pub fn create_router<G: Gateway>(state: Arc<AppState<G>>) -> Router {
    Router::new()
        .route("/", get(serve_dashboard::<G>))
        .route("/login", get(serve_login::<G>).post(handle_login::<G>))
        .route("/signup", post(handle_signup::<G>))
        .route("/logout", post(handle_logout::<G>))
        .route("/create/open", post(open_create::<G>))
        .route("/create/cancel", post(cancel_create::<G>))
        .route("/create", post(submit_create::<G>))
        .route("/directives/:id/edit", post(begin_edit::<G>))
        .route("/directives/:id/save", post(save_edit::<G>))
        .route("/directives/:id/delete", post(delete_directive::<G>))
        .route("/editing/cancel", post(cancel_edit::<G>))
        .route("/export.xlsx", get(export_xlsx::<G>))
        .route("/export.csv", get(export_csv::<G>))
        .route("/charts/departments.svg", get(department_chart::<G>))
        .route("/charts/status.svg", get(status_chart::<G>))
        .route("/api/directives", get(api_directives::<G>))
        .route("/api/summary", get(api_summary::<G>))
        .with_state(state)
}

/// Serve the dashboard against the hosted backend until the process stops
pub async fn run(config: Config) -> Result<(), Box<dyn Error>> {
    let state = Arc::new(AppState::new(move || SupabaseGateway::new(&config))?);
    let app = create_router(state);

    let listener = TcpListener::bind(BIND_ADDR).await?;
    log::info!("listening on http://{}", BIND_ADDR);
    axum::serve(listener, app).await?;

    Ok(())
}

fn to_login() -> Response {
    Redirect::to("/login").into_response()
}

fn to_dashboard() -> Response {
    Redirect::to("/").into_response()
}

#[derive(Debug, Default, Serialize)]
struct LoginView {
    signup: bool,
    message: Option<String>,
    success: bool,
    email: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    mode: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Credentials {
    email: String,
    password: String,
}

/// Fields of the create and edit forms, progress as typed
#[derive(Debug, Deserialize)]
pub struct DirectiveFields {
    #[serde(default)]
    task: String,
    #[serde(default)]
    dept: String,
    #[serde(default)]
    progress: String,
}

impl DirectiveFields {
    fn into_form(self) -> DirectiveForm {
        let mut form = DirectiveForm::new(self.task, self.dept, 0);
        form.set_progress_input(&self.progress);
        form
    }
}

#[derive(Debug, Serialize)]
struct CardView {
    label: &'static str,
    count: usize,
    color: &'static str,
}

#[derive(Debug, Serialize)]
struct FormView {
    task: String,
    dept: String,
    progress: i64,
    status: &'static str,
    color: &'static str,
}

impl From<&DirectiveForm> for FormView {
    fn from(form: &DirectiveForm) -> Self {
        let status = form.status();
        Self {
            task: form.task.clone(),
            dept: form.dept.clone(),
            progress: form.progress(),
            status: status.label(),
            color: status.color(),
        }
    }
}

#[derive(Debug, Serialize)]
struct RowView {
    id: String,
    serial_no: String,
    task: String,
    dept: String,
    progress: i64,
    status: String,
    color: &'static str,
    edit: Option<FormView>,
}

#[derive(Debug, Serialize)]
struct DashboardView {
    email: String,
    notice: Option<String>,
    cards: Vec<CardView>,
    rows: Vec<RowView>,
    creating: Option<FormView>,
}

impl DashboardView {
    fn new<G: Gateway>(dashboard: &Dashboard<G>, notice: Option<String>) -> Self {
        let counts = dashboard.status_counts();
        let cards = Status::ALL
            .iter()
            .map(|status| CardView {
                label: status.label(),
                count: counts.get(*status),
                color: status.color(),
            })
            .collect();

        let editing = match dashboard.mode() {
            Mode::Editing { id, form } => Some((id, form)),
            _ => None,
        };
        let rows = dashboard
            .records()
            .iter()
            .map(|record| RowView {
                id: record.id.to_string(),
                serial_no: record
                    .serial_no
                    .clone()
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| PLACEHOLDER.to_string()),
                task: record.task.clone(),
                dept: record.dept.clone(),
                progress: record.progress_or_zero(),
                status: record
                    .status
                    .map(|s| s.label().to_string())
                    .unwrap_or_else(|| PLACEHOLDER.to_string()),
                color: record
                    .status
                    .map(|s| s.color())
                    .unwrap_or(UNKNOWN_STATUS_COLOR),
                edit: editing
                    .filter(|(id, _)| **id == record.id)
                    .map(|(_, form)| FormView::from(form)),
            })
            .collect();

        let creating = match dashboard.mode() {
            Mode::Creating(form) => Some(FormView::from(form)),
            _ => None,
        };

        Self {
            email: dashboard
                .user()
                .and_then(|user| user.email.clone())
                .unwrap_or_default(),
            notice,
            cards,
            rows,
            creating,
        }
    }
}

/// Serve the login page
///
/// `?mode=signup` shows the sign-up form instead. A browser that is already
/// signed in goes straight to the dashboard.
async fn serve_login<G: Gateway>(
    State(state): State<Arc<AppState<G>>>,
    jar: CookieJar,
    Query(query): Query<LoginQuery>,
) -> Response {
    if state.signed_in(&jar).await.is_some() {
        return to_dashboard();
    }
    let view = LoginView {
        signup: query.mode.as_deref() == Some("signup"),
        ..LoginView::default()
    };
    state.render("login", &view)
}

/// Handle sign-in requests
///
/// # Arguments
/// * `jar` - Cookie jar receiving the session cookie
/// * `credentials` - Form data containing the email and password
///
/// # Returns
/// * `Response` - Redirect to the dashboard, or the login page with an error
async fn handle_login<G: Gateway>(
    State(state): State<Arc<AppState<G>>>,
    jar: CookieJar,
    Form(credentials): Form<Credentials>,
) -> Response {
    let existing = state.lookup(&jar).await;
    let shared = existing.clone().unwrap_or_else(|| state.open());
    let result = shared
        .lock()
        .await
        .dashboard
        .sign_in(&credentials.email, &credentials.password)
        .await;

    match result {
        Ok(()) => {
            let jar = match existing {
                Some(_) => jar,
                None => state.remember(jar, shared).await,
            };
            (jar, Redirect::to("/")).into_response()
        }
        Err(_) => {
            let view = LoginView {
                message: Some(LOGIN_FAILED.to_string()),
                email: credentials.email,
                ..LoginView::default()
            };
            (StatusCode::UNAUTHORIZED, state.render("login", &view)).into_response()
        }
    }
}

/// Handle sign-up requests
///
/// A backend that signs new accounts straight in lands the browser on the
/// dashboard; otherwise the login page reports the outcome.
async fn handle_signup<G: Gateway>(
    State(state): State<Arc<AppState<G>>>,
    jar: CookieJar,
    Form(credentials): Form<Credentials>,
) -> Response {
    let existing = state.lookup(&jar).await;
    let shared = existing.clone().unwrap_or_else(|| state.open());
    let (result, authenticated) = {
        let mut session = shared.lock().await;
        let result = session
            .dashboard
            .sign_up(&credentials.email, &credentials.password)
            .await;
        (result, session.dashboard.is_authenticated())
    };

    match result {
        Ok(()) if authenticated => {
            let jar = match existing {
                Some(_) => jar,
                None => state.remember(jar, shared).await,
            };
            (jar, Redirect::to("/")).into_response()
        }
        Ok(()) => {
            let view = LoginView {
                message: Some(SIGNUP_SUCCEEDED.to_string()),
                success: true,
                email: credentials.email,
                ..LoginView::default()
            };
            state.render("login", &view)
        }
        Err(e) => {
            let reason = match e {
                DashboardError::Auth(auth) => auth.message,
                other => other.to_string(),
            };
            let view = LoginView {
                signup: true,
                message: Some(format!("회원가입 실패: {}", reason)),
                email: credentials.email,
                ..LoginView::default()
            };
            (StatusCode::BAD_REQUEST, state.render("login", &view)).into_response()
        }
    }
}

/// Sign out, drop the browser session and clear its cookie
async fn handle_logout<G: Gateway>(
    State(state): State<Arc<AppState<G>>>,
    jar: CookieJar,
) -> (CookieJar, Redirect) {
    if let Some(shared) = state.lookup(&jar).await {
        shared.lock().await.dashboard.sign_out().await;
    }
    state.forget(&jar).await;
    (
        jar.remove(Cookie::build(SESSION_COOKIE).path("/")),
        Redirect::to("/login"),
    )
}

async fn serve_dashboard<G: Gateway>(
    State(state): State<Arc<AppState<G>>>,
    jar: CookieJar,
) -> Response {
    let Some(shared) = state.signed_in(&jar).await else {
        return to_login();
    };
    let mut session = shared.lock().await;
    let notice = session.notice.take();
    let view = DashboardView::new(&session.dashboard, notice);
    state.render("dashboard", &view)
}

async fn open_create<G: Gateway>(
    State(state): State<Arc<AppState<G>>>,
    jar: CookieJar,
) -> Response {
    let Some(shared) = state.signed_in(&jar).await else {
        return to_login();
    };
    let mut session = shared.lock().await;
    let result = session.dashboard.open_create();
    session.note(result);
    to_dashboard()
}

async fn cancel_create<G: Gateway>(
    State(state): State<Arc<AppState<G>>>,
    jar: CookieJar,
) -> Response {
    let Some(shared) = state.signed_in(&jar).await else {
        return to_login();
    };
    shared.lock().await.dashboard.cancel_create();
    to_dashboard()
}

/// Submit the create form; the form opens implicitly for direct posts
async fn submit_create<G: Gateway>(
    State(state): State<Arc<AppState<G>>>,
    jar: CookieJar,
    Form(fields): Form<DirectiveFields>,
) -> Response {
    let Some(shared) = state.signed_in(&jar).await else {
        return to_login();
    };
    let mut session = shared.lock().await;
    let dashboard = &mut session.dashboard;
    let result = async {
        if !matches!(dashboard.mode(), Mode::Creating(_)) {
            dashboard.open_create()?;
        }
        dashboard.update_create_form(fields.into_form())?;
        dashboard.submit_create().await
    }
    .await;
    session.note(result);
    to_dashboard()
}

async fn begin_edit<G: Gateway>(
    State(state): State<Arc<AppState<G>>>,
    jar: CookieJar,
    Path(id): Path<String>,
) -> Response {
    let Some(shared) = state.signed_in(&jar).await else {
        return to_login();
    };
    let mut session = shared.lock().await;
    let result = session.dashboard.begin_edit(&DirectiveId::new(id));
    session.note(result);
    to_dashboard()
}

async fn save_edit<G: Gateway>(
    State(state): State<Arc<AppState<G>>>,
    jar: CookieJar,
    Path(id): Path<String>,
    Form(fields): Form<DirectiveFields>,
) -> Response {
    let Some(shared) = state.signed_in(&jar).await else {
        return to_login();
    };
    let id = DirectiveId::new(id);
    let mut session = shared.lock().await;
    let dashboard = &mut session.dashboard;
    let result = async {
        let editing_this = matches!(dashboard.mode(), Mode::Editing { id: editing, .. } if *editing == id);
        if !editing_this {
            dashboard.begin_edit(&id)?;
        }
        dashboard.update_edit_form(fields.into_form())?;
        dashboard.save_edit().await
    }
    .await;
    session.note(result);
    to_dashboard()
}

async fn cancel_edit<G: Gateway>(
    State(state): State<Arc<AppState<G>>>,
    jar: CookieJar,
) -> Response {
    let Some(shared) = state.signed_in(&jar).await else {
        return to_login();
    };
    shared.lock().await.dashboard.cancel_edit();
    to_dashboard()
}

async fn delete_directive<G: Gateway>(
    State(state): State<Arc<AppState<G>>>,
    jar: CookieJar,
    Path(id): Path<String>,
) -> Response {
    let Some(shared) = state.signed_in(&jar).await else {
        return to_login();
    };
    let mut session = shared.lock().await;
    let result = session.dashboard.delete(&DirectiveId::new(id)).await;
    session.note(result);
    to_dashboard()
}

/// Download response with an RFC 5987 encoded file name
fn attachment(body: Vec<u8>, content_type: &str, file_name: &str) -> Response {
    let disposition = format!(
        "attachment; filename*=UTF-8''{}",
        urlencoding::encode(file_name)
    );
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response()
}

fn generation_failed(what: &str, error: Box<dyn Error + Send + Sync>) -> Response {
    log::warn!("{} generation failed: {}", what, error);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Failed to generate {}", what),
    )
        .into_response()
}

/// Download the held records as an XLSX workbook
async fn export_xlsx<G: Gateway>(
    State(state): State<Arc<AppState<G>>>,
    jar: CookieJar,
) -> Response {
    let Some(shared) = state.signed_in(&jar).await else {
        return to_login();
    };
    let session = shared.lock().await;
    let file_name = downloader::export_file_name(DEFAULT_LABEL, Local::now().date_naive());
    match session.dashboard.export_xlsx() {
        Ok(bytes) => {
            log::info!("exported {} directives to {}", session.dashboard.records().len(), file_name);
            attachment(bytes, XLSX_TYPE, &file_name)
        }
        Err(e) => generation_failed("workbook", e),
    }
}

/// Download the held records as CSV, with a BOM so spreadsheet apps pick UTF-8
async fn export_csv<G: Gateway>(
    State(state): State<Arc<AppState<G>>>,
    jar: CookieJar,
) -> Response {
    let Some(shared) = state.signed_in(&jar).await else {
        return to_login();
    };
    let session = shared.lock().await;
    let file_name = downloader::csv_file_name(DEFAULT_LABEL, Local::now().date_naive());
    let mut body = String::from('\u{feff}');
    body.push_str(&downloader::to_csv(&session.dashboard.export_rows()));
    attachment(body.into_bytes(), "text/csv; charset=utf-8", &file_name)
}

fn svg(result: Result<String, Box<dyn Error + Send + Sync>>) -> Response {
    match result {
        Ok(svg) => ([(header::CONTENT_TYPE, "image/svg+xml")], svg).into_response(),
        Err(e) => generation_failed("chart", e),
    }
}

async fn department_chart<G: Gateway>(
    State(state): State<Arc<AppState<G>>>,
    jar: CookieJar,
) -> Response {
    let Some(shared) = state.signed_in(&jar).await else {
        return to_login();
    };
    let data = shared.lock().await.dashboard.department_progress();
    svg(graph::department_chart(&data, &GraphOptions::default()))
}

async fn status_chart<G: Gateway>(
    State(state): State<Arc<AppState<G>>>,
    jar: CookieJar,
) -> Response {
    let Some(shared) = state.signed_in(&jar).await else {
        return to_login();
    };
    let counts = shared.lock().await.dashboard.status_counts();
    svg(graph::status_chart(&counts, &GraphOptions::donut()))
}

async fn api_directives<G: Gateway>(
    State(state): State<Arc<AppState<G>>>,
    jar: CookieJar,
) -> Response {
    let Some(shared) = state.signed_in(&jar).await else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let session = shared.lock().await;
    Json(session.dashboard.records()).into_response()
}

#[derive(Debug, Serialize)]
struct Summary {
    total: usize,
    counts: StatusCounts,
    departments: Vec<DepartmentProgress>,
}

async fn api_summary<G: Gateway>(
    State(state): State<Arc<AppState<G>>>,
    jar: CookieJar,
) -> Response {
    let Some(shared) = state.signed_in(&jar).await else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let session = shared.lock().await;
    Json(Summary {
        total: session.dashboard.records().len(),
        counts: session.dashboard.status_counts(),
        departments: session.dashboard.department_progress(),
    })
    .into_response()
}
