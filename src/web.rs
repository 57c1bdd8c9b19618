use axum::{
    extract::{Query, State},
    http::{header, HeaderMap},
    response::{AppendHeaders, Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tera::Tera;
use log::{info, warn};

use crate::analytics;
use crate::app::App;
use crate::auth::{mailer, AuthError};
use crate::error::DeskError;
use crate::log_store::LogRecord;
use crate::pipeline;

pub const SESSION_COOKIE: &str = "smartdesk_session";
const RECENT_RECORDS: usize = 25;

pub struct WebState {
    pub app: Arc<App>,
    pub tera: Tera,
}

type SharedState = Arc<WebState>;

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub pin: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetForm {
    pub otp: String,
    pub pin: String,
}

pub fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, token)| token.to_string())
}

fn require_session(state: &WebState, headers: &HeaderMap) -> Result<(), DeskError> {
    match session_token(headers) {
        Some(token) if state.app.sessions.is_valid(&token) => Ok(()),
        _ => Err(DeskError::Unauthorized),
    }
}

fn render(tera: &Tera, template: &str, ctx: &tera::Context) -> Result<Html<String>, DeskError> {
    Ok(Html(tera.render(template, ctx)?))
}

fn render_error(tera: &Tera, error_message: &str) -> Html<String> {
    let mut ctx = tera::Context::new();
    ctx.insert("error_message", error_message);
    match tera.render("error.html", &ctx) {
        Ok(html) => Html(html),
        Err(e) => Html(format!("Error rendering error page: {}", e)),
    }
}

// Newest first
fn recent(records: &[LogRecord], n: usize) -> Vec<&LogRecord> {
    records.iter().rev().take(n).collect()
}

async fn login_page(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Html<String>, DeskError> {
    let mut ctx = tera::Context::new();
    ctx.insert("message", &params.get("message"));
    render(&state.tera, "login.html", &ctx)
}

async fn login_submit(State(state): State<SharedState>, Form(form): Form<LoginForm>) -> Result<Response, DeskError> {
    if !state.app.auth.verify_pin(form.pin.trim()).await? {
        warn!("Wrong PIN entered");
        let mut ctx = tera::Context::new();
        ctx.insert("error", "Wrong PIN!");
        return Ok(render(&state.tera, "login.html", &ctx)?.into_response());
    }

    let token = state.app.sessions.create();
    let cookie = format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}",
        SESSION_COOKIE, token, state.app.config.auth.session_ttl_secs
    );
    info!("-- dashboard unlocked");
    Ok((AppendHeaders([(header::SET_COOKIE, cookie)]), Redirect::to("/")).into_response())
}

async fn logout(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    if let Some(token) = session_token(&headers) {
        state.app.sessions.remove(&token);
    }
    let cookie = format!("{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0", SESSION_COOKIE);
    (AppendHeaders([(header::SET_COOKIE, cookie)]), Redirect::to("/login")).into_response()
}

fn reset_context(sent: bool, error: Option<&str>) -> tera::Context {
    let mut ctx = tera::Context::new();
    ctx.insert("sent", &sent);
    ctx.insert("error", &error);
    ctx
}

async fn reset_page(State(state): State<SharedState>) -> Result<Html<String>, DeskError> {
    render(&state.tera, "reset.html", &reset_context(false, None))
}

async fn reset_request(State(state): State<SharedState>) -> Result<Html<String>, DeskError> {
    let app = &state.app;
    let otp = app.auth.issue_otp().await?;
    mailer::send_otp(&app.config, &app.credentials, &otp).await?;
    let mut ctx = reset_context(true, None);
    ctx.insert("recipient", app.config.recovery_email());
    render(&state.tera, "reset.html", &ctx)
}

async fn reset_confirm(State(state): State<SharedState>, Form(form): Form<ResetForm>) -> Result<Response, DeskError> {
    match state.app.auth.reset_pin(&form.otp, form.pin.trim()).await {
        Ok(()) => {
            let location = format!("/login?message={}", urlencoding::encode("PIN updated, please log in"));
            Ok(Redirect::to(&location).into_response())
        }
        Err(AuthError::Store(e)) => Err(DeskError::Other(e)),
        Err(e) => {
            let message = e.to_string();
            Ok(render(&state.tera, "reset.html", &reset_context(true, Some(&message)))?.into_response())
        }
    }
}

async fn dashboard(State(state): State<SharedState>, headers: HeaderMap) -> Result<Html<String>, DeskError> {
    require_session(&state, &headers)?;
    let records = state.app.log.load().await?;

    let mut ctx = tera::Context::new();
    ctx.insert("summary", &analytics::summarize(&records));
    ctx.insert("records", &recent(&records, RECENT_RECORDS));
    ctx.insert("notifications", &state.app.notifier.is_enabled());
    ctx.insert("mailbox", &state.app.config.imap.mailbox);
    render(&state.tera, "dashboard.html", &ctx)
}

async fn fetch(State(state): State<SharedState>, headers: HeaderMap) -> Result<Html<String>, DeskError> {
    require_session(&state, &headers)?;
    let report = pipeline::process_unread(&state.app).await?;

    let mut ctx = tera::Context::new();
    ctx.insert("report", &report);
    render(&state.tera, "report.html", &ctx)
}

async fn api_log(State(state): State<SharedState>, headers: HeaderMap) -> Result<Json<Vec<LogRecord>>, DeskError> {
    require_session(&state, &headers)?;
    Ok(Json(state.app.log.load().await?))
}

async fn error_page(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> Html<String> {
    let error_message = params.get("message").cloned().unwrap_or_else(|| "Unknown error".to_string());
    render_error(&state.tera, &error_message)
}

pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/login", get(login_page).post(login_submit))
        .route("/logout", post(logout))
        .route("/reset", get(reset_page))
        .route("/reset/request", post(reset_request))
        .route("/reset/confirm", post(reset_confirm))
        .route("/fetch", post(fetch))
        .route("/api/log", get(api_log))
        .route("/error", get(error_page))
        .with_state(state)
}

async fn start_server(router: Router, host: &str, port: u16) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    info!("Server running on http://{}:{}", host, port);
    axum::serve(listener, router).await?;
    Ok(())
}

pub async fn start_web_server(app: App) -> anyhow::Result<()> {
    let tera = Tera::new(&app.config.storage.templates)?;
    let host = app.config.server.host.clone();
    let port = app.config.server.port;

    let state = Arc::new(WebState { app: Arc::new(app), tera });
    start_server(create_router(state), &host, port).await
}
