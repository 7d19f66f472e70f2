use std::net::IpAddr;
use std::sync::Arc;

use actix_web::cookie::{time::Duration as CookieDuration, Cookie};
use actix_web::{web, HttpRequest, HttpResponse};
use tracing::warn;

use crate::error::ApiError;
use crate::logbuf::LogBuffer;
use crate::models::LoginForm;
use crate::rate_limit::RateLimiter;
use crate::session::SessionRegistry;
use crate::store::SecretStore;
use crate::totp;

/// Minimum gap between login attempts from one IP.
const LOGIN_MIN_GAP_SECS: u64 = 3;
const COOKIE_PREFIX: &str = "authtoken-";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SecretStore>,
    pub sessions: Arc<SessionRegistry>,
    pub limiter: Arc<RateLimiter>,
    pub logs: Arc<LogBuffer>,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/totp")
            .service(web::resource("/new").route(web::get().to(new_secret)))
            .service(web::resource("/save/{id}/{ttl}/{secret}").route(web::get().to(save_secret)))
            .service(web::resource("/delete/{id}").route(web::get().to(delete_secret)))
            .service(web::resource("/list").route(web::get().to(list_ids)))
            .service(web::resource("/verify/{id}/{code}").route(web::get().to(verify_code)))
            .service(web::resource("/reload/{logout}").route(web::get().to(reload_secrets)))
            .service(web::resource("/reload").route(web::get().to(reload_missing_flag))),
    )
    .service(
        web::scope("/auth")
            .service(web::resource("/login").route(web::post().to(login)))
            .service(web::resource("/loginpage").route(web::get().to(login_page)))
            .service(web::resource("/verify/{id}").route(web::get().to(verify_session)))
            .service(web::resource("/verify/{id}/{token}").route(web::get().to(verify_token)))
            .service(web::resource("/logout/{id}").route(web::get().to(logout))),
    )
    .service(web::resource("/logs").route(web::get().to(logs_default)))
    .service(web::resource("/logs/{amount}").route(web::get().to(logs_amount)))
    .route("/", web::get().to(help))
    .route("/help", web::get().to(help))
    .route("/info", web::get().to(help));
}

/// Caller IP for rate limiting: `X-Forwarded-For` when it parses as an
/// address (we sit behind a reverse proxy), else the peer address.
fn client_ip(req: &HttpRequest) -> Option<String> {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        let first = forwarded.split(',').next().unwrap_or("").trim();
        if first.parse::<IpAddr>().is_ok() {
            return Some(first.to_string());
        }
        warn!(header = forwarded, "ignoring invalid X-Forwarded-For");
    }
    req.peer_addr().map(|addr| addr.ip().to_string())
}

fn log_hit(state: &AppState, req: &HttpRequest, path: &str) {
    let ip = client_ip(req).unwrap_or_else(|| "no-ip-found".to_string());
    state.logs.push(format!("{ip}  [>]  {path}"));
}

fn candidates(raw: &str) -> Vec<&str> {
    raw.split(',').filter(|s| !s.is_empty()).collect()
}

// ---------------- /totp ----------------

/// Generate a fresh Base32 secret for provisioning a new identity.
#[utoipa::path(
    get,
    path = "/totp/new",
    responses((status = 200, description = "Fresh Base32 secret", body = String))
)]
pub async fn new_secret(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    log_hit(&state, &req, "/totp/new");
    HttpResponse::Ok().body(totp::new_secret())
}

#[utoipa::path(
    get,
    path = "/totp/save/{id}/{ttl}/{secret}",
    params(
        ("id" = String, Path, description = "Identity id"),
        ("ttl" = u64, Path, description = "Session ttl seconds"),
        ("secret" = String, Path, description = "Base32 shared secret")
    ),
    responses(
        (status = 200, description = "Saved"),
        (status = 400, description = "Invalid id/ttl/secret"),
        (status = 409, description = "Id already exists"),
        (status = 503, description = "Store unavailable")
    )
)]
pub async fn save_secret(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(String, String, String)>,
) -> Result<HttpResponse, ApiError> {
    let (id, raw_ttl, secret) = path.into_inner();
    // Never echo the secret into the log ring.
    log_hit(&state, &req, &format!("/totp/save/{id}/{raw_ttl}/**********"));

    if id.is_empty() {
        return Err(ApiError::BadRequest("invalid id".into()));
    }
    if secret.trim().is_empty() {
        return Err(ApiError::BadRequest("invalid secret".into()));
    }
    let ttl: u64 = raw_ttl
        .parse()
        .ok()
        .filter(|t| *t > 0)
        .ok_or_else(|| ApiError::BadRequest("bad ttl seconds".into()))?;

    state.store.save(&id, &secret, ttl)?;
    Ok(HttpResponse::Ok().body(format!("Saved secret [{id}].")))
}

#[utoipa::path(
    get,
    path = "/totp/delete/{id}",
    params(("id" = String, Path, description = "Identity id")),
    responses(
        (status = 200, description = "Deleted; all sessions for the id revoked"),
        (status = 400, description = "Invalid id"),
        (status = 503, description = "Store unavailable")
    )
)]
pub async fn delete_secret(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    log_hit(&state, &req, &format!("/totp/delete/{id}"));
    if id.is_empty() {
        return Err(ApiError::BadRequest("invalid id".into()));
    }

    // Sessions go first so no token outlives its identity.
    state.sessions.revoke_all_for(&id);
    state.store.delete(&id)?;
    if !state.store.available() {
        return Err(ApiError::Unavailable);
    }
    Ok(HttpResponse::Ok().body(format!("Deleted [{id}].")))
}

#[utoipa::path(
    get,
    path = "/totp/list",
    responses((status = 200, description = "Known identity ids", body = String))
)]
pub async fn list_ids(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    log_hit(&state, &req, "/totp/list");
    let ids = state.store.list_ids();

    let mut out = String::new();
    if !state.store.available() {
        out.push_str("(i) The service is currently unavailable\n");
    }
    out.push_str(&format!("[==  {} IDs available  ==]\n", ids.len()));
    for id in ids {
        out.push_str(&id);
        out.push('\n');
    }
    out.push_str("[==  END  ==]");
    HttpResponse::Ok().body(out)
}

#[utoipa::path(
    get,
    path = "/totp/verify/{id}/{code}",
    params(
        ("id" = String, Path, description = "Identity id"),
        ("code" = String, Path, description = "6-digit TOTP code")
    ),
    responses(
        (status = 200, description = "Code valid for the current step"),
        (status = 401, description = "Code invalid"),
        (status = 404, description = "Unknown id")
    )
)]
pub async fn verify_code(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, ApiError> {
    let (id, code) = path.into_inner();
    log_hit(&state, &req, &format!("/totp/verify/{id}/{code}"));

    if id.is_empty() {
        return Err(ApiError::BadRequest("invalid id".into()));
    }
    if code.is_empty() || !code.chars().all(|c| c.is_ascii_digit()) {
        return Ok(HttpResponse::Unauthorized().body("invalid totp"));
    }

    let record = state.store.get(&id)?;
    if totp::verify_now(&record.secret, &code)? {
        Ok(HttpResponse::Ok().body("ok"))
    } else {
        Ok(HttpResponse::Unauthorized().body("unauthorized"))
    }
}

#[utoipa::path(
    get,
    path = "/totp/reload/{logout}",
    params(("logout" = bool, Path, description = "Also revoke every session")),
    responses(
        (status = 200, description = "Reloaded"),
        (status = 400, description = "Flag is not true/false"),
        (status = 500, description = "File unreadable or malformed; store now unavailable")
    )
)]
pub async fn reload_secrets(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let raw = path.into_inner();
    log_hit(&state, &req, &format!("/totp/reload/{raw}"));

    let logout = match raw.as_str() {
        "true" => true,
        "false" => false,
        _ => return Err(ApiError::BadRequest("wrong parameter (/totp/reload/{boolean})".into())),
    };

    state.store.load()?;
    if logout {
        state.sessions.clear();
    }
    state
        .logs
        .push(format!("Reloaded secrets (logout all users: {logout})"));
    Ok(HttpResponse::Ok().body(format!("Reloaded secrets (logout all users: {logout})")))
}

pub async fn reload_missing_flag() -> Result<HttpResponse, ApiError> {
    Err(ApiError::BadRequest(
        "missing path variable - use /totp/reload/false (true or false whether to log out all users)".into(),
    ))
}

// ---------------- /auth ----------------

/// Form login: verifies the TOTP code and answers with a session cookie
/// scoped to the identity (`authtoken-{id}`).
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginForm,
    responses(
        (status = 200, description = "Logged in; session cookie set"),
        (status = 401, description = "Wrong code"),
        (status = 404, description = "Unknown id"),
        (status = 429, description = "Too many attempts from this IP"),
        (status = 503, description = "Store unavailable")
    )
)]
pub async fn login(
    req: HttpRequest,
    state: web::Data<AppState>,
    form: web::Form<LoginForm>,
) -> Result<HttpResponse, ApiError> {
    if let Some(ip) = client_ip(&req) {
        if !state.limiter.admit(&ip, "/auth/login", LOGIN_MIN_GAP_SECS) {
            return Err(ApiError::RateLimited);
        }
    }
    log_hit(&state, &req, "/auth/login");

    if !state.store.available() {
        return Err(ApiError::Unavailable);
    }
    if form.id.is_empty() {
        return Err(ApiError::BadRequest("invalid id".into()));
    }
    if form.totp.is_empty() || !form.totp.chars().all(|c| c.is_ascii_digit()) {
        return Err(ApiError::BadRequest("invalid totp".into()));
    }

    let record = state.store.get(&form.id)?;
    if !totp::verify_now(&record.secret, &form.totp)? {
        state.logs.push(format!(
            "{}  [>]  \"{}\" login failed",
            client_ip(&req).unwrap_or_else(|| "no-ip-found".into()),
            form.id
        ));
        return Err(ApiError::Unauthorized);
    }

    let token = state.sessions.issue(&record.id, record.ttl);
    let cookie = Cookie::build(format!("{COOKIE_PREFIX}{}", record.id), token)
        .path("/")
        .http_only(true)
        .secure(true)
        .max_age(CookieDuration::seconds(record.ttl as i64))
        .finish();
    Ok(HttpResponse::Ok().cookie(cookie).body("true"))
}

/// Session check against one or more candidate ids (comma separated), using
/// the per-identity `authtoken-*` cookies.
#[utoipa::path(
    get,
    path = "/auth/verify/{id}",
    params(("id" = String, Path, description = "Identity id, or comma-separated ids")),
    responses(
        (status = 200, description = "A cookie token is valid for one of the ids"),
        (status = 401, description = "No valid session")
    )
)]
pub async fn verify_session(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let raw = path.into_inner();
    if raw.is_empty() {
        return Err(ApiError::BadRequest(format!("bad service id [{raw}]")));
    }
    let ids = candidates(&raw);

    let mut tokens = Vec::new();
    for id in &ids {
        if let Some(cookie) = req.cookie(&format!("{COOKIE_PREFIX}{id}")) {
            tokens.push(cookie.value().to_string());
        }
    }
    if tokens.is_empty() {
        return Ok(HttpResponse::Unauthorized().body("unauthorized"));
    }

    if tokens.iter().any(|t| state.sessions.validate(t, &ids)) {
        Ok(HttpResponse::Ok().body("ok"))
    } else {
        Ok(HttpResponse::Unauthorized().body("unauthorized"))
    }
}

/// Explicit-token variant for callers that hold the token directly.
#[utoipa::path(
    get,
    path = "/auth/verify/{id}/{token}",
    params(
        ("id" = String, Path, description = "Identity id"),
        ("token" = String, Path, description = "Session token")
    ),
    responses(
        (status = 200, description = "Token valid for the id"),
        (status = 401, description = "Token unknown, expired, or owned by another id")
    )
)]
pub async fn verify_token(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, ApiError> {
    let (id, token) = path.into_inner();
    if id.is_empty() {
        state
            .logs
            .push(format!("[warning]  /auth/verify/{id}/***  -  invalid service id"));
        return Err(ApiError::BadRequest(format!("bad service id [{id}]")));
    }
    if token.trim().is_empty() {
        return Ok(HttpResponse::Unauthorized().body("unauthorized"));
    }

    if state.sessions.validate(&token, &[id.as_str()]) {
        Ok(HttpResponse::Ok().body("ok"))
    } else {
        Ok(HttpResponse::Unauthorized().body("unauthorized"))
    }
}

#[utoipa::path(
    get,
    path = "/auth/logout/{id}",
    params(("id" = String, Path, description = "Identity id, or comma-separated ids")),
    responses((status = 200, description = "Matching sessions revoked, cookies expired"))
)]
pub async fn logout(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let raw = path.into_inner();
    log_hit(&state, &req, &format!("/auth/logout/{raw}"));
    if raw.is_empty() {
        return Err(ApiError::BadRequest("invalid id".into()));
    }
    let ids = candidates(&raw);

    let mut resp = HttpResponse::Ok();
    for id in &ids {
        let name = format!("{COOKIE_PREFIX}{id}");
        if let Some(cookie) = req.cookie(&name) {
            state.sessions.revoke(cookie.value());
            // Overwrite with a short-lived tombstone so the browser drops it.
            let replacement = Cookie::build(name, format!("logout-{}", chrono::Utc::now().to_rfc3339()))
                .path("/")
                .http_only(true)
                .secure(true)
                .max_age(CookieDuration::seconds(60))
                .finish();
            resp.cookie(replacement);
        }
    }
    Ok(resp.body(format!("Logout [{raw}]")))
}

pub async fn login_page(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    log_hit(&state, &req, "/auth/loginpage");
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(LOGIN_PAGE)
}

// ---------------- util ----------------

pub async fn help(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().body(help_text(&state))
}

pub async fn logs_default(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    logs_response(&req, &state, 200)
}

pub async fn logs_amount(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let amount: usize = path
        .into_inner()
        .parse()
        .map_err(|_| ApiError::BadRequest("invalid log amount".into()))?;
    Ok(logs_response(&req, &state, amount))
}

fn logs_response(req: &HttpRequest, state: &AppState, amount: usize) -> HttpResponse {
    log_hit(state, req, "/logs");
    let mut out = String::new();
    out.push_str(&format!("{}\n", chrono::Utc::now().to_rfc3339()));
    out.push_str(&format!("[== START of LAST {amount} logs ==]\n\n"));
    for line in state.logs.tail(amount) {
        out.push_str(&line);
        out.push_str("\n\n");
    }
    out.push_str("[== END OF LOGS ==]");
    HttpResponse::Ok().body(out)
}

fn help_text(state: &AppState) -> String {
    format!(
        r#"###

totpgate - TOTP-gated session tokens  |  {now}
Available: {available}

If the service is unavailable, write operations are disabled.
The service becomes unavailable when secrets.json is corrupted, badly
formatted, or unreadable. Inspect the logs, fix the file, then call the
reload endpoint.

Cookies are named `authtoken-{{id}}` like `authtoken-myId`. Each identity
has its own cookie and token and logs out separately.

Secrets directory defaults to /etc/totpgate (Unix) or
%ALLUSERSPROFILE%\totpgate (Windows); override with SECRET_DIR.
Default session TTL is 300s; override with TOKEN_TTL.
Listen address defaults to 0.0.0.0:8080; override with BIND_ADDR.

# See logs
/logs/{{amount}}

# Authenticate a client token (via cookie)
# Separate multiple IDs with comma - /auth/verify/myId,otherId
# 200 "ok" or 401 "unauthorized"
/auth/verify/{{id}}

# Verify a TOTP code
# 200 "ok" or 401 "unauthorized"
/totp/verify/{{id}}/{{code}}

# Generate a TOTP secret
/totp/new

# Save a TOTP secret under an ID, with ttl (seconds)
/totp/save/{{id}}/{{ttl}}/{{secret}}

# Delete a TOTP secret via ID (revokes its sessions)
/totp/delete/{{id}}

# List available IDs
/totp/list

# Serve the login page
/auth/loginpage

# Login POST endpoint - form params `id` and `totp`
/auth/login

# Log a client out of specific IDs
# Separate multiple IDs with comma - /auth/logout/myId,otherId
/auth/logout/{{id}}

# Reload secrets from the file, optionally logging out all users
/totp/reload/{{logout}}

###"#,
        now = chrono::Utc::now().to_rfc3339(),
        available = state.store.available(),
    )
}

const LOGIN_PAGE: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Login</title>
  <style>
    body { font-family: sans-serif; display: flex; justify-content: center; margin-top: 10vh; }
    form { display: flex; flex-direction: column; gap: 0.75rem; width: 16rem; }
    input, button { padding: 0.5rem; font-size: 1rem; }
  </style>
</head>
<body>
  <form method="post" action="/auth/login">
    <label for="id">Service ID</label>
    <input id="id" name="id" autocomplete="username" required>
    <label for="totp">One-time code</label>
    <input id="totp" name="totp" inputmode="numeric" pattern="[0-9]*" autocomplete="one-time-code" required>
    <button type="submit">Log in</button>
  </form>
</body>
</html>"#;
