use std::path::Path;
use std::sync::Arc;

use actix_web::cookie::Cookie;
use actix_web::{test, web, App};

use totpgate::logbuf::LogBuffer;
use totpgate::rate_limit::RateLimiter;
use totpgate::routes::{config, AppState};
use totpgate::session::SessionRegistry;
use totpgate::store::{SecretStore, SECRETS_FILE};
use totpgate::totp;

const ALICE_SECRET: &str = "JBSWY3DPEHPK3PXP";

fn state_in(dir: &Path) -> AppState {
    AppState {
        store: Arc::new(SecretStore::open(dir).unwrap()),
        sessions: Arc::new(SessionRegistry::new(300)),
        limiter: Arc::new(RateLimiter::new()),
        logs: Arc::new(LogBuffer::default()),
    }
}

/// Codes are only valid within the current 30s step. Leave margin so a code
/// generated now is still current when the handler re-derives its own "now".
async fn wait_out_step_boundary() {
    let into_step = totp::unix_now() % totp::STEP_SECS;
    if into_step >= totp::STEP_SECS - 3 {
        tokio::time::sleep(std::time::Duration::from_secs(4)).await;
    }
}

/// A 6-digit code guaranteed to differ from `code` while staying digit-only.
fn wrong_code(code: &str) -> String {
    code.chars()
        .map(|c| {
            let d = c.to_digit(10).unwrap();
            char::from_digit((d + 1) % 10, 10).unwrap()
        })
        .collect()
}

#[actix_web::test]
async fn login_flow_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_in(dir.path());
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::get()
        .uri(&format!("/totp/save/alice/60/{ALICE_SECRET}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200, "save should succeed");

    wait_out_step_boundary().await;
    let code = totp::generate_now(ALICE_SECRET).unwrap();
    let req = test::TestRequest::post()
        .uri("/auth/login")
        .set_form([("id", "alice"), ("totp", code.as_str())])
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200, "login with a fresh code should succeed");
    let token = resp
        .response()
        .cookies()
        .find(|c| c.name() == "authtoken-alice")
        .map(|c| c.value().to_string())
        .expect("login must set the identity cookie");

    // Cookie-based session check.
    let req = test::TestRequest::get()
        .uri("/auth/verify/alice")
        .cookie(Cookie::new("authtoken-alice", token.clone()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(test::read_body(resp).await, "ok");

    // The session does not vouch for a different identity.
    let req = test::TestRequest::get()
        .uri("/auth/verify/other")
        .cookie(Cookie::new("authtoken-alice", token.clone()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);

    // Explicit-token variant.
    let req = test::TestRequest::get()
        .uri(&format!("/auth/verify/alice/{token}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    // Logout revokes the token and expires the cookie.
    let req = test::TestRequest::get()
        .uri("/auth/logout/alice")
        .cookie(Cookie::new("authtoken-alice", token.clone()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let req = test::TestRequest::get()
        .uri("/auth/verify/alice")
        .cookie(Cookie::new("authtoken-alice", token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
}

#[actix_web::test]
async fn login_rejects_wrong_code_and_unknown_id() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_in(dir.path());
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::get()
        .uri(&format!("/totp/save/alice/60/{ALICE_SECRET}"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    wait_out_step_boundary().await;
    let bad = wrong_code(&totp::generate_now(ALICE_SECRET).unwrap());
    let req = test::TestRequest::post()
        .uri("/auth/login")
        .set_form([("id", "alice"), ("totp", bad.as_str())])
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::post()
        .uri("/auth/login")
        .set_form([("id", "ghost"), ("totp", "123456")])
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);

    // Non-digit codes never reach the TOTP engine.
    let req = test::TestRequest::post()
        .uri("/auth/login")
        .set_form([("id", "alice"), ("totp", "12a456")])
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
}

#[actix_web::test]
async fn one_shot_code_verification() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_in(dir.path());
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::get()
        .uri(&format!("/totp/save/alice/60/{ALICE_SECRET}"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    wait_out_step_boundary().await;
    let code = totp::generate_now(ALICE_SECRET).unwrap();
    let req = test::TestRequest::get()
        .uri(&format!("/totp/verify/alice/{code}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(test::read_body(resp).await, "ok");

    let bad = wrong_code(&totp::generate_now(ALICE_SECRET).unwrap());
    let req = test::TestRequest::get()
        .uri(&format!("/totp/verify/alice/{bad}"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::get()
        .uri("/totp/verify/ghost/123456")
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
async fn delete_cascades_into_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_in(dir.path());
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::get()
        .uri(&format!("/totp/save/alice/60/{ALICE_SECRET}"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    // Issue a session directly; the cascade is what's under test here.
    let token = state.sessions.issue("alice", 60);
    let req = test::TestRequest::get()
        .uri(&format!("/auth/verify/alice/{token}"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    let req = test::TestRequest::get().uri("/totp/delete/alice").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    let req = test::TestRequest::get()
        .uri(&format!("/auth/verify/alice/{token}"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::get().uri("/totp/list").to_request();
    let resp = test::call_service(&app, req).await;
    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(!body.contains("alice"));
}

#[actix_web::test]
async fn reload_and_unavailable_flow() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_in(dir.path());
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::get()
        .uri(&format!("/totp/save/alice/60/{ALICE_SECRET}"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    // Corrupt the file behind the store's back.
    std::fs::write(dir.path().join(SECRETS_FILE), "{ not json").unwrap();
    let req = test::TestRequest::get().uri("/totp/reload/false").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 500);

    // Mutations now refuse; the list banner flags the degraded mode.
    let req = test::TestRequest::get()
        .uri(&format!("/totp/save/bob/60/{ALICE_SECRET}"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 503);
    let req = test::TestRequest::get().uri("/totp/list").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(body.contains("unavailable"));

    // Fix the file; reload-with-logout also clears sessions.
    let token = state.sessions.issue("alice", 600);
    std::fs::write(dir.path().join(SECRETS_FILE), "[]").unwrap();
    let req = test::TestRequest::get().uri("/totp/reload/true").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
    assert!(!state.sessions.contains(&token));

    let req = test::TestRequest::get()
        .uri(&format!("/totp/save/bob/60/{ALICE_SECRET}"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    // Flag must be a strict boolean.
    let req = test::TestRequest::get().uri("/totp/reload/banana").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
    let req = test::TestRequest::get().uri("/totp/reload").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
}

#[actix_web::test]
async fn login_is_rate_limited_per_forwarded_ip() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_in(dir.path());
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(config),
    )
    .await;

    // First attempt passes the limiter (and 404s on the unknown id); the
    // immediate retry from the same IP is rejected outright.
    let req = test::TestRequest::post()
        .uri("/auth/login")
        .insert_header(("X-Forwarded-For", "9.9.9.9"))
        .set_form([("id", "ghost"), ("totp", "123456")])
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);

    let req = test::TestRequest::post()
        .uri("/auth/login")
        .insert_header(("X-Forwarded-For", "9.9.9.9"))
        .set_form([("id", "ghost"), ("totp", "123456")])
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 429);

    // A different caller is unaffected.
    let req = test::TestRequest::post()
        .uri("/auth/login")
        .insert_header(("X-Forwarded-For", "9.9.9.8"))
        .set_form([("id", "ghost"), ("totp", "123456")])
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
async fn utility_endpoints() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_in(dir.path());
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::get().uri("/totp/new").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let secret = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert_eq!(secret.len(), 32);

    let req = test::TestRequest::get().uri("/totp/list").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    let req = test::TestRequest::get().uri("/logs").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(body.contains("/totp/list"));

    let req = test::TestRequest::get().uri("/logs/zzz").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    let req = test::TestRequest::get().uri("/").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(body.contains("totpgate"));

    let req = test::TestRequest::get().uri("/auth/loginpage").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(body.contains("/auth/login"));
}
