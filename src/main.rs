use actix_web::{middleware::Compress, web, App, HttpServer};
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod error;
mod logbuf;
mod models;
mod openapi;
mod rate_limit;
mod routes;
mod session;
mod store;
mod totp;

use config::Config;
use logbuf::LogBuffer;
use openapi::ApiDoc;
use rate_limit::RateLimiter;
use routes::AppState;
use session::SessionRegistry;
use store::SecretStore;

use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Environment variables must be set externally (shell, systemd, Docker, etc.)
    // Load .env automatically only in debug builds to reduce manual setup overhead.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = Config::from_env();
    info!("Bootstrapping totpgate");
    info!("Storing secrets in {}", cfg.secrets_file().display());
    info!("Session token default TTL is {}s", cfg.default_ttl);

    // No writable store location means no viable degraded mode: bail out.
    let store = match SecretStore::open(&cfg.secret_dir) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!(
                "Could not initialize secret storage in [{}]: {e}. Exiting.",
                cfg.secret_dir.display()
            );
            std::process::exit(1);
        }
    };
    if !store.available() {
        warn!("secret store is unavailable; fix secrets.json and call /totp/reload/false");
    }

    let state = AppState {
        store,
        sessions: Arc::new(SessionRegistry::new(cfg.default_ttl)),
        limiter: Arc::new(RateLimiter::new()),
        logs: Arc::new(LogBuffer::default()),
    };

    let openapi = ApiDoc::openapi();
    let bind_addr = cfg.bind_addr.clone();

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .configure(routes::config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
            .app_data(web::Data::new(state.clone()))
    })
    .bind(&bind_addr)?;

    info!("Listening on http://{bind_addr}");

    server.run().await
}
