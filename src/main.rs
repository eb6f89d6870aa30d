use actix_web::{middleware::Compress, web, App, HttpResponse, HttpServer};
use actix_cors::Cors;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use utoipa_swagger_ui::SwaggerUi;

mod auth;
#[cfg(feature = "postgres-store")]
mod db;
mod error;
mod models;
mod nav;
mod oauth;
mod openapi;
mod pages;
mod rate_limit;
mod repo;
mod routes;
mod security;

#[cfg(feature = "inmem-store")]
use repo::inmem::InMemRepo;
use openapi::ApiDoc;
use rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade};
use routes::{config, AppState};
use security::SecurityHeaders;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()

async fn metrics_endpoint(handle: web::Data<PrometheusHandle>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(handle.render())
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Environment variables must be set externally (shell, systemd, Docker, etc.)
    // Load .env automatically only in debug builds to reduce manual setup overhead.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    // Validate required environment variables
    validate_env_vars();

    // Structured logging initialisation
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Bootstrapping blh server");

    // Log loaded configuration (non-sensitive)
    info!(
        "GitHub OAuth configured: {}",
        std::env::var("GITHUB_CLIENT_ID").is_ok()
    );
    info!(
        "Google OAuth configured: {}",
        std::env::var("GOOGLE_CLIENT_ID").is_ok()
    );
    info!(
        "Public base URL: {}",
        std::env::var("PUBLIC_BASE_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
    );

    #[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
    let repo = InMemRepo::new();
    #[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
    info!("Using in-memory repository backend");

    #[cfg(feature = "postgres-store")]
    let pool = {
        let db_url =
            std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for postgres-store");
        db::connect_pool(&db_url).expect("Failed to create Pg pool")
    };
    #[cfg(feature = "postgres-store")]
    let repo = {
        info!("Using Postgres repository backend");
        crate::repo::pg::PgRepo::new(pool.clone())
    };

    let openapi = ApiDoc::openapi();
    info!("OpenAPI spec generated");

    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install metrics recorder");

    let limiter = RateLimiterFacade::new(
        InMemoryRateLimiter::new(true),
        RateLimitConfig::from_env(),
    );
    // One state for all workers; the OAuth state store must be shared or a
    // callback served by another worker would reject its own login.
    let state = AppState::new(Arc::new(repo), Some(limiter));

    let (host, port) = bind_addr();
    let server = HttpServer::new(move || {
        let cors = {
            let mut c = Cors::default()
                // during local dev allow a separate frontend dev server
                .allowed_origin("http://localhost:3000")
                .allowed_origin("http://127.0.0.1:3000")
                .allow_any_header()
                .allowed_methods(["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
                .supports_credentials()
                .max_age(3600);
            // If FRONTEND_URL env var is provided and not already covered, add it.
            if let Ok(front) = std::env::var("FRONTEND_URL") {
                c = c.allowed_origin(&front);
            }
            c
        };

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(SecurityHeaders::from_env())
            .wrap(cors)
            .app_data(web::JsonConfig::default().error_handler(error::json_error_handler))
            .app_data(web::Data::new(state.clone()))
            .app_data(web::Data::new(prometheus.clone()))
            .configure(config)
            .configure(pages::config)
            .route("/metrics", web::get().to(metrics_endpoint))
            .service(SwaggerUi::new("/docs").url("/docs/openapi.json", openapi.clone()))
    })
    .bind((host.as_str(), port))?;

    info!("Listening on http://{}:{}", host, port);

    let result = server.run().await;

    #[cfg(feature = "postgres-store")]
    {
        pool.close().await;
        info!("Postgres pool closed");
    }

    result
}

fn bind_addr() -> (String, u16) {
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    (host, port)
}

/// Validate that required environment variables are set
fn validate_env_vars() {
    use std::env;

    // Required variables that must be set
    let required = vec!["AUTH_SECRET"];

    let mut missing = Vec::new();
    for var in required {
        if env::var(var).is_err() {
            missing.push(var);
        }
    }

    if !missing.is_empty() {
        eprintln!("Missing required environment variables: {:?}", missing);
        eprintln!("Please copy .env.example to .env and configure it");
        std::process::exit(1);
    }

    // Validate AUTH_SECRET is sufficiently long
    if let Ok(secret) = env::var("AUTH_SECRET") {
        if secret.len() < 32 {
            eprintln!("AUTH_SECRET must be at least 32 characters long for security");
            std::process::exit(1);
        }
    }

    // Warn about optional variables for social sign-in
    if env::var("GITHUB_CLIENT_ID").is_err() || env::var("GITHUB_CLIENT_SECRET").is_err() {
        eprintln!("Warning: GitHub OAuth not configured (GITHUB_CLIENT_ID/GITHUB_CLIENT_SECRET missing)");
        eprintln!("GitHub login will not work without these variables");
    }
    if env::var("GOOGLE_CLIENT_ID").is_err() || env::var("GOOGLE_CLIENT_SECRET").is_err() {
        eprintln!("Warning: Google OAuth not configured (GOOGLE_CLIENT_ID/GOOGLE_CLIENT_SECRET missing)");
        eprintln!("Google login will not work without these variables");
    }
}
