//! CRM Refinery REST API Server
//!
//! ## Usage
//!
//! ```bash
//! OPENAI_API_KEY=sk-... REFINERY_API_KEYS=demo-key:demo-user cargo run --bin refinery_server
//!
//! curl -X POST http://localhost:3000/api/companies/merge \
//!   -H "Content-Type: application/json" \
//!   -H "x-api-key: demo-key" \
//!   -H "x-hubspot-access-token: pat-..." \
//!   -d '{"company": {"name": "Acme Corp", "domain": "acme.com"}, "recordId": "111"}'
//!
//! curl http://localhost:3000/api/health
//! ```

use std::sync::Arc;

use anyhow::Result;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crm_refinery::api::auth::{EnvKeyValidator, InMemoryGate};
use crm_refinery::api::{create_router, AppState};
use crm_refinery::inference::{OpenAiStructuredClient, StructuredInference};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crm_refinery=info,tower_http=info".into()),
        )
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let inference = OpenAiStructuredClient::from_env()?;
    info!(model = inference.model_name(), "inference client ready");

    let state = AppState::new(
        Arc::new(inference),
        Arc::new(EnvKeyValidator::from_env()),
        Arc::new(InMemoryGate::from_env()),
    );

    let app = create_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
    );

    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".to_string())
        .parse::<u16>()
        .unwrap_or(3000);
    let addr = format!("0.0.0.0:{port}");
    info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
