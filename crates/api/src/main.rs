use rateforge_api::app::ApiConfig;
use rateforge_core::TenantId;

#[tokio::main]
async fn main() {
    rateforge_observability::init();

    let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| {
        tracing::warn!("JWT_SECRET not set; using insecure dev default");
        "dev-secret".to_string()
    });

    let ingest_token = std::env::var("INGEST_TOKEN").unwrap_or_else(|_| {
        tracing::warn!("INGEST_TOKEN not set; rate ingest endpoint is disabled");
        String::new()
    });

    let ingest_tenant_id = match std::env::var("INGEST_TENANT_ID") {
        Ok(raw) => raw.parse::<TenantId>().unwrap_or_else(|e| {
            tracing::warn!("INGEST_TENANT_ID is invalid ({e}); generating a fresh tenant");
            TenantId::new()
        }),
        Err(_) => {
            let tenant = TenantId::new();
            tracing::warn!("INGEST_TENANT_ID not set; ingest routes to tenant {tenant}");
            tenant
        }
    };

    let config = ApiConfig {
        jwt_secret,
        ingest_token,
        ingest_tenant_id,
    };

    let app = rateforge_api::app::build_app(config).await;

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080")
        .await
        .expect("failed to bind 0.0.0.0:8080");

    tracing::info!("listening on {}", listener.local_addr().expect("local addr"));

    axum::serve(listener, app).await.expect("server error");
}
