use anyhow::Context;
use log::info;

use tickflow::adapters::{http, service};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let bind = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:5000".to_string());
    let service = service::spawn();
    let app = http::router(service);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!("listening on {bind}");
    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}
