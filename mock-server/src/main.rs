use mock_server::{Sandbox, DEFAULT_SERVER_TOKEN};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mock_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let token = std::env::var("POSTMARK_SERVER_TOKEN")
        .unwrap_or_else(|_| DEFAULT_SERVER_TOKEN.to_string());
    let addr = format!("127.0.0.1:{port}");

    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "sandbox listening");
    mock_server::serve(listener, Sandbox::new(&token)).await
}
