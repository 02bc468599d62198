use std::path::PathBuf;
use std::sync::Arc;

use keja::auth::TokenStore;
use keja::compactor;
use keja::engine::Engine;
use keja::http::{self, AppState};
use keja::mailer::LogMailer;
use keja::model::Role;
use keja::notify::NotifyHub;
use keja::observability;
use keja::policy::Actor;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let bind = std::env::var("KEJA_BIND").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = env_or("KEJA_PORT", 8000);
    let data_dir =
        PathBuf::from(std::env::var("KEJA_DATA_DIR").unwrap_or_else(|_| "./data".to_string()));
    let admin_token = std::env::var("KEJA_ADMIN_TOKEN").unwrap_or_else(|_| "keja".to_string());
    let metrics_port: Option<u16> = std::env::var("KEJA_METRICS_PORT")
        .ok()
        .and_then(|v| v.parse().ok());
    let compact_threshold: u64 = env_or("KEJA_COMPACT_THRESHOLD", 1000);

    observability::init(metrics_port);
    std::fs::create_dir_all(&data_dir)?;

    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(
        data_dir.join("keja.wal"),
        notify,
        Arc::new(LogMailer),
    )?);

    let admin = match engine.find_user_by_username("admin") {
        Some(user) => user,
        None => engine.register_user("admin".into(), Role::Admin).await?,
    };
    let tokens = Arc::new(TokenStore::new());
    tokens.insert(
        admin_token,
        Actor {
            user_id: admin.id,
            role: admin.role,
        },
    );

    tokio::spawn(compactor::run_compactor(engine.clone(), compact_threshold));

    let app = http::router(AppState {
        engine,
        tokens,
    });
    let listener = tokio::net::TcpListener::bind((bind.as_str(), port)).await?;
    tracing::info!(%bind, port, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
