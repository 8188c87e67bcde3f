// Kiro Gateway - proxy gateway for the Kiro API (Amazon Q Developer /
// AWS CodeWhisperer), exposing OpenAI and Anthropic compatible interfaces.

mod auth;
mod client;
mod config;
mod convert;
mod error;
mod model;
mod parser;
mod server;
mod stream;
mod utils;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::{Config, APP_VERSION};
use server::{build_router, load_models_with_fallback, AppState};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let mut host_override: Option<String> = None;
    let mut port_override: Option<u16> = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" => {
                println!("Kiro Gateway v{}", APP_VERSION);
                return;
            }
            "--host" => host_override = args.next(),
            "--port" => port_override = args.next().and_then(|p| p.parse().ok()),
            other => {
                eprintln!("Unknown argument: {}", other);
                eprintln!("Usage: kiro-gateway [--host <addr>] [--port <port>] [--version]");
                std::process::exit(2);
            }
        }
    }

    let mut cfg = Config::load();
    if let Some(host) = host_override {
        cfg.host = host;
    }
    if let Some(port) = port_override {
        cfg.port = port;
    }

    init_logging(&cfg.log_level);

    if let Err(e) = cfg.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    print_banner(&cfg.host, cfg.port);

    let host = cfg.host.clone();
    let port = cfg.port;

    let state = match AppState::new(cfg) {
        Ok(s) => s,
        Err(e) => {
            error!("Startup error: {}", e);
            std::process::exit(1);
        }
    };

    load_models_with_fallback(&state).await;

    let router = build_router(state);
    let addr = format!("{}:{}", host, port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("Starting server on {}", addr);
    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
        std::process::exit(1);
    }

    info!("Server stopped");
}

fn init_logging(level: &str) {
    let directive = match level.to_uppercase().as_str() {
        "DEBUG" => "kiro_gateway=debug,info",
        "WARNING" => "warn",
        "ERROR" => "error",
        _ => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_banner(host: &str, port: u16) {
    let display_host = if host == "0.0.0.0" { "localhost" } else { host };
    println!();
    println!("  Kiro Gateway v{}", APP_VERSION);
    println!();
    println!("  Server running at:");
    println!("  ->  http://{}:{}", display_host, port);
    println!();
    println!("  Health Check:  http://{}:{}/health", display_host, port);
    println!();
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    info!("Shutting down server...");
}
