use std::sync::Arc;

use clap::Parser;

use hangar_core::fragmenter::http_fragmenter::HttpFragmenter;
use hangar_server::server::AppState;

#[derive(Parser)]
#[command(name = "hangard", about = "Addon install daemon: routes install/cancel requests and streams fragmenter events")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "HANGAR_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(long, env = "HANGAR_PORT", default_value_t = 8598)]
    port: u16,

    /// Download retries per install before giving up
    #[arg(long, env = "HANGAR_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);

    let fragmenter = HttpFragmenter::builder()
        .with_max_retries(args.max_retries)
        .build()
        .expect("failed to build HTTP client");

    let state = AppState::new(Arc::new(fragmenter));
    let app = hangar_server::server::router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");

    log::info!("hangard listening on http://{}  (set HANGAR_PORT to override)", addr);
    axum::serve(listener, app)
        .await
        .expect("server error");
}
