use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;

use hangar_core::bridge::install_router::InstallRouter;
use hangar_core::bus::message_bus::MessageBus;
use hangar_core::fragmenter::http_fragmenter::HttpFragmenter;
use hangar_core::projection::status::InstallStatus;
use hangar_core::types::types::{InstallId, InstallOutcome, InstallRequest};

mod terminal_renderer;
use terminal_renderer::TerminalRenderer;

#[derive(Parser)]
#[command(name = "hangar", about = "Install a simulator addon package into a community folder")]
struct Args {
    /// Package archive URL
    #[arg(short, long)]
    url: String,

    /// Destination directory (e.g. <Community>/<package-name>)
    #[arg(short, long)]
    dest: PathBuf,

    /// Scratch directory for downloads; defaults to the system temp dir
    #[arg(short, long)]
    temp: Option<PathBuf>,

    /// Install id used to tag events
    #[arg(long, default_value_t = 1)]
    id: i64,

    /// Download retries before giving up
    #[arg(long, default_value_t = 3)]
    max_retries: u32,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    let install_id = InstallId(args.id);

    let fragmenter = match HttpFragmenter::builder()
        .with_max_retries(args.max_retries)
        .build()
    {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Failed to set up downloader: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let (bus, bus_rx) = MessageBus::new();
    let router = Arc::new(InstallRouter::new(Arc::new(fragmenter), bus));
    let renderer = tokio::spawn(TerminalRenderer::new(install_id).run(bus_rx));

    // Ctrl-C asks the running install to stop instead of killing the process.
    let ctrl_c = {
        let router = Arc::clone(&router);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Cancelling...");
                router.handle_cancel_request(install_id);
            }
        })
    };

    let request = InstallRequest::new(
        install_id,
        args.url.clone(),
        args.temp.unwrap_or_else(std::env::temp_dir),
        args.dest,
    );

    println!("Installing: {}", args.url);
    let start = Instant::now();
    let result = router.handle_install_request(request).await;

    // Release every handle on the bus so the renderer sees it close.
    ctrl_c.abort();
    let _ = ctrl_c.await;
    drop(router);
    let mut status = match renderer.await {
        Ok(status) => status,
        Err(e) => {
            log::warn!("[cli] renderer task failed: {}", e);
            InstallStatus::new(install_id)
        }
    };

    let settled = result.as_ref().copied().map_err(|e| e.to_string());
    status.finish(&settled);
    println!("{}", status.describe());

    match result {
        Ok(InstallOutcome::Completed) => {
            println!("Done in {:.2}s", start.elapsed().as_secs_f64());
            ExitCode::SUCCESS
        }
        Ok(InstallOutcome::Aborted) => ExitCode::from(130),
        Err(e) => {
            eprintln!("Install failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
