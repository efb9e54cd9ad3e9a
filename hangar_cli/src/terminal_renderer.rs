use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;

use hangar_core::fragmenter::events::{FragmenterEvent, ForwardedEvent};
use hangar_core::projection::status::InstallStatus;
use hangar_core::types::types::InstallId;

/// Renders one install's forwarded events as an indicatif bar.
///
/// Events tagged with other install ids are ignored. Warnings and errors
/// are printed above the bar so they survive after it is cleared.
pub struct TerminalRenderer {
    install_id: InstallId,
    bar: ProgressBar,
    status: InstallStatus,
}

impl TerminalRenderer {
    pub fn new(install_id: InstallId) -> Self {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::with_template("{spinner} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        bar.set_style(style);
        Self::with_bar(install_id, bar)
    }

    pub fn with_bar(install_id: InstallId, bar: ProgressBar) -> Self {
        Self {
            install_id,
            bar,
            status: InstallStatus::new(install_id),
        }
    }

    /// Consume events until the bus closes; returns the final status.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<ForwardedEvent>) -> InstallStatus {
        while let Some(ev) = events.recv().await {
            if ev.install_id != self.install_id {
                continue;
            }
            self.status.apply(&ev.event);
            self.render(&ev.event);
        }
        self.bar.finish_and_clear();
        self.status
    }

    fn render(&self, event: &FragmenterEvent) {
        if let Some(pct) = self.status.percent {
            self.bar.set_position(u64::from(pct));
        }
        self.bar.set_message(self.status.describe());

        match event {
            FragmenterEvent::LogWarn { message } => self.bar.println(format!("warning: {}", message)),
            FragmenterEvent::LogError { message } | FragmenterEvent::Error { message } => {
                self.bar.println(format!("error: {}", message))
            }
            _ => self.bar.tick(),
        }
    }
}
