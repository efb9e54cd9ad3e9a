#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use hangar_core::bus::observer::SessionObserver;
use hangar_core::fragmenter::events::{DownloadProgress, ForwardedEvent, FragmenterEvent};
use hangar_core::fragmenter::package_fragmenter::{
    EventSender, Fragmenter, FragmenterError, InstallOptions,
};
use hangar_core::types::types::{InstallId, InstallOutcome, InstallRequest};

/// One step of a scripted install.
#[derive(Clone)]
pub enum Step {
    Emit(FragmenterEvent),
    /// Let other tasks run, to force interleaving between installs.
    Yield,
    /// Park until the cancellation token fires.
    WaitForCancel,
    /// Settle with this result; later steps are not run.
    Finish(Finish),
}

#[derive(Clone, Copy, Debug)]
pub enum Finish {
    Ok,
    Aborted,
    Status(u16),
    Panic,
}

/// A fragmenter that plays back a fixed script, keyed by source URL so one
/// instance can serve several concurrent installs.
pub struct ScriptedFragmenter {
    scripts: Vec<(String, Vec<Step>)>,
    calls: AtomicUsize,
}

impl ScriptedFragmenter {
    pub fn new(script: Vec<Step>) -> Self {
        Self::with_scripts(vec![(String::new(), script)])
    }

    /// `scripts` pairs a source-URL suffix with its script; the first match
    /// wins, an empty suffix matches everything.
    pub fn with_scripts(scripts: Vec<(String, Vec<Step>)>) -> Self {
        Self {
            scripts,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn script_for(&self, source_url: &str) -> Vec<Step> {
        self.scripts
            .iter()
            .find(|(suffix, _)| source_url.ends_with(suffix.as_str()))
            .map(|(_, steps)| steps.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Fragmenter for ScriptedFragmenter {
    async fn install(
        &self,
        source_url: &str,
        _dest_dir: &Path,
        cancel: CancellationToken,
        _options: InstallOptions,
        events: EventSender,
    ) -> Result<(), FragmenterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        for step in self.script_for(source_url) {
            match step {
                Step::Emit(event) => {
                    events.send(event).await.expect("bridge stopped listening");
                }
                Step::Yield => tokio::task::yield_now().await,
                Step::WaitForCancel => cancel.cancelled().await,
                Step::Finish(Finish::Ok) => return Ok(()),
                Step::Finish(Finish::Aborted) => return Err(FragmenterError::Aborted),
                Step::Finish(Finish::Status(code)) => return Err(FragmenterError::Status(code)),
                Step::Finish(Finish::Panic) => panic!("fragmenter crashed mid-install"),
            }
        }
        Ok(())
    }
}

/// Records session lifecycle calls as short strings, in call order.
#[derive(Default)]
pub struct LifecycleLog {
    entries: Mutex<Vec<String>>,
}

impl LifecycleLog {
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    fn push(&self, entry: String) {
        self.entries.lock().unwrap().push(entry);
    }
}

impl SessionObserver for LifecycleLog {
    fn on_started(&self, install_id: InstallId) {
        self.push(format!("started {}", install_id));
    }

    fn on_event(&self, event: &ForwardedEvent) {
        self.push(format!("{} {}", event.kind().as_str(), event.install_id));
    }

    fn on_settled(&self, install_id: InstallId, outcome: &Result<InstallOutcome, String>) {
        self.push(format!("settled {} {:?}", install_id, outcome));
    }
}

pub fn request(id: i64, source: &str) -> InstallRequest {
    InstallRequest::new(
        InstallId(id),
        format!("https://cdn.example.com/{}", source),
        "/tmp/hangar-test",
        "/sim/Community/pkg",
    )
}

pub fn started(module: &str) -> FragmenterEvent {
    FragmenterEvent::DownloadStarted { module: module.into() }
}

pub fn progress(module: &str, loaded: u64, total: u64) -> FragmenterEvent {
    FragmenterEvent::DownloadProgress {
        module: module.into(),
        progress: DownloadProgress::new(loaded, Some(total)),
    }
}

pub fn finished(module: &str) -> FragmenterEvent {
    FragmenterEvent::DownloadFinished { module: module.into() }
}

/// Everything already published on the bus.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<ForwardedEvent>) -> Vec<ForwardedEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

pub fn events_for(events: &[ForwardedEvent], id: i64) -> Vec<FragmenterEvent> {
    events
        .iter()
        .filter(|e| e.install_id == InstallId(id))
        .map(|e| e.event.clone())
        .collect()
}

/// Poll until `check` holds, yielding to other tasks in between.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if check() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}
