//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which builds a [`JobEngine`] over an in-memory
//! store and a [`ScriptedRunner`] whose output is fixed per source
//! reference. [`TestHarness::with_server`] starts Axum on a random port for
//! HTTP-level testing.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use mp3ify::config::Config;
use mp3ify::conversion::{
    ConversionFailure, ConversionOutput, ConversionRunner, EngineSettings, JobEngine, RunHandle,
    RunnerRecord,
};
use mp3ify::events::{EventHub, OutputEvent, Subscription};
use mp3ify::server::{create_router, AppContext};
use mp3ify::store::JobStore;
use mp3ify_common::{JobId, JobState};
use mp3ify_db::models::Job;

/// One step of a scripted conversion.
#[derive(Debug, Clone)]
pub enum Step {
    Line(String),
    CarriageReturn,
    /// Block until the gate is notified.
    Wait(Arc<Notify>),
    /// Block until cancelled.
    Hang,
    /// Write `<output_dir>/<job_id>.mp3` and succeed with this display name.
    Succeed(String),
    Fail(ConversionFailure),
}

pub fn line(text: &str) -> Step {
    Step::Line(text.to_string())
}

pub fn succeed(display_name: &str) -> Step {
    Step::Succeed(display_name.to_string())
}

/// A [`ConversionRunner`] that plays back a script instead of running a
/// process. Sources without a script of their own use the default script.
pub struct ScriptedRunner {
    output_dir: PathBuf,
    scripts: Mutex<HashMap<String, Vec<Step>>>,
    default_script: Vec<Step>,
    started: Mutex<Vec<JobId>>,
}

impl ScriptedRunner {
    pub fn new(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            scripts: Mutex::new(HashMap::new()),
            default_script: vec![line("converting"), succeed("Default Song")],
            started: Mutex::new(Vec::new()),
        }
    }

    pub fn script(&self, source: &str, steps: Vec<Step>) {
        self.scripts.lock().insert(source.to_string(), steps);
    }

    /// Jobs this runner was started for, in order.
    pub fn started(&self) -> Vec<JobId> {
        self.started.lock().clone()
    }

    pub fn start_count(&self, id: JobId) -> usize {
        self.started.lock().iter().filter(|s| **s == id).count()
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

impl ConversionRunner for ScriptedRunner {
    fn start(&self, job_id: JobId, source: &str, cancel: CancellationToken) -> RunHandle {
        self.started.lock().push(job_id);
        let steps = self
            .scripts
            .lock()
            .get(source)
            .cloned()
            .unwrap_or_else(|| self.default_script.clone());
        let output_dir = self.output_dir.clone();
        let (tx, handle) = RunHandle::channel();

        tokio::spawn(async move {
            for step in steps {
                let record = match step {
                    Step::Line(text) => RunnerRecord::Line(text),
                    Step::CarriageReturn => RunnerRecord::CarriageReturn,
                    Step::Wait(gate) => {
                        tokio::select! {
                            _ = gate.notified() => continue,
                            _ = cancel.cancelled() => {
                                RunnerRecord::Finished(Err(ConversionFailure::Cancelled))
                            }
                        }
                    }
                    Step::Hang => {
                        cancel.cancelled().await;
                        RunnerRecord::Finished(Err(ConversionFailure::Cancelled))
                    }
                    Step::Succeed(display_name) => {
                        std::fs::create_dir_all(&output_dir).unwrap();
                        let artifact_path = output_dir.join(format!("{}.mp3", job_id));
                        std::fs::write(&artifact_path, b"ID3 fake audio").unwrap();
                        RunnerRecord::Finished(Ok(ConversionOutput {
                            artifact_path,
                            display_name,
                        }))
                    }
                    Step::Fail(failure) => RunnerRecord::Finished(Err(failure)),
                };

                let done = matches!(record, RunnerRecord::Finished(_));
                if tx.send(record).await.is_err() || done {
                    return;
                }
            }
        });

        handle
    }
}

/// Test harness wrapping an engine backed by an in-memory database.
pub struct TestHarness {
    pub engine: JobEngine,
    pub store: JobStore,
    pub hub: Arc<EventHub>,
    pub runner: Arc<ScriptedRunner>,
    pub config: Config,
    pub dir: tempfile::TempDir,
}

impl TestHarness {
    /// Create a new harness with default settings and in-memory DB.
    pub fn new() -> Self {
        Self::with_settings(test_settings(4))
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        let store = JobStore::in_memory().expect("failed to create in-memory store");
        Self::with_store(store, settings, |_| {})
    }

    /// Build a harness over `store`, letting `setup` add scripts before the
    /// engine starts (and runs recovery).
    pub fn with_store(
        store: JobStore,
        settings: EngineSettings,
        setup: impl FnOnce(&ScriptedRunner),
    ) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let runner = Arc::new(ScriptedRunner::new(dir.path().join("converted")));
        setup(&runner);

        let hub = Arc::new(EventHub::new(64));
        let engine = JobEngine::start(store.clone(), hub.clone(), runner.clone(), settings)
            .expect("failed to start engine");

        let mut config = Config::default();
        config.storage.data_dir = dir.path().to_path_buf();

        Self {
            engine,
            store,
            hub,
            runner,
            config,
            dir,
        }
    }

    pub fn ctx(&self) -> AppContext {
        AppContext {
            engine: self.engine.clone(),
            config: Arc::new(self.config.clone()),
        }
    }

    pub fn router(&self) -> axum::Router {
        create_router(self.ctx())
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server() -> (Self, SocketAddr) {
        let harness = Self::new();
        let app = harness.router();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (harness, addr)
    }

    /// Poll the store until the job reaches `state`.
    pub async fn wait_for_state(&self, id: JobId, state: JobState) -> Job {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let job = self.store.get(id).expect("job should exist");
            if job.state == state {
                return job;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {} stuck in {} waiting for {}",
                id,
                job.state,
                state
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub fn test_settings(max_concurrent: usize) -> EngineSettings {
    EngineSettings {
        max_concurrent,
        cancel_timeout: Duration::from_secs(5),
    }
}

/// Drain a subscription until it ends.
pub async fn collect_events(mut subscription: Subscription) -> Vec<OutputEvent> {
    let mut events = Vec::new();
    let drain = async {
        while let Some(event) = subscription.recv().await {
            events.push(event);
        }
    };
    tokio::time::timeout(Duration::from_secs(5), drain)
        .await
        .expect("event stream did not close");
    events
}
