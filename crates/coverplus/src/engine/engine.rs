use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use tokio::sync::Mutex;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::backend::Backend;
use super::snapshot::SavedPosition;
use super::snapshot::StateFile;
use crate::config::Config;
use crate::config::ConfigError;
use crate::config::CoverConfig;
use crate::config::Diagnostic;
use crate::config::SchedulerConfig;
use crate::config::StartupSettings;
use crate::config::Warning;
use crate::cover::CoverCommand;
use crate::cover::CoverError;
use crate::cover::CoverHandle;
use crate::cover::CoverSnapshot;
use crate::cover::Orchestrator;

/// coverplus engine
///
/// Owns one running task per virtual cover and routes requests to them by
/// cover id. Cover state itself lives in those tasks; the engine only holds
/// their handles.
pub struct Engine {
    /// Transport for motor commands, shared by every cover
    backend: Mutex<Box<dyn Backend>>,

    /// Map of cover_id -> running cover
    covers: RwLock<HashMap<String, CoverHandle>>,

    /// Last known positions by unique_id, persisted on reload and shutdown
    saved: Mutex<StateFile>,

    state_file: Option<PathBuf>,

    /// Settings the process was started with, compared on reload
    startup: Option<StartupSettings>,
}

impl Engine {
    /// Create an engine around a backend. Covers are added with [`Engine::load`].
    pub fn new(backend: Box<dyn Backend>, state_file: Option<PathBuf>) -> Self {
        let saved = state_file
            .as_deref()
            .map(StateFile::load)
            .unwrap_or_default();

        Self {
            backend: Mutex::new(backend),
            covers: RwLock::new(HashMap::new()),
            saved: Mutex::new(saved),
            state_file,
            startup: None,
        }
    }

    /// Remember what the process was started with so reloads can point out
    /// changes that need a restart
    pub fn with_startup_settings(mut self, startup: StartupSettings) -> Self {
        self.startup = Some(startup);
        self
    }

    /// Connect the backend
    pub async fn start(&self) -> anyhow::Result<()> {
        let mut backend = self.backend.lock().await;
        let name = backend.name().to_string();
        info!("Starting {} backend", name);
        backend
            .start()
            .await
            .map_err(|e| anyhow::anyhow!("backend '{}' failed to start: {}", name, e))
    }

    /// Replace every running cover with the given set
    ///
    /// Covers that are moving are stopped first. A cover whose `unique_id`
    /// survives keeps its last position; new covers start from the state
    /// file, or fully closed.
    pub async fn load(&self, covers: &[CoverConfig], scheduler: &SchedulerConfig) {
        let mut handles = self.covers.write().await;
        let mut saved = self.saved.lock().await;
        stop_all(&mut handles, &mut saved).await;

        let backend = self.backend.lock().await;
        for cover in covers {
            let start = saved.get(&cover.unique_id).unwrap_or(SavedPosition {
                position: 0.0,
                tilt: 0.0,
            });
            let sink = backend.sink(cover);
            let orchestrator = Orchestrator::new(
                cover.settings(scheduler),
                sink,
                start.position,
                start.tilt,
                Instant::now(),
            );
            handles.insert(cover.cover_id.clone(), CoverHandle::spawn(orchestrator));
        }

        info!("{} cover(s) running", handles.len());
    }

    /// Stop every cover, carry positions over and rebuild from configuration
    pub async fn reload(&self, covers: &[CoverConfig], scheduler: &SchedulerConfig) {
        info!("Reloading covers");
        self.load(covers, scheduler).await;
        self.persist().await;
    }

    /// Re-read a configuration file and reload covers from it
    ///
    /// The running covers stay untouched when the file cannot be loaded.
    /// Changes to sections only read at startup are reported as warnings.
    pub async fn reload_from_file(&self, path: &Path) -> Result<Vec<Diagnostic>, ConfigError> {
        let (config, mut diagnostics) = Config::from_file(path)?;

        if let Some(startup) = &self.startup {
            for section in startup.changed_sections(&config.startup_settings()) {
                warn!(
                    "'{}' changed in {}, restart to apply it",
                    section,
                    path.display()
                );
                diagnostics.push(Diagnostic::Warning(Warning::RestartRequired { section }));
            }
        }

        self.reload(&config.covers, &config.scheduler).await;
        Ok(diagnostics)
    }

    /// Stop every cover, persist positions and shut the backend down
    pub async fn shutdown(&self) {
        info!("Engine shutting down");
        {
            let mut handles = self.covers.write().await;
            let mut saved = self.saved.lock().await;
            stop_all(&mut handles, &mut saved).await;
        }
        self.persist().await;

        let mut backend = self.backend.lock().await;
        if let Err(e) = backend.shutdown().await {
            warn!("Backend '{}' shutdown failed: {}", backend.name(), e);
        }
    }

    async fn persist(&self) {
        let Some(path) = &self.state_file else {
            return;
        };
        let saved = self.saved.lock().await;
        if let Err(e) = saved.save(path) {
            error!("Failed to persist cover state: {:#}", e);
        }
    }

    /// Route a command to one cover
    pub async fn request(
        &self,
        cover_id: &str,
        command: CoverCommand,
    ) -> Result<CoverSnapshot, CoverError> {
        let handles = self.covers.read().await;
        let handle = handles
            .get(cover_id)
            .ok_or_else(|| CoverError::NotFound(cover_id.to_string()))?;
        handle.request(command).await
    }

    pub async fn set_position_and_tilt(
        &self,
        cover_id: &str,
        position: Option<f64>,
        tilt: Option<f64>,
    ) -> Result<CoverSnapshot, CoverError> {
        self.request(cover_id, CoverCommand::SetPositionAndTilt { position, tilt })
            .await
    }

    pub async fn set_position(
        &self,
        cover_id: &str,
        position: f64,
    ) -> Result<CoverSnapshot, CoverError> {
        self.set_position_and_tilt(cover_id, Some(position), None).await
    }

    pub async fn set_tilt(&self, cover_id: &str, tilt: f64) -> Result<CoverSnapshot, CoverError> {
        self.set_position_and_tilt(cover_id, None, Some(tilt)).await
    }

    pub async fn open(&self, cover_id: &str) -> Result<CoverSnapshot, CoverError> {
        self.request(cover_id, CoverCommand::Open).await
    }

    pub async fn close(&self, cover_id: &str) -> Result<CoverSnapshot, CoverError> {
        self.request(cover_id, CoverCommand::Close).await
    }

    pub async fn stop(&self, cover_id: &str) -> Result<CoverSnapshot, CoverError> {
        self.request(cover_id, CoverCommand::Stop).await
    }

    /// Apply one request to several covers
    ///
    /// Every cover is tried. Unknown or unavailable ones are logged and
    /// skipped. The range check runs once up front so a bad value never
    /// reaches any cover.
    pub async fn set_position_and_tilt_many(
        &self,
        cover_ids: &[String],
        position: Option<f64>,
        tilt: Option<f64>,
    ) -> Result<Vec<CoverSnapshot>, CoverError> {
        CoverError::check_range("position", position)?;
        CoverError::check_range("tilt", tilt)?;

        let mut snapshots = Vec::with_capacity(cover_ids.len());
        for cover_id in cover_ids {
            match self.set_position_and_tilt(cover_id, position, tilt).await {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(CoverError::NotFound(_)) => {
                    warn!("set_position_and_tilt: unknown cover {}, skipping", cover_id);
                }
                Err(e) => {
                    warn!("set_position_and_tilt: {}, skipping", e);
                }
            }
        }
        Ok(snapshots)
    }

    /// Current state of one cover
    pub async fn get_state(&self, cover_id: &str) -> Result<CoverSnapshot, CoverError> {
        self.covers
            .read()
            .await
            .get(cover_id)
            .map(CoverHandle::snapshot)
            .ok_or_else(|| CoverError::NotFound(cover_id.to_string()))
    }

    /// Current state of every cover, ordered by id
    pub async fn list_states(&self) -> Vec<CoverSnapshot> {
        let mut states: Vec<_> = self
            .covers
            .read()
            .await
            .values()
            .map(CoverHandle::snapshot)
            .collect();
        states.sort_by(|a, b| a.cover_id.cmp(&b.cover_id));
        states
    }
}

/// Stop and remove every cover, remembering where each one ended up
async fn stop_all(handles: &mut HashMap<String, CoverHandle>, saved: &mut StateFile) {
    for (_, handle) in handles.drain() {
        let unique_id = handle.unique_id().to_string();
        let snapshot = handle.shutdown().await;
        saved.insert(unique_id, SavedPosition::from(&snapshot));
    }
}
