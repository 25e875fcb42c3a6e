//! Application state wiring the engine together.
//!
//! AppState holds the run controller and resolved configuration used by both
//! CLI commands and REST API handlers. The controller is pinned to the SQLite
//! repository here; tests swap in the in-memory one.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use stepwise_core::event::EventBus;
use stepwise_core::repository::BoxWorkflowRepository;
use stepwise_core::workflow::{PollOptions, RunController};
use stepwise_infra::config::{
    load_engine_config, resolve_data_dir, resolve_database_url, resolve_workflows_dir,
};
use stepwise_infra::sqlite::{DatabasePool, SqliteWorkflowRepository};
use stepwise_types::config::EngineConfig;

use crate::workflows;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub controller: RunController,
    pub config: Arc<EngineConfig>,
    pub data_dir: PathBuf,
    /// Default polling for endpoints and commands that wait for a run.
    pub poll: PollOptions,
}

impl AppState {
    /// Initialize the application state: load config, connect to the
    /// database and register workflows.
    pub async fn init(config_path: Option<&Path>) -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();

        // Ensure data directory exists
        tokio::fs::create_dir_all(&data_dir).await?;

        let config = load_engine_config(config_path).await;
        let db_url = resolve_database_url(&config, &data_dir);
        let db_pool = DatabasePool::new(&db_url).await?;
        tracing::debug!(url = %db_url, "database ready");

        let repo = BoxWorkflowRepository::new(SqliteWorkflowRepository::new(db_pool));
        Self::with_repository(repo, config, data_dir)
    }

    /// Build the state around an already-open repository.
    pub fn with_repository(
        repo: BoxWorkflowRepository,
        config: EngineConfig,
        data_dir: PathBuf,
    ) -> anyhow::Result<Self> {
        let targets = workflows::builtin_targets();
        let mut registry = workflows::builtin_workflows(&targets)?;
        let workflows_dir = resolve_workflows_dir(&config, &data_dir);
        workflows::load_workflow_dir(&mut registry, &targets, &workflows_dir);

        let events = EventBus::new(config.engine.event_capacity);
        let controller = RunController::new(repo, registry, targets, events);
        let poll = PollOptions::from(&config.poll);

        Ok(Self {
            controller,
            config: Arc::new(config),
            data_dir,
            poll,
        })
    }

    /// Re-drive runs left pending or running by an earlier process, when
    /// `engine.resume_on_startup` is set.
    pub async fn resume_unfinished(&self) -> anyhow::Result<usize> {
        if !self.config.engine.resume_on_startup {
            return Ok(0);
        }
        let resumed = self.controller.recover_unfinished().await?;
        if resumed > 0 {
            tracing::info!(count = resumed, "resumed unfinished runs");
        }
        Ok(resumed)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::time::Duration;
    use stepwise_core::repository::InMemoryWorkflowRepository;

    /// State over an in-memory repository with fast polling.
    pub fn in_memory_state() -> AppState {
        let dir = tempfile::tempdir().unwrap();
        let mut state = AppState::with_repository(
            BoxWorkflowRepository::new(InMemoryWorkflowRepository::new()),
            EngineConfig::default(),
            dir.path().to_path_buf(),
        )
        .unwrap();
        state.poll = PollOptions {
            interval: Duration::from_millis(10),
            timeout: Duration::from_secs(15),
        };
        state
    }
}
