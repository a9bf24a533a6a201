//! Application context.
//!
//! [`AppContext`] wires configuration, the SQLite pool, discovered tools and
//! the [`JobOrchestrator`] together. The CLI builds one per invocation.

use std::sync::Arc;

use tf_av::{DurationProbe, FfprobeDurationProbe, ToolRegistry, VariantEncoder};
use tf_core::config::Config;
use tf_core::events::ProgressBroadcaster;
use tf_db::{DbPool, SqliteStateStore};
use tf_pipeline::{JobOrchestrator, OrchestratorOptions};

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub db: DbPool,
    pub tools: Arc<ToolRegistry>,
    pub orchestrator: JobOrchestrator,
}

impl AppContext {
    /// Open the configured database and discover tools.
    pub fn open(config: Config) -> tf_core::Result<Self> {
        for warning in config.validate() {
            tracing::warn!("Config warning: {warning}");
        }

        let db_path = config.storage.db_path.clone();
        let existed = db_path.exists();
        let db = tf_db::init_pool(&db_path)?;
        if existed {
            tracing::debug!("Database opened (existing) at {}", db_path.display());
        } else {
            tracing::info!("Database created (new) at {}", db_path.display());
        }

        let tools = Arc::new(ToolRegistry::discover(&config.tools));
        let probe: Arc<dyn DurationProbe> =
            Arc::new(FfprobeDurationProbe::new(tools.path_or_name("ffprobe")));

        Ok(Self::build(config, db, tools, probe))
    }

    /// Fail variants a previous process left unfinished. Only the process
    /// that runs the pipeline should call this.
    pub async fn recover(&self) -> tf_core::Result<()> {
        let recovered = self.orchestrator.recover_interrupted().await?;
        if !recovered.is_empty() {
            tracing::info!("Recovered {} interrupted job(s)", recovered.len());
        }
        Ok(())
    }

    /// Assemble a context from already-initialized parts.
    pub fn build(
        config: Config,
        db: DbPool,
        tools: Arc<ToolRegistry>,
        probe: Arc<dyn DurationProbe>,
    ) -> Self {
        let encoder = VariantEncoder::new(
            tools.path_or_name("ffmpeg"),
            config.encoding.clone(),
            config.profile_table(),
        )
        .with_threshold(config.pipeline.progress_threshold_pct);

        let orchestrator = JobOrchestrator::new(
            Arc::new(SqliteStateStore::new(db.clone())),
            Arc::new(ProgressBroadcaster::new(config.pipeline.subscriber_buffer)),
            encoder,
            probe,
            OrchestratorOptions::from_config(&config),
        );

        Self {
            config: Arc::new(config),
            db,
            tools,
            orchestrator,
        }
    }
}
