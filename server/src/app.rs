//! Process wiring: opens storage, builds the services and runs them.

use anyhow::{Context, Result};
use specforge_browser::{BrowserEngine, SessionProvider};
use specforge_cache::{CacheStore, NormalizationPass, Normalizer, PassReport};
use specforge_core::AppConfig;
use specforge_db::{Catalog, Database, SqliteCatalog};
use specforge_gateway::{Gateway, Handlers, Previewer};
use specforge_queue::{spawn_reaper, JobQueue, ReapReport, Worker, WorkerPool};
use specforge_scraper::ScrapeExecutor;
use specforge_search::SearchPipeline;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Every long-lived service of the daemon.
pub struct App {
    config: AppConfig,
    db: Database,
    catalog: Arc<dyn Catalog>,
    queue: Arc<JobQueue>,
    search: Arc<SearchPipeline>,
    executor: Arc<ScrapeExecutor>,
    cache: CacheStore,
}

impl App {
    /// Validate `config`, open the database and build the services.
    ///
    /// Configuration errors abort here, before anything is started.
    pub async fn open(config: AppConfig) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let path = config.database_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let db = Database::new(&path, config.database.max_connections)
            .await
            .with_context(|| format!("opening database at {}", path.display()))?;
        db.run_migrations().await.context("running migrations")?;

        let search = SearchPipeline::from_config(&config).context("building search pipeline")?;
        let sessions: Arc<dyn SessionProvider> =
            Arc::new(BrowserEngine::new(config.browser.clone()));
        info!(
            "Browser sessions: {:?} mode, {} worker(s)",
            config.browser.mode, config.workers.count
        );

        Ok(Self::assemble(config, db, Arc::new(search), sessions))
    }

    /// Build the services over an open database and explicit collaborators.
    #[must_use]
    pub fn assemble(
        config: AppConfig,
        db: Database,
        search: Arc<SearchPipeline>,
        sessions: Arc<dyn SessionProvider>,
    ) -> Self {
        let catalog: Arc<dyn Catalog> = Arc::new(SqliteCatalog::new(db.pool().clone()));
        let queue = Arc::new(JobQueue::from_config(db.clone(), catalog.clone(), &config));
        let executor = Arc::new(ScrapeExecutor::new(sessions, &config.browser));
        let cache = CacheStore::new(db.clone(), config.source.name.clone());

        Self {
            config,
            db,
            catalog,
            queue,
            search,
            executor,
            cache,
        }
    }

    /// The job queue.
    #[must_use]
    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Recover from the previous run, then start workers, the reaper and
    /// the gateway. Everything stops when `shutdown` is tripped.
    pub async fn start(self, shutdown: CancellationToken) -> Result<Running> {
        let recovered = self
            .queue
            .recover_after_restart()
            .await
            .context("recovering jobs from the previous run")?;
        if !recovered.is_empty() {
            info!(
                "Startup recovery released {} claim(s), requeued {} job(s), interrupted {}",
                recovered.released_claims,
                recovered.requeued.len(),
                recovered.interrupted.len()
            );
        }

        let workers = (0..self.config.workers.count)
            .map(|id| {
                Worker::new(
                    id,
                    self.queue.clone(),
                    self.search.clone(),
                    self.executor.clone(),
                    self.cache.clone(),
                )
            })
            .collect();
        let pool = WorkerPool::spawn(workers, &shutdown);
        let reaper = spawn_reaper(self.queue.clone(), shutdown.clone());

        let previewer = Previewer::new(
            self.executor.clone(),
            self.catalog.clone(),
            self.cache.clone(),
            self.config.source.clone(),
        );
        let handlers = Handlers::new(self.queue.clone(), previewer);
        let gateway = Gateway::bind(&self.config.gateway, handlers)
            .await
            .with_context(|| format!("binding gateway to {}", self.config.gateway.bind_addr))?;
        let addr = gateway.local_addr()?;
        let gateway = tokio::spawn(gateway.serve(shutdown));

        Ok(Running {
            addr,
            gateway,
            pool,
            reaper,
            db: self.db,
        })
    }

    /// Run one normalization pass, or all of them in order.
    pub async fn normalize(&self, pass: Option<&str>) -> Result<Vec<PassReport>> {
        let normalizer = Normalizer::new(self.db.clone(), self.config.snapshot_dir()?);
        let reports = match pass {
            Some(name) => {
                let pass: NormalizationPass = name.parse()?;
                vec![normalizer.run(pass).await?]
            }
            None => normalizer.run_all().await?,
        };
        for report in &reports {
            info!(
                "Pass {} scanned {} row(s), changed {}",
                report.pass, report.rows_scanned, report.rows_changed
            );
        }
        Ok(reports)
    }

    /// Run the reaper once.
    pub async fn reap(&self) -> Result<ReapReport> {
        Ok(self.queue.reap_stale().await?)
    }
}

/// Handles to the running daemon.
pub struct Running {
    addr: SocketAddr,
    gateway: JoinHandle<specforge_gateway::Result<()>>,
    pool: WorkerPool,
    reaper: JoinHandle<()>,
    db: Database,
}

impl Running {
    /// Address the gateway is listening on.
    #[must_use]
    pub fn gateway_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait for every service to stop after shutdown was requested.
    pub async fn wait(self) -> Result<()> {
        let gateway = self.gateway.await.context("gateway task panicked")?;
        self.pool.join().await;
        if let Err(e) = self.reaper.await {
            tracing::error!("Reaper task failed: {}", e);
        }
        self.db.close().await;
        gateway?;
        info!("Shutdown complete");
        Ok(())
    }
}
