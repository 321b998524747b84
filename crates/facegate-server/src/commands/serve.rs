use std::any::Any;
use std::process::ExitCode;
use std::sync::Arc;

use facegate_config::{load_facegate_config, FacegateConfig};
use tracing::info;

use crate::cli::{OutputMode, ServeArgs};
use crate::commands::CommandHandler;
use crate::errors::{ServerError, ServerResult};
use crate::router::run_server;
use crate::state::AppState;

type LoadConfig = dyn Fn(&ServeArgs) -> ServerResult<FacegateConfig> + Send + Sync;
type Serve = dyn Fn(&str, Arc<AppState>) -> ServerResult<()> + Send + Sync;

pub struct ServeHandler {
    args: ServeArgs,
    load: Box<LoadConfig>,
    serve: Box<Serve>,
}

impl ServeHandler {
    pub fn new(args: ServeArgs) -> Self {
        Self::with_dependencies(args, default_load, serve_blocking)
    }

    pub fn with_dependencies(
        args: ServeArgs,
        load: impl Fn(&ServeArgs) -> ServerResult<FacegateConfig> + Send + Sync + 'static,
        serve: impl Fn(&str, Arc<AppState>) -> ServerResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            args,
            load: Box::new(load),
            serve: Box::new(serve),
        }
    }
}

impl CommandHandler for ServeHandler {
    fn execute(&self, _mode: OutputMode, _verbose: bool) -> ServerResult<ExitCode> {
        let config = (self.load)(&self.args)?;
        match &config.source {
            Some(path) => info!(target: "serve.config", "Loaded configuration from {}", path.display()),
            None => info!(
                target: "serve.config",
                "No config file found; using environment variables only"
            ),
        }
        let addr = self
            .args
            .bind
            .clone()
            .unwrap_or_else(|| config.runtime.bind_addr.clone());
        info!(
            target: "serve.config",
            "collection={} table={} threshold={} storage={}",
            config.service.collection_id,
            config.service.audit_table,
            config.service.threshold,
            config.runtime.storage_root.display()
        );

        let state = Arc::new(AppState::from_config(&config)?);
        (self.serve)(&addr, state)?;
        Ok(ExitCode::SUCCESS)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn default_load(args: &ServeArgs) -> ServerResult<FacegateConfig> {
    Ok(load_facegate_config(args.config.as_deref())?)
}

fn serve_blocking(addr: &str, state: Arc<AppState>) -> ServerResult<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(ServerError::Runtime)?;
    runtime.block_on(run_server(addr, state))
}
