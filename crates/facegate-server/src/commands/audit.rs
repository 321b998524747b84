use std::any::Any;
use std::process::ExitCode;

use facegate_config::load_facegate_config;
use facegate_core::audit::AuditEvent;
use facegate_core::JsonlAuditStore;

use crate::cli::{AuditListArgs, OutputMode};
use crate::commands::CommandHandler;
use crate::errors::ServerResult;
use crate::output::render_audit_list;

#[derive(Debug, Clone, PartialEq)]
pub struct AuditListing {
    pub table: String,
    pub events: Vec<AuditEvent>,
}

pub struct AuditListHandler {
    args: AuditListArgs,
    list: Box<dyn Fn(&AuditListArgs) -> ServerResult<AuditListing> + Send + Sync>,
    render: Box<dyn Fn(&AuditListing, OutputMode) -> ServerResult<()> + Send + Sync>,
}

impl AuditListHandler {
    pub fn new(args: AuditListArgs) -> Self {
        Self::with_dependencies(args, list_audit_events, render_audit_list)
    }

    pub fn with_dependencies(
        args: AuditListArgs,
        list: impl Fn(&AuditListArgs) -> ServerResult<AuditListing> + Send + Sync + 'static,
        render: impl Fn(&AuditListing, OutputMode) -> ServerResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            args,
            list: Box::new(list),
            render: Box::new(render),
        }
    }
}

impl CommandHandler for AuditListHandler {
    fn execute(&self, mode: OutputMode, _verbose: bool) -> ServerResult<ExitCode> {
        let listing = (self.list)(&self.args)?;
        (self.render)(&listing, mode)?;
        Ok(ExitCode::SUCCESS)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Reads the configured audit table, or the one named by `--table`.
pub fn list_audit_events(args: &AuditListArgs) -> ServerResult<AuditListing> {
    let config = load_facegate_config(args.config.as_deref())?;
    let table = args
        .table
        .clone()
        .unwrap_or_else(|| config.service.audit_table.clone());
    let store = JsonlAuditStore::new(&config.runtime.audit_root);
    let events = store.read_events(&table, args.subject.as_deref())?;
    Ok(AuditListing { table, events })
}
