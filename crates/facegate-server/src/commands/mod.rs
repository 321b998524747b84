use std::any::Any;
use std::process::ExitCode;

use crate::cli::{AuditCommands, Commands, OutputMode};
use crate::errors::ServerResult;

pub trait CommandHandler: Send + Sync {
    fn execute(&self, mode: OutputMode, verbose: bool) -> ServerResult<ExitCode>;
    fn as_any(&self) -> &dyn Any;
}

pub mod audit;
mod serve;

pub use audit::AuditListHandler;
pub use serve::ServeHandler;

impl From<Commands> for Box<dyn CommandHandler> {
    fn from(command: Commands) -> Self {
        match command {
            Commands::Serve(args) => Box::new(ServeHandler::new(args)),
            Commands::Audit(AuditCommands::List(args)) => Box::new(AuditListHandler::new(args)),
        }
    }
}
