use std::io;
use std::process::ExitCode;

use facegate_config::ConfigError;
use facegate_core::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    App(#[from] AppError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("HTTP server terminated unexpectedly: {0}")]
    Serve(#[source] io::Error),

    #[error("failed to start async runtime: {0}")]
    Runtime(#[source] io::Error),

    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

impl ServerError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            ServerError::App(err) => err.exit_code(),
            ServerError::Bind { .. } => ExitCode::from(4),
            _ => ExitCode::from(1),
        }
    }

    pub fn human_message(&self) -> String {
        match self {
            ServerError::App(err) => err.human_message(),
            other => other.to_string(),
        }
    }
}

impl From<ConfigError> for ServerError {
    fn from(err: ConfigError) -> Self {
        ServerError::App(AppError::from(err))
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::App(AppError::from(err))
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
