pub mod cli;
pub mod commands;
pub mod errors;
pub mod handlers;
pub mod output;
pub mod response;
pub mod router;
pub mod state;
