//! Command dispatch: bridges CLI args -> controller calls -> output formatting.

pub mod class;
pub mod push;
pub mod search;
pub mod show;
pub mod util;
pub mod watch;

use acikit_core::ControllerConfig;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a controller-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    config: ControllerConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Class(args) => class::handle(config, args, global).await,
        Command::Show(args) => show::handle(config, args, global).await,
        Command::Push(args) => push::handle(config, args, global).await,
        Command::Watch(args) => watch::handle(config, args, global).await,
        Command::Search(args) => search::handle(config, args, global).await,
        // Completions never reach a controller
        Command::Completions(_) => Ok(()),
    }
}
