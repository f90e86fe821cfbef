use crate::cli::{
    actions::Action,
    commands::{self, logging},
    dispatch, telemetry,
};
use anyhow::Result;

/// Parse arguments, install the subscriber, and pick the action to run.
///
/// # Errors
/// Returns an error if telemetry cannot be installed or required gate
/// arguments are missing.
pub fn start() -> Result<Action> {
    let matches = commands::new().get_matches();
    telemetry::init(logging::level(&matches))?;
    dispatch::handler(&matches)
}
