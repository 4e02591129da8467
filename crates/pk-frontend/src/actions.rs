//! Action handling
//!
//! Commands from the input thread are dispatched here, one at a time, on
//! the command loop's thread.

use std::io::Write;
use std::sync::mpsc::Sender;

use crate::app::AppEvent;
use crate::error::AppError;
use crate::state::{AppAction, AppState};
use crate::worker::spawn_rebuild;

const HELP: &str = "\
Commands:
  rebuild [n]   rebuild every symbol, or the first n
  cancel        cancel the running rebuild
  clear         drop every cache entry
  summary       print the feature cache
  reload        re-read the model file
  quit          cancel any rebuild and exit";

/// Context for action handlers
pub struct ActionContext<'a> {
    pub state: &'a mut AppState,
    pub events: &'a Sender<AppEvent>,
    pub out: &'a mut dyn Write,
}

impl<'a> ActionContext<'a> {
    pub fn new(
        state: &'a mut AppState,
        events: &'a Sender<AppEvent>,
        out: &'a mut dyn Write,
    ) -> Self {
        Self { state, events, out }
    }
}

/// Whether the command loop keeps running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Dispatch an action to the appropriate handler
pub fn dispatch_action(action: AppAction, ctx: &mut ActionContext) -> Result<Flow, AppError> {
    match action {
        AppAction::Rebuild(target) => {
            stop_running(ctx)?;
            let model = ctx.state.model()?;
            let events = ctx.events.clone();
            let running = spawn_rebuild(ctx.state.engine(), model, target, move |message| {
                // The loop only goes away at shutdown
                let _ = events.send(AppEvent::Worker(message));
            })?;
            tracing::debug!("Rebuild worker started for session {}", running.session());
            ctx.state.set_running(running);
        }
        AppAction::Cancel => match ctx.state.running() {
            Some(running) => {
                ctx.state.engine().cancel(running.session());
                writeln!(ctx.out, "Cancelling rebuild...")?;
            }
            None => writeln!(ctx.out, "No rebuild running")?,
        },
        AppAction::ClearCache => {
            ctx.state.engine().clear_cache();
            writeln!(ctx.out, "Feature cache cleared")?;
        }
        AppAction::Summary => {
            let cache = ctx.state.engine().cache();
            cache.log_summary();
            writeln!(ctx.out, "{}", cache.summary())?;
        }
        AppAction::Reload => {
            let count = ctx.state.reload()?;
            writeln!(
                ctx.out,
                "Reloaded {} ({} symbols)",
                ctx.state.model_path().display(),
                count
            )?;
        }
        AppAction::Help => writeln!(ctx.out, "{HELP}")?,
        AppAction::Quit => {
            stop_running(ctx)?;
            return Ok(Flow::Quit);
        }
    }
    Ok(Flow::Continue)
}

/// Cancel the running rebuild, if any, and wait for its worker
fn stop_running(ctx: &mut ActionContext) -> Result<(), AppError> {
    if let Some(running) = ctx.state.take_running() {
        if !running.is_finished() {
            ctx.state.engine().cancel(running.session());
            writeln!(ctx.out, "Cancelling previous rebuild")?;
        }
        running.join()?;
    }
    Ok(())
}
