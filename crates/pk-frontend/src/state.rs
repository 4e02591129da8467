//! Application state module

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pk_cad::{Engine, FeatureRegistry, Model, ModelRequest, RebuildOutcome, RebuildTarget};

use crate::error::AppError;
use crate::worker::RunningRebuild;

/// Commands accepted by the interactive loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppAction {
    /// Rebuild every symbol, or the first `n` (rebuild up to the cursor)
    Rebuild(RebuildTarget),
    /// Cancel the running rebuild
    Cancel,
    /// Drop every cache entry
    ClearCache,
    /// Print the cache report
    Summary,
    /// Re-read the model file from disk
    Reload,
    Help,
    Quit,
}

impl AppAction {
    /// Parse one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, AppError> {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return Ok(None);
        };

        let action = match command {
            "rebuild" | "r" => match words.next() {
                None => AppAction::Rebuild(RebuildTarget::All),
                Some(count) => {
                    let count = count.parse().map_err(|_| {
                        AppError::InvalidCommand(format!("'{count}' is not a symbol count"))
                    })?;
                    AppAction::Rebuild(RebuildTarget::UpTo(count))
                }
            },
            "cancel" | "c" => AppAction::Cancel,
            "clear" => AppAction::ClearCache,
            "summary" | "s" => AppAction::Summary,
            "reload" => AppAction::Reload,
            "help" | "?" => AppAction::Help,
            "quit" | "exit" | "q" => AppAction::Quit,
            other => {
                return Err(AppError::InvalidCommand(format!(
                    "Unknown command '{other}', type 'help' for a list"
                )));
            }
        };

        if let Some(extra) = words.next() {
            return Err(AppError::InvalidCommand(format!(
                "Unexpected argument '{extra}' for '{command}'"
            )));
        }
        Ok(Some(action))
    }
}

/// Everything the command loop works on
///
/// The model is kept as source text. Each rebuild resolves it again, so
/// file stamps are re-captured and edited imports get new hashes while
/// unchanged features come straight from the cache.
pub struct AppState {
    model_path: PathBuf,
    source: String,
    engine: Engine,
    registry: Arc<FeatureRegistry>,
    running: Option<RunningRebuild>,
    last_outcome: Option<RebuildOutcome>,
}

impl AppState {
    pub fn load(
        model_path: impl Into<PathBuf>,
        engine: Engine,
        registry: Arc<FeatureRegistry>,
    ) -> Result<Self, AppError> {
        let mut state = Self {
            model_path: model_path.into(),
            source: String::new(),
            engine,
            registry,
            running: None,
            last_outcome: None,
        };
        state.reload()?;
        Ok(state)
    }

    /// Re-read the model file; keeps the previous text if the new one does not parse
    pub fn reload(&mut self) -> Result<usize, AppError> {
        let source = std::fs::read_to_string(&self.model_path)?;
        let request = ModelRequest::from_ron_str(&source)?;
        self.source = source;
        tracing::info!(
            "Loaded {} ({} symbols)",
            self.model_path.display(),
            request.symbols.len()
        );
        Ok(request.symbols.len())
    }

    /// Resolve the current model text into fresh, unbuilt nodes
    pub fn model(&self) -> Result<Model, AppError> {
        let request = ModelRequest::from_ron_str(&self.source)?;
        Ok(Model::from_request(&request, &self.registry)?)
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn is_rebuilding(&self) -> bool {
        self.running.is_some()
    }

    pub fn running(&self) -> Option<&RunningRebuild> {
        self.running.as_ref()
    }

    pub fn set_running(&mut self, running: RunningRebuild) {
        self.running = Some(running);
    }

    pub fn take_running(&mut self) -> Option<RunningRebuild> {
        self.running.take()
    }

    pub fn last_outcome(&self) -> Option<&RebuildOutcome> {
        self.last_outcome.as_ref()
    }

    pub fn set_last_outcome(&mut self, outcome: RebuildOutcome) {
        self.last_outcome = Some(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            AppAction::parse("rebuild").unwrap(),
            Some(AppAction::Rebuild(RebuildTarget::All))
        );
        assert_eq!(
            AppAction::parse("  r 3 ").unwrap(),
            Some(AppAction::Rebuild(RebuildTarget::UpTo(3)))
        );
        assert_eq!(AppAction::parse("clear").unwrap(), Some(AppAction::ClearCache));
        assert_eq!(AppAction::parse("q").unwrap(), Some(AppAction::Quit));
        assert_eq!(AppAction::parse("   ").unwrap(), None);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            AppAction::parse("rebuild x"),
            Err(AppError::InvalidCommand(_))
        ));
        assert!(matches!(
            AppAction::parse("cancel now"),
            Err(AppError::InvalidCommand(_))
        ));
        let err = AppAction::parse("explode").unwrap_err();
        assert!(err.to_string().contains("'explode'"));
    }
}
