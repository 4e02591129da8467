//! Main application module

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use pk_cad::{AnalyticKernel, Engine, FeatureRegistry, RebuildOutcome, RebuildTarget};
use pk_core::Config;

use crate::actions::{ActionContext, Flow, dispatch_action};
use crate::error::AppError;
use crate::report::{RebuildReport, format_event, format_outcome};
use crate::state::{AppAction, AppState};
use crate::worker::WorkerMessage;

/// Everything the command loop reacts to
#[derive(Debug)]
pub enum AppEvent {
    /// A line typed by the user
    Input(String),
    /// The input stream ended
    InputClosed,
    Worker(WorkerMessage),
}

pub struct App {
    state: AppState,
}

impl App {
    /// Load the model and set up an engine with the analytic kernel
    pub fn new(model_path: &Path, config: &Config) -> Result<Self, AppError> {
        let engine = Engine::from_config(config, Arc::new(AnalyticKernel::new()));
        let registry = Arc::new(FeatureRegistry::with_builtins());
        Ok(Self {
            state: AppState::load(model_path, engine, registry)?,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Rebuild once on the calling thread and print a report
    ///
    /// Returns whether every targeted symbol was built.
    pub fn run_batch(
        &mut self,
        target: RebuildTarget,
        json: bool,
        out: &mut dyn Write,
    ) -> Result<bool, AppError> {
        let model = self.state.model()?;
        let engine = self.state.engine();
        let session = engine.begin_session();

        let mut events = Vec::new();
        let outcome = model.rebuild(&session, target, &mut |event| events.push(event));
        drop(session);

        let summary = engine.cache().summary();
        if json {
            let report = RebuildReport::new(&events, &outcome, summary);
            serde_json::to_writer_pretty(&mut *out, &report)?;
            writeln!(out)?;
        } else {
            for event in &events {
                writeln!(out, "{}", format_event(event))?;
            }
            writeln!(out, "{}", format_outcome(&outcome))?;
            writeln!(out, "{summary}")?;
        }

        let success = outcome.is_success();
        self.state.set_last_outcome(outcome);
        Ok(success)
    }

    /// Run the interactive command loop
    ///
    /// Lines from `input` are read on their own thread. Rebuilds run on
    /// worker threads and report back through the same channel, so this
    /// loop never blocks on a build. When the input ends, a running
    /// rebuild is allowed to finish.
    pub fn run_interactive<R>(
        &mut self,
        input: R,
        initial: RebuildTarget,
        out: &mut dyn Write,
    ) -> Result<(), AppError>
    where
        R: BufRead + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        spawn_input_reader(input, tx.clone())?;

        writeln!(
            out,
            "pk: {} loaded. Type 'help' for commands.",
            self.state.model_path().display()
        )?;
        self.dispatch(AppAction::Rebuild(initial), &tx, out)?;

        while let Ok(event) = rx.recv() {
            match event {
                AppEvent::Input(line) => match AppAction::parse(&line) {
                    Ok(Some(action)) => {
                        if self.dispatch(action, &tx, out)? == Flow::Quit {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(err) => writeln!(out, "{err}")?,
                },
                AppEvent::InputClosed => {
                    self.finish_pending(&rx, out)?;
                    break;
                }
                AppEvent::Worker(message) => self.handle_worker(message, out)?,
            }
        }
        Ok(())
    }

    /// Dispatch one action; command failures are reported and the loop goes on
    fn dispatch(
        &mut self,
        action: AppAction,
        tx: &Sender<AppEvent>,
        out: &mut dyn Write,
    ) -> Result<Flow, AppError> {
        let mut ctx = ActionContext::new(&mut self.state, tx, out);
        match dispatch_action(action, &mut ctx) {
            Ok(flow) => Ok(flow),
            Err(AppError::Io(err)) => Err(AppError::Io(err)),
            Err(err) => {
                tracing::warn!("Command failed: {}", err);
                writeln!(out, "Error: {err}")?;
                Ok(Flow::Continue)
            }
        }
    }

    fn handle_worker(
        &mut self,
        message: WorkerMessage,
        out: &mut dyn Write,
    ) -> Result<(), AppError> {
        match message {
            WorkerMessage::Event(_, event) => writeln!(out, "{}", format_event(&event))?,
            WorkerMessage::Finished(session, outcome) => {
                writeln!(out, "{}", format_outcome(&outcome))?;
                let current = self.state.running().map(|r| r.session());
                if current == Some(session) {
                    if let Some(running) = self.state.take_running() {
                        running.join()?;
                    }
                    self.record(outcome);
                } else if current.is_none() {
                    self.record(outcome);
                }
            }
        }
        Ok(())
    }

    fn record(&mut self, outcome: RebuildOutcome) {
        if let RebuildOutcome::Aborted(err) = &outcome {
            tracing::error!("Rebuild aborted, cache contents are suspect: {}", err);
        }
        self.state.set_last_outcome(outcome);
    }

    /// Wait for a running rebuild and print what it still has to say
    fn finish_pending(
        &mut self,
        rx: &Receiver<AppEvent>,
        out: &mut dyn Write,
    ) -> Result<(), AppError> {
        if let Some(running) = self.state.take_running() {
            running.join()?;
        }
        // Workers have exited, so their messages are all queued
        for event in rx.try_iter() {
            if let AppEvent::Worker(message) = event {
                self.handle_worker(message, out)?;
            }
        }
        Ok(())
    }
}

fn spawn_input_reader<R>(input: R, tx: Sender<AppEvent>) -> Result<(), AppError>
where
    R: BufRead + Send + 'static,
{
    thread::Builder::new()
        .name("input".to_string())
        .spawn(move || {
            for line in input.lines() {
                match line {
                    Ok(line) => {
                        if tx.send(AppEvent::Input(line)).is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        tracing::warn!("Failed to read input: {}", err);
                        break;
                    }
                }
            }
            let _ = tx.send(AppEvent::InputClosed);
        })?;
    Ok(())
}
