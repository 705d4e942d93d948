//! Application state owned by the UI loop.

use std::sync::Arc;

use crossterm::event::KeyEvent;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::host::Host;
use crate::runner::CommandRunner;
use crate::sequencer::{BatchEvent, CommandBatch, Sequencer};
use crate::session::{LogEntry, Session};
use crate::wizard::{self, Outcome, WizardContext};

/// Everything the UI loop reacts to, in arrival order
#[derive(Debug)]
pub enum AppEvent {
    Key(KeyEvent),
    Resize,
    Tick,
    Batch(BatchEvent),
}

impl From<BatchEvent> for AppEvent {
    fn from(event: BatchEvent) -> Self {
        Self::Batch(event)
    }
}

pub struct App {
    pub session: Session,
    settings: Settings,
    host: Arc<dyn Host>,
    sequencer: Sequencer,
    events: UnboundedSender<AppEvent>,
    batch_task: Option<JoinHandle<()>>,
    /// Animation counter for the spinner
    pub tick: u64,
}

impl App {
    pub fn new(
        settings: Settings,
        host: Arc<dyn Host>,
        runner: Arc<dyn CommandRunner>,
        events: UnboundedSender<AppEvent>,
    ) -> Self {
        let mut session = Session::new();
        if let Err(e) = host.ensure_dir(&settings.cert_dir) {
            error!(error = %e, "Could not create certificate directory");
            session.push_log(LogEntry::error(format!("An error occurred: {e}")));
        }

        Self {
            session,
            sequencer: Sequencer::new(runner, Arc::clone(&host)),
            settings,
            host,
            events,
            batch_task: None,
            tick: 0,
        }
    }

    pub fn should_quit(&self) -> bool {
        self.session.quit
    }

    pub fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::Key(key) => {
                let ctx = WizardContext {
                    host: self.host.as_ref(),
                    settings: &self.settings,
                };
                match wizard::handle_input(&mut self.session, key.code, key.modifiers, &ctx) {
                    Outcome::Continue => {}
                    Outcome::Quit => self.shutdown(),
                    Outcome::Dispatch(batch) => self.dispatch(batch),
                }
            }
            AppEvent::Tick => self.tick = self.tick.wrapping_add(1),
            // Next draw picks up the new size
            AppEvent::Resize => {}
            AppEvent::Batch(event) => {
                let complete = matches!(event, BatchEvent::BatchComplete { .. });
                self.session.apply_batch_event(event);
                if complete {
                    self.batch_task = None;
                }
            }
        }
    }

    fn dispatch(&mut self, batch: CommandBatch) {
        info!(title = %batch.title, steps = batch.len(), "Dispatching batch");
        self.session.begin_batch(&batch.title);

        let sequencer = self.sequencer.clone();
        let events = self.events.clone();
        self.batch_task = Some(tokio::spawn(async move {
            sequencer.run_batch(batch, &events).await;
        }));
    }

    /// Abandon a running batch. Its children are killed when their handles
    /// drop, at the latest when the runtime shuts down.
    pub fn shutdown(&mut self) {
        if let Some(task) = self.batch_task.take() {
            warn!("Quitting while a batch is running");
            task.abort();
        }
    }
}
