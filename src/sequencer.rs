//! Command Sequencer
//!
//! Executes a [`CommandBatch`] one step at a time and forwards every event into
//! the UI event stream. Step N+1 starts only after step N's last event has been
//! sent. Failing commands are reported and the batch continues; a failing
//! filesystem step marked fatal stops the batch.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::host::{Host, HostError};
use crate::runner::{CommandRunner, RunnerEvent, Stream};
use crate::session::{LogEntry, Severity};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Log(LogEntry),
    Run { command: String },
    WriteFile { path: PathBuf, content: String },
    /// Copy an operator-supplied file into place, replacing nothing
    CopyFile { from: PathBuf, to: PathBuf },
    /// A `required` removal stops the batch when it fails
    RemoveFile { path: PathBuf, required: bool },
    RemoveDir { path: PathBuf },
}

impl Step {
    fn is_fatal_on_failure(&self) -> bool {
        match self {
            Self::Log(_) | Self::Run { .. } => false,
            Self::RemoveFile { required, .. } => *required,
            Self::WriteFile { .. } | Self::CopyFile { .. } | Self::RemoveDir { .. } => true,
        }
    }
}

/// An ordered list of steps with a title for the header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandBatch {
    pub title: String,
    steps: Vec<Step>,
}

impl CommandBatch {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn log(self, text: impl Into<String>, severity: Severity) -> Self {
        self.step(Step::Log(LogEntry::new(text, severity)))
    }

    pub fn run(self, command: impl Into<String>) -> Self {
        self.step(Step::Run {
            command: command.into(),
        })
    }

    /// Append another batch's steps, keeping this batch's title.
    pub fn then(mut self, other: CommandBatch) -> Self {
        self.steps.extend(other.steps);
        self
    }

    #[cfg(test)]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// The command lines in execution order
    #[cfg(test)]
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().filter_map(|step| match step {
            Step::Run { command } => Some(command.as_str()),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEvent {
    LineReceived(LogEntry),
    StepSucceeded { step: usize },
    StepFailed { step: usize, error: String, fatal: bool },
    BatchComplete { failures: usize, aborted: bool },
}

enum StepOutcome {
    Succeeded,
    Failed(String),
    /// The event receiver is gone
    Disconnected,
}

/// Stateless between batches; clone freely.
#[derive(Clone)]
pub struct Sequencer {
    runner: Arc<dyn CommandRunner>,
    host: Arc<dyn Host>,
}

impl Sequencer {
    pub fn new(runner: Arc<dyn CommandRunner>, host: Arc<dyn Host>) -> Self {
        Self { runner, host }
    }

    /// Run every step in order, sending events to `tx`.
    ///
    /// Returns early without `BatchComplete` when the receiver is dropped.
    pub async fn run_batch<E>(&self, batch: CommandBatch, tx: &UnboundedSender<E>)
    where
        E: From<BatchEvent>,
    {
        info!(title = %batch.title, steps = batch.len(), "Starting batch");
        let emit = |event: BatchEvent| tx.send(E::from(event)).is_ok();

        let mut failures = 0;
        let mut aborted = false;

        for (index, step) in batch.steps.iter().enumerate() {
            let outcome = match step {
                Step::Log(entry) => {
                    if emit(BatchEvent::LineReceived(entry.clone())) {
                        StepOutcome::Succeeded
                    } else {
                        StepOutcome::Disconnected
                    }
                }
                Step::Run { command } => self.run_command(command, &emit).await,
                Step::WriteFile { path, content } => {
                    let (path, content) = (path.clone(), content.clone());
                    self.file_step(move |host| host.write_config(&path, &content))
                        .await
                }
                Step::CopyFile { from, to } => {
                    let (from, to) = (from.clone(), to.clone());
                    self.file_step(move |host| host.copy_file(&from, &to)).await
                }
                Step::RemoveFile { path, .. } => {
                    let path = path.clone();
                    self.file_step(move |host| host.remove_file(&path)).await
                }
                Step::RemoveDir { path } => {
                    let path = path.clone();
                    self.file_step(move |host| host.remove_dir(&path)).await
                }
            };

            match outcome {
                StepOutcome::Succeeded => {
                    if !emit(BatchEvent::StepSucceeded { step: index }) {
                        debug!("Event receiver dropped, stopping batch");
                        return;
                    }
                }
                StepOutcome::Failed(error) => {
                    failures += 1;
                    let fatal = step.is_fatal_on_failure();
                    warn!(step = index, fatal, %error, "Batch step failed");
                    if !emit(BatchEvent::StepFailed {
                        step: index,
                        error,
                        fatal,
                    }) {
                        return;
                    }
                    if fatal {
                        aborted = true;
                        break;
                    }
                }
                StepOutcome::Disconnected => {
                    debug!("Event receiver dropped, stopping batch");
                    return;
                }
            }
        }

        info!(title = %batch.title, failures, aborted, "Batch finished");
        emit(BatchEvent::BatchComplete { failures, aborted });
    }

    async fn run_command<F>(&self, command: &str, emit: &F) -> StepOutcome
    where
        F: Fn(BatchEvent) -> bool,
    {
        debug!(%command, "Running command");
        if !emit(BatchEvent::LineReceived(LogEntry::info(format!("$ {command}")))) {
            return StepOutcome::Disconnected;
        }

        let mut events = self.runner.run(command);
        while let Some(event) = events.recv().await {
            match event {
                RunnerEvent::Line { stream, text } => {
                    let entry = match stream {
                        Stream::Stdout => LogEntry::output(text),
                        Stream::Stderr => LogEntry::new(text, Severity::Warning),
                    };
                    if !emit(BatchEvent::LineReceived(entry)) {
                        return StepOutcome::Disconnected;
                    }
                }
                RunnerEvent::Exited(Ok(())) => return StepOutcome::Succeeded,
                RunnerEvent::Exited(Err(e)) => {
                    return StepOutcome::Failed(format!("`{command}` failed: {e}"));
                }
            }
        }
        StepOutcome::Failed(format!("`{command}` ended without an exit status"))
    }

    /// Filesystem work runs on the blocking pool.
    async fn file_step<F>(&self, op: F) -> StepOutcome
    where
        F: FnOnce(&dyn Host) -> Result<(), HostError> + Send + 'static,
    {
        let host = Arc::clone(&self.host);
        match tokio::task::spawn_blocking(move || op(host.as_ref())).await {
            Ok(Ok(())) => StepOutcome::Succeeded,
            Ok(Err(e)) => StepOutcome::Failed(format!("An error occurred: {e}")),
            Err(e) => StepOutcome::Failed(format!("An error occurred: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeHost, ScriptedRunner};
    use tokio::sync::mpsc;

    async fn run(batch: CommandBatch, runner: ScriptedRunner, host: FakeHost) -> Vec<BatchEvent> {
        let sequencer = Sequencer::new(Arc::new(runner), Arc::new(host));
        let (tx, mut rx) = mpsc::unbounded_channel::<BatchEvent>();
        sequencer.run_batch(batch, &tx).await;
        drop(tx);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn lines(events: &[BatchEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|event| match event {
                BatchEvent::LineReceived(entry) => Some(entry.text.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn steps_never_interleave() {
        let runner = ScriptedRunner::new()
            .script("step1", &["1.1", "1.2", "1.3"], true)
            .script("step2", &["2.1", "2.2"], true)
            .script("step3", &["3.1", "3.2", "3.3"], true);
        let batch = CommandBatch::new("ordering")
            .run("step1")
            .run("step2")
            .log("between", Severity::Info)
            .run("step3");

        let events = run(batch, runner, FakeHost::default()).await;

        assert_eq!(
            lines(&events),
            [
                "$ step1", "1.1", "1.2", "1.3", "$ step2", "2.1", "2.2", "between", "$ step3",
                "3.1", "3.2", "3.3"
            ]
        );
        assert_eq!(
            events.last(),
            Some(&BatchEvent::BatchComplete {
                failures: 0,
                aborted: false
            })
        );
    }

    #[tokio::test]
    async fn failing_command_does_not_stop_the_batch() {
        let runner = ScriptedRunner::new()
            .script("ufw allow 9011/tcp", &["Rule added"], true)
            .script("ufw allow 22/tcp", &["ERROR: bad port"], false)
            .script("ufw allow 80/tcp", &["Rule added"], true);
        let batch = CommandBatch::new("ports")
            .run("ufw allow 9011/tcp")
            .run("ufw allow 22/tcp")
            .run("ufw allow 80/tcp")
            .log("All is done.", Severity::Success);

        let events = run(batch, runner.clone(), FakeHost::default()).await;

        let failures: Vec<_> = events
            .iter()
            .filter(|event| matches!(event, BatchEvent::StepFailed { .. }))
            .collect();
        assert_eq!(
            failures,
            [&BatchEvent::StepFailed {
                step: 1,
                error: "`ufw allow 22/tcp` failed: exited with status 1".into(),
                fatal: false,
            }]
        );
        assert_eq!(
            runner.calls(),
            ["ufw allow 9011/tcp", "ufw allow 22/tcp", "ufw allow 80/tcp"]
        );
        assert_eq!(lines(&events).last().map(String::as_str), Some("All is done."));
        assert_eq!(
            events.last(),
            Some(&BatchEvent::BatchComplete {
                failures: 1,
                aborted: false
            })
        );
    }

    #[tokio::test]
    async fn failed_write_aborts_remaining_steps() {
        let runner = ScriptedRunner::new();
        let host = FakeHost::default().failing_writes();
        let batch = CommandBatch::new("add config")
            .step(Step::WriteFile {
                path: "/etc/nginx/conf.d/edge1.conf".into(),
                content: "upstream edge1 {}".into(),
            })
            .run("nginx -t")
            .log("All is done.", Severity::Success);

        let events = run(batch, runner.clone(), host).await;

        assert!(runner.calls().is_empty());
        assert!(matches!(
            events.first(),
            Some(BatchEvent::StepFailed {
                step: 0,
                fatal: true,
                ..
            })
        ));
        assert_eq!(
            events.last(),
            Some(&BatchEvent::BatchComplete {
                failures: 1,
                aborted: true
            })
        );
        assert!(!lines(&events).contains(&"All is done.".to_string()));
    }

    #[tokio::test]
    async fn failed_copy_skips_the_key() {
        let host = FakeHost::default().with_file("/root/upload/cert.pem");
        let batch = CommandBatch::new("add certificate")
            .step(Step::CopyFile {
                from: "/root/upload/missing.pem".into(),
                to: "/etc/ssl/files/shop.crt".into(),
            })
            .step(Step::CopyFile {
                from: "/root/upload/cert.pem".into(),
                to: "/etc/ssl/files/shop.key".into(),
            })
            .log("Certificate shop created.", Severity::Success);

        let events = run(batch, ScriptedRunner::new(), host).await;

        assert!(lines(&events).is_empty());
        assert!(matches!(
            events.first(),
            Some(BatchEvent::StepFailed { step: 0, fatal: true, error })
                if error.starts_with("An error occurred: failed to read /root/upload/missing.pem")
        ));
        assert_eq!(
            events.last(),
            Some(&BatchEvent::BatchComplete {
                failures: 1,
                aborted: true
            })
        );
    }

    #[tokio::test]
    async fn optional_removal_failure_is_soft() {
        let runner = ScriptedRunner::new();
        let batch = CommandBatch::new("cleanup")
            .step(Step::RemoveFile {
                path: "/etc/nginx/sites-enabled/default".into(),
                required: false,
            })
            .run("nginx -t");

        let events = run(batch, runner.clone(), FakeHost::default()).await;

        assert_eq!(runner.calls(), ["nginx -t"]);
        assert_eq!(
            events.last(),
            Some(&BatchEvent::BatchComplete {
                failures: 1,
                aborted: false
            })
        );
    }

    #[tokio::test]
    async fn dropped_receiver_stops_quietly() {
        let runner = ScriptedRunner::new();
        let sequencer = Sequencer::new(Arc::new(runner.clone()), Arc::new(FakeHost::default()));
        let (tx, rx) = mpsc::unbounded_channel::<BatchEvent>();
        drop(rx);

        sequencer
            .run_batch(CommandBatch::new("orphan").run("nginx -t"), &tx)
            .await;

        assert!(runner.calls().is_empty());
    }

    #[test]
    fn builder_keeps_order_and_title() {
        let batch = CommandBatch::new("first")
            .run("a")
            .then(CommandBatch::new("second").run("b").log("done", Severity::Success))
            .run("c");

        assert_eq!(batch.title, "first");
        assert_eq!(batch.commands().collect::<Vec<_>>(), ["a", "b", "c"]);
        assert_eq!(batch.len(), 4);
    }
}
