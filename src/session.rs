//! Session model - the single aggregate mutated by the UI loop.
//!
//! Holds the active wizard state, the per-state widget state (list cursors and
//! the line-edit buffer), the collected answers and the operation log of the
//! most recent command batch.

use std::path::PathBuf;

use thiserror::Error;

use crate::host::CertificateInfo;
use crate::sequencer::BatchEvent;
use crate::template::{ProxyPlan, Site};
use crate::wizard::{self, PendingAction, WizardState};

/// Severity tag carried by every log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
    /// Raw output line of an external command
    Output,
}

/// One line of the operation log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub text: String,
    pub severity: Severity,
}

impl LogEntry {
    pub fn new(text: impl Into<String>, severity: Severity) -> Self {
        Self {
            text: text.into(),
            severity,
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(text, Severity::Info)
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self::new(text, Severity::Success)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(text, Severity::Warning)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(text, Severity::Error)
    }

    pub fn output(text: impl Into<String>) -> Self {
        Self::new(text, Severity::Output)
    }
}

/// Ordered options plus a cursor clamped to `[0, len - 1]`.
///
/// Moving past either end is a no-op; the cursor never wraps around.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectableList {
    options: Vec<String>,
    cursor: usize,
}

impl SelectableList {
    pub fn new<I, S>(options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            options: options.into_iter().map(Into::into).collect(),
            cursor: 0,
        }
    }

    /// Replace the options and reset the cursor to the first entry
    pub fn replace(&mut self, options: Vec<String>) {
        self.options = options;
        self.cursor = 0;
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn move_up(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
        }
    }

    pub fn move_down(&mut self) {
        if self.cursor + 1 < self.options.len() {
            self.cursor += 1;
        }
    }

    pub fn selected(&self) -> Option<&str> {
        self.options.get(self.cursor).map(String::as_str)
    }
}

/// Line-edit buffer shared by every text-bearing state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextInput {
    value: String,
}

impl TextInput {
    pub fn push(&mut self, c: char) {
        self.value.push(c);
    }

    pub fn backspace(&mut self) {
        self.value.pop();
    }

    pub fn clear(&mut self) {
        self.value.clear();
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnswerError {
    #[error("{0} has already been answered")]
    AlreadySet(&'static str),

    #[error("missing answer: {0}")]
    Missing(&'static str),
}

/// A write-once answer field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot<T> {
    field: &'static str,
    value: Option<T>,
}

impl<T> Slot<T> {
    const fn new(field: &'static str) -> Self {
        Self { field, value: None }
    }

    /// Store the value unless the field already holds one.
    pub fn fill(&mut self, value: T) -> Result<(), AnswerError> {
        if self.value.is_some() {
            return Err(AnswerError::AlreadySet(self.field));
        }
        self.value = Some(value);
        Ok(())
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    #[cfg(test)]
    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }

    fn clear(&mut self) {
        self.value = None;
    }

    fn require(&self) -> Result<&T, AnswerError> {
        self.value.as_ref().ok_or(AnswerError::Missing(self.field))
    }
}

/// Upstream balancing flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupKind {
    Default,
    Websocket,
}

impl SetupKind {
    pub const ALL: [Self; 2] = [Self::Default, Self::Websocket];

    pub fn label(self) -> &'static str {
        match self {
            Self::Default => "Default",
            Self::Websocket => "Websocket",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.label() == label)
    }
}

/// Certificate or no certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    Ssl,
    NoSsl,
}

impl TlsMode {
    pub const ALL: [Self; 2] = [Self::Ssl, Self::NoSsl];

    pub fn label(self) -> &'static str {
        match self {
            Self::Ssl => "SSL",
            Self::NoSsl => "No SSL",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.label() == label)
    }
}

/// Everything the add-config flow collects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answers {
    pub name: Slot<String>,
    pub setup: Slot<SetupKind>,
    pub upstreams: Slot<Vec<String>>,
    pub tls: Slot<TlsMode>,
    pub certificate: Slot<CertificateInfo>,
    pub domain: Slot<String>,
    pub server_ip: Slot<String>,
    pub http_port: Slot<u16>,
    pub https_port: Slot<u16>,
}

impl Default for Answers {
    fn default() -> Self {
        Self {
            name: Slot::new("config name"),
            setup: Slot::new("setup"),
            upstreams: Slot::new("upstreams"),
            tls: Slot::new("certificate type"),
            certificate: Slot::new("certificate"),
            domain: Slot::new("domain"),
            server_ip: Slot::new("server ip"),
            http_port: Slot::new("http port"),
            https_port: Slot::new("https port"),
        }
    }
}

impl Answers {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Forget the answer collected by `state`.
    pub fn forget(&mut self, state: WizardState) {
        match state {
            WizardState::ConfigName => self.name.clear(),
            WizardState::Setup => self.setup.clear(),
            WizardState::Upstreams => self.upstreams.clear(),
            WizardState::CertType => self.tls.clear(),
            WizardState::SelectCertificate => self.certificate.clear(),
            WizardState::SelectDomain => self.domain.clear(),
            WizardState::ServerIp => self.server_ip.clear(),
            WizardState::HttpPort => self.http_port.clear(),
            WizardState::HttpsPort => self.https_port.clear(),
            _ => {}
        }
    }

    /// Build the proxy plan, requiring every field of the chosen branch.
    pub fn plan(&self) -> Result<ProxyPlan, AnswerError> {
        let site = match self.tls.require()? {
            TlsMode::NoSsl => Site::Plain {
                server_name: self.server_ip.require()?.clone(),
            },
            TlsMode::Ssl => {
                let certificate = self.certificate.require()?;
                let key_path = certificate
                    .key_path
                    .clone()
                    .ok_or(AnswerError::Missing("certificate key"))?;
                Site::Tls {
                    server_name: self.domain.require()?.clone(),
                    https_port: *self.https_port.require()?,
                    cert_path: certificate.cert_path.clone(),
                    key_path,
                }
            }
        };

        Ok(ProxyPlan {
            name: self.name.require()?.clone(),
            setup: *self.setup.require()?,
            upstreams: self.upstreams.require()?.clone(),
            http_port: *self.http_port.require()?,
            site,
        })
    }
}

/// The aggregate owned by the UI loop
#[derive(Debug, Clone)]
pub struct Session {
    pub state: WizardState,

    pub main_menu: SelectableList,
    pub nginx_menu: SelectableList,
    pub firewall_menu: SelectableList,
    pub certificate_menu: SelectableList,
    pub setups: SelectableList,
    pub tls_modes: SelectableList,
    pub certificates: SelectableList,
    pub domains: SelectableList,
    pub configs: SelectableList,
    pub config_actions: SelectableList,
    pub certificate_actions: SelectableList,

    /// Certificates backing `certificates`, same order
    pub discovered: Vec<CertificateInfo>,
    pub selected_config: Option<String>,
    pub selected_certificate: Option<CertificateInfo>,
    pub pending: Option<PendingAction>,
    /// Add-certificate answers: the new name, then the source certificate
    pub new_certificate: Option<String>,
    pub certificate_source: Option<PathBuf>,

    pub input: TextInput,
    pub answers: Answers,
    pub duplicate_name: bool,
    pub input_error: Option<String>,

    pub log: Vec<LogEntry>,
    /// Title of the batch currently running
    pub running: Option<String>,
    pub quit: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: WizardState::MainMenu,
            main_menu: SelectableList::new(wizard::MAIN_MENU),
            nginx_menu: SelectableList::new(wizard::NGINX_MENU),
            firewall_menu: SelectableList::new(wizard::FIREWALL_MENU),
            certificate_menu: SelectableList::new(wizard::CERTIFICATE_MENU),
            setups: SelectableList::new(SetupKind::ALL.map(SetupKind::label)),
            tls_modes: SelectableList::new(TlsMode::ALL.map(TlsMode::label)),
            certificates: SelectableList::default(),
            domains: SelectableList::default(),
            configs: SelectableList::default(),
            config_actions: SelectableList::new(wizard::CONFIG_ACTIONS),
            certificate_actions: SelectableList::new(wizard::CERTIFICATE_ACTIONS),
            discovered: Vec::new(),
            selected_config: None,
            selected_certificate: None,
            pending: None,
            new_certificate: None,
            certificate_source: None,
            input: TextInput::default(),
            answers: Answers::default(),
            duplicate_name: false,
            input_error: None,
            log: Vec::new(),
            running: None,
            quit: false,
        }
    }

    /// Switch to `state` with a fresh line-edit buffer
    pub fn enter(&mut self, state: WizardState) {
        self.state = state;
        self.input.clear();
        self.input_error = None;
    }

    /// The list widget owned by the current state, if it has one
    pub fn active_list(&self) -> Option<&SelectableList> {
        match self.state {
            WizardState::MainMenu => Some(&self.main_menu),
            WizardState::NginxMenu => Some(&self.nginx_menu),
            WizardState::FirewallMenu => Some(&self.firewall_menu),
            WizardState::CertificateMenu => Some(&self.certificate_menu),
            WizardState::Setup => Some(&self.setups),
            WizardState::CertType => Some(&self.tls_modes),
            WizardState::SelectCertificate | WizardState::ManageCertificates => {
                Some(&self.certificates)
            }
            WizardState::SelectDomain => Some(&self.domains),
            WizardState::ManageConfigs => Some(&self.configs),
            WizardState::ConfigActions => Some(&self.config_actions),
            WizardState::CertificateActions => Some(&self.certificate_actions),
            _ => None,
        }
    }

    pub fn active_list_mut(&mut self) -> Option<&mut SelectableList> {
        match self.state {
            WizardState::MainMenu => Some(&mut self.main_menu),
            WizardState::NginxMenu => Some(&mut self.nginx_menu),
            WizardState::FirewallMenu => Some(&mut self.firewall_menu),
            WizardState::CertificateMenu => Some(&mut self.certificate_menu),
            WizardState::Setup => Some(&mut self.setups),
            WizardState::CertType => Some(&mut self.tls_modes),
            WizardState::SelectCertificate | WizardState::ManageCertificates => {
                Some(&mut self.certificates)
            }
            WizardState::SelectDomain => Some(&mut self.domains),
            WizardState::ManageConfigs => Some(&mut self.configs),
            WizardState::ConfigActions => Some(&mut self.config_actions),
            WizardState::CertificateActions => Some(&mut self.certificate_actions),
            _ => None,
        }
    }

    pub fn push_log(&mut self, entry: LogEntry) {
        self.log.push(entry);
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    pub fn is_busy(&self) -> bool {
        self.running.is_some()
    }

    /// Logs are scoped to the most recent batch: dispatching clears them.
    pub fn begin_batch(&mut self, title: &str) {
        self.clear_log();
        self.running = Some(title.to_string());
    }

    pub fn apply_batch_event(&mut self, event: BatchEvent) {
        match event {
            BatchEvent::LineReceived(entry) => self.push_log(entry),
            BatchEvent::StepSucceeded { .. } => {}
            BatchEvent::StepFailed { error, .. } => self.push_log(LogEntry::error(error)),
            BatchEvent::BatchComplete { aborted, .. } => {
                if aborted {
                    self.push_log(LogEntry::warning("Remaining steps were skipped."));
                }
                self.running = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_is_clamped_at_both_ends() {
        let mut list = SelectableList::new(["a", "b", "c"]);
        list.move_up();
        assert_eq!(list.cursor(), 0);

        list.move_down();
        list.move_down();
        list.move_down();
        assert_eq!(list.cursor(), 2);
        assert_eq!(list.selected(), Some("c"));
    }

    #[test]
    fn empty_list_has_no_selection() {
        let mut list = SelectableList::default();
        list.move_down();
        list.move_up();
        assert_eq!(list.cursor(), 0);
        assert_eq!(list.selected(), None);
    }

    #[test]
    fn every_session_list_clamps() {
        let mut session = Session::new();
        for state in [
            WizardState::MainMenu,
            WizardState::NginxMenu,
            WizardState::FirewallMenu,
            WizardState::CertificateMenu,
            WizardState::Setup,
            WizardState::CertType,
            WizardState::ConfigActions,
            WizardState::CertificateActions,
        ] {
            session.state = state;
            let list = session.active_list_mut().expect("list state");
            list.move_up();
            assert_eq!(list.cursor(), 0, "{state:?} moved above the first entry");
            let last = list.options().len() - 1;
            for _ in 0..list.options().len() + 3 {
                list.move_down();
            }
            assert_eq!(list.cursor(), last, "{state:?} moved past the last entry");
        }
    }

    #[test]
    fn slot_is_write_once() {
        let mut answers = Answers::default();
        answers.name.fill("edge1".to_string()).unwrap();
        assert_eq!(
            answers.name.fill("edge2".to_string()),
            Err(AnswerError::AlreadySet("config name"))
        );
        assert_eq!(answers.name.get().map(String::as_str), Some("edge1"));

        answers.reset();
        assert!(!answers.name.is_set());
    }

    #[test]
    fn plain_plan_needs_server_ip_but_not_certificate() {
        let mut answers = Answers::default();
        answers.name.fill("edge1".into()).unwrap();
        answers.setup.fill(SetupKind::Default).unwrap();
        answers.upstreams.fill(vec!["10.0.0.1".into()]).unwrap();
        answers.tls.fill(TlsMode::NoSsl).unwrap();
        answers.http_port.fill(80).unwrap();
        assert_eq!(answers.plan(), Err(AnswerError::Missing("server ip")));

        answers.server_ip.fill("203.0.113.9".into()).unwrap();
        let plan = answers.plan().unwrap();
        assert_eq!(
            plan.site,
            Site::Plain {
                server_name: "203.0.113.9".into()
            }
        );
    }

    #[test]
    fn tls_plan_requires_key_file() {
        let mut answers = Answers::default();
        answers.name.fill("edge1".into()).unwrap();
        answers.setup.fill(SetupKind::Websocket).unwrap();
        answers.upstreams.fill(vec!["10.0.0.1".into()]).unwrap();
        answers.tls.fill(TlsMode::Ssl).unwrap();
        answers.http_port.fill(80).unwrap();
        answers.https_port.fill(443).unwrap();
        answers.domain.fill("example.com".into()).unwrap();
        answers
            .certificate
            .fill(CertificateInfo {
                id: "example".into(),
                cert_path: PathBuf::from("/etc/ssl/files/example.crt"),
                key_path: None,
                domains: vec!["example.com".into()],
            })
            .unwrap();

        assert_eq!(answers.plan(), Err(AnswerError::Missing("certificate key")));
    }

    #[test]
    fn batch_events_fill_log_and_clear_busy() {
        let mut session = Session::new();
        session.push_log(LogEntry::info("stale"));
        session.begin_batch("Install nginx");
        assert!(session.is_busy());
        assert!(session.log.is_empty());

        session.apply_batch_event(BatchEvent::LineReceived(LogEntry::output("hello")));
        session.apply_batch_event(BatchEvent::StepFailed {
            step: 1,
            error: "`false` failed: exited with status 1".into(),
            fatal: false,
        });
        session.apply_batch_event(BatchEvent::BatchComplete {
            failures: 1,
            aborted: false,
        });

        assert!(!session.is_busy());
        assert_eq!(
            session.log,
            vec![
                LogEntry::output("hello"),
                LogEntry::error("`false` failed: exited with status 1"),
            ]
        );
    }
}
