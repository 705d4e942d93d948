//! Wizard state machine.
//!
//! Every key press goes through [`handle_input`], which mutates the session
//! and may hand back a [`CommandBatch`] for the caller to dispatch. The only
//! I/O performed here is reading from the [`Host`]: certificate discovery,
//! domain extraction, config listing and the duplicate-name check.
//!
//! The add-config flow:
//! 1. Config name
//! 2. Setup (Default / Websocket)
//! 3. Upstreams
//! 4. Certificate type (SSL / No SSL)
//! 5. SSL: certificate, domain, HTTP port, HTTPS port
//!    No SSL: server IP, HTTP port

use crossterm::event::{KeyCode, KeyModifiers};
use tracing::{debug, info, warn};

use std::path::PathBuf;

use crate::actions;
use crate::config::Settings;
use crate::host::{self, CertificateInfo, Host};
use crate::sequencer::CommandBatch;
use crate::session::{AnswerError, LogEntry, Session, SetupKind, TlsMode};

pub const INSTALL_REQUIREMENTS: &str = "Install Requirements";
pub const NGINX_MANAGEMENT: &str = "Nginx Management";
pub const FIREWALL_MANAGEMENT: &str = "Firewall Management";
pub const CERTIFICATE_MANAGEMENT: &str = "Certificate Management";
pub const REINSTALL_EVERYTHING: &str = "Reinstall everything";
pub const UNINSTALL_EVERYTHING: &str = "Uninstall and delete everything";

pub const INSTALL_NGINX: &str = "Install Nginx";
pub const DELETE_NGINX: &str = "Delete Nginx";
pub const ADD_CONFIGS: &str = "Add Configs";
pub const MANAGE_CONFIGS: &str = "Manage Configs";

pub const FIREWALL_STATUS: &str = "Firewall Status";
pub const INSTALL_FIREWALL: &str = "Install Firewall";
pub const DELETE_FIREWALL: &str = "Delete Firewall";
pub const OPEN_PORTS: &str = "Open port(s)";

pub const ADD_CERTIFICATE: &str = "Add Certificate";
pub const DELETE_ALL_CERTIFICATES: &str = "Delete All Certificates";
pub const MANAGE_CERTIFICATE: &str = "Manage a Certificate";

pub const SHOW_CONFIG: &str = "Show Config";
pub const DELETE_CONFIG: &str = "Delete Config";
pub const CERTIFICATE_INFO: &str = "Certificate Info";
pub const DELETE_CERTIFICATE: &str = "Delete Certificate";

pub const MAIN_MENU: [&str; 6] = [
    INSTALL_REQUIREMENTS,
    NGINX_MANAGEMENT,
    FIREWALL_MANAGEMENT,
    CERTIFICATE_MANAGEMENT,
    REINSTALL_EVERYTHING,
    UNINSTALL_EVERYTHING,
];
pub const NGINX_MENU: [&str; 4] = [INSTALL_NGINX, DELETE_NGINX, ADD_CONFIGS, MANAGE_CONFIGS];
pub const FIREWALL_MENU: [&str; 4] = [FIREWALL_STATUS, INSTALL_FIREWALL, DELETE_FIREWALL, OPEN_PORTS];
pub const CERTIFICATE_MENU: [&str; 3] =
    [ADD_CERTIFICATE, DELETE_ALL_CERTIFICATES, MANAGE_CERTIFICATE];
pub const CONFIG_ACTIONS: [&str; 2] = [SHOW_CONFIG, DELETE_CONFIG];
pub const CERTIFICATE_ACTIONS: [&str; 2] = [CERTIFICATE_INFO, DELETE_CERTIFICATE];

/// Placeholder option when a certificate carries no DNS names; never selectable
pub const NO_DOMAINS: &str = "none available";

/// Add-config steps in collection order
pub const ADD_CONFIG_FLOW: [WizardState; 9] = [
    WizardState::ConfigName,
    WizardState::Setup,
    WizardState::Upstreams,
    WizardState::CertType,
    WizardState::SelectCertificate,
    WizardState::SelectDomain,
    WizardState::ServerIp,
    WizardState::HttpPort,
    WizardState::HttpsPort,
];

pub const DEFAULT_HTTP_PORT: u16 = 80;
pub const DEFAULT_HTTPS_PORT: u16 = 443;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardState {
    MainMenu,
    NginxMenu,
    FirewallMenu,
    CertificateMenu,
    // add-config flow
    ConfigName,
    Setup,
    Upstreams,
    CertType,
    SelectCertificate,
    SelectDomain,
    ServerIp,
    HttpPort,
    HttpsPort,
    // management
    ManageConfigs,
    ConfigActions,
    OpenPorts,
    ManageCertificates,
    CertificateActions,
    // add-certificate flow
    CertificateName,
    CertificateSource,
    KeySource,
    /// Yes/no gate in front of a destructive action
    Confirm,
}

impl WizardState {
    pub fn title(self) -> &'static str {
        match self {
            Self::MainMenu => "Main Menu",
            Self::NginxMenu => NGINX_MANAGEMENT,
            Self::FirewallMenu => FIREWALL_MANAGEMENT,
            Self::CertificateMenu => CERTIFICATE_MANAGEMENT,
            Self::ConfigName => "Config Name",
            Self::Setup => "Setup",
            Self::Upstreams => "Upstreams",
            Self::CertType => "Certificate Type",
            Self::SelectCertificate => "Select Certificate",
            Self::SelectDomain => "Select Domain",
            Self::ServerIp => "Server IP",
            Self::HttpPort => "HTTP Port",
            Self::HttpsPort => "HTTPS Port",
            Self::ManageConfigs => MANAGE_CONFIGS,
            Self::ConfigActions => "Config Actions",
            Self::OpenPorts => "Open Ports",
            Self::ManageCertificates => "Manage Certificates",
            Self::CertificateActions => "Certificate Actions",
            Self::CertificateName => "Certificate Name",
            Self::CertificateSource => "Certificate File",
            Self::KeySource => "Key File",
            Self::Confirm => "Confirm",
        }
    }

    /// Where back-navigation leads. `Confirm` returns to whoever asked.
    pub fn parent(self) -> Option<Self> {
        match self {
            Self::MainMenu | Self::Confirm => None,
            Self::NginxMenu | Self::FirewallMenu | Self::CertificateMenu => Some(Self::MainMenu),
            Self::ConfigName | Self::ManageConfigs => Some(Self::NginxMenu),
            Self::Setup => Some(Self::ConfigName),
            Self::Upstreams => Some(Self::Setup),
            Self::CertType => Some(Self::Upstreams),
            Self::SelectCertificate | Self::ServerIp => Some(Self::CertType),
            Self::SelectDomain => Some(Self::SelectCertificate),
            Self::HttpPort => Some(Self::CertType),
            Self::HttpsPort => Some(Self::HttpPort),
            Self::ConfigActions => Some(Self::ManageConfigs),
            Self::OpenPorts => Some(Self::FirewallMenu),
            Self::ManageCertificates => Some(Self::CertificateMenu),
            Self::CertificateActions => Some(Self::ManageCertificates),
            Self::CertificateName => Some(Self::CertificateMenu),
            Self::CertificateSource => Some(Self::CertificateName),
            Self::KeySource => Some(Self::CertificateSource),
        }
    }

    /// Text-bearing states edit a line buffer instead of moving a cursor.
    pub fn is_text(self) -> bool {
        matches!(
            self,
            Self::ConfigName
                | Self::Upstreams
                | Self::ServerIp
                | Self::HttpPort
                | Self::HttpsPort
                | Self::OpenPorts
                | Self::CertificateName
                | Self::CertificateSource
                | Self::KeySource
                | Self::Confirm
        )
    }

    pub fn in_add_config_flow(self) -> bool {
        ADD_CONFIG_FLOW.contains(&self)
    }

    /// Fixed prompt text; `Confirm` builds its own from the pending action.
    pub fn prompt(self) -> &'static str {
        match self {
            Self::ConfigName => {
                "Please enter a unique name for the config file. Previous configs are shown below:"
            }
            Self::Setup => "Please select the setup:",
            Self::Upstreams => "Please enter the list of upstream IP addresses (space separated):",
            Self::CertType => "Please select the certificate type:",
            Self::SelectCertificate => "Please select a certificate:",
            Self::SelectDomain => "Please select a domain:",
            Self::ServerIp => "Please enter the IP of this server:",
            Self::HttpPort => "Please enter the HTTP port (80 is default):",
            Self::HttpsPort => "Please enter the HTTPS port (443 is default):",
            Self::OpenPorts => "Please enter the port(s) to open, space separated (e.g. 8080 53/udp):",
            Self::ManageConfigs => "Please select a config:",
            Self::ManageCertificates => "Please select a certificate:",
            Self::CertificateName => "Enter certificate file name. The name must be unique:",
            Self::CertificateSource => "Enter the path of the certificate file to add:",
            Self::KeySource => "Enter the path of the matching private key file:",
            _ => "Please select an option:",
        }
    }
}

/// A destructive action waiting behind `Confirm`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingAction {
    DeleteNginx,
    DeleteFirewall,
    DeleteConfig(String),
    DeleteCertificate(CertificateInfo),
    DeleteAllCertificates,
    ReinstallEverything,
    UninstallEverything,
}

impl PendingAction {
    pub fn label(&self) -> String {
        match self {
            Self::DeleteNginx => "Delete nginx".to_string(),
            Self::DeleteFirewall => "Delete firewall".to_string(),
            Self::DeleteConfig(name) => format!("Delete config {name}"),
            Self::DeleteCertificate(cert) => format!("Delete certificate {}", cert.id),
            Self::DeleteAllCertificates => "Delete all certificates".to_string(),
            Self::ReinstallEverything => "Reinstall everything".to_string(),
            Self::UninstallEverything => "Uninstall everything".to_string(),
        }
    }

    pub fn question(&self) -> String {
        match self {
            Self::DeleteNginx => {
                "This purges nginx and removes its configuration directory. Continue?".to_string()
            }
            Self::DeleteFirewall => {
                "This purges ufw and removes its configuration directory. Continue?".to_string()
            }
            Self::DeleteConfig(name) => format!("Delete config {name}?"),
            Self::DeleteCertificate(cert) => {
                format!("Delete certificate {} and its key?", cert.id)
            }
            Self::DeleteAllCertificates => "Delete every certificate and key file?".to_string(),
            Self::ReinstallEverything => {
                "Remove and reinstall nginx, ufw and all certificates?".to_string()
            }
            Self::UninstallEverything => {
                "Uninstall nginx and ufw and delete all certificates?".to_string()
            }
        }
    }

    /// The state that asked for confirmation; back and cancel return here.
    pub fn requested_by(&self) -> WizardState {
        match self {
            Self::DeleteNginx => WizardState::NginxMenu,
            Self::DeleteFirewall => WizardState::FirewallMenu,
            Self::DeleteConfig(_) => WizardState::ConfigActions,
            Self::DeleteCertificate(_) => WizardState::CertificateActions,
            Self::DeleteAllCertificates => WizardState::CertificateMenu,
            Self::ReinstallEverything | Self::UninstallEverything => WizardState::MainMenu,
        }
    }

    /// Where a confirmed action lands; deleted items have no actions left.
    pub fn return_to(&self) -> WizardState {
        match self {
            Self::DeleteNginx => WizardState::NginxMenu,
            Self::DeleteFirewall => WizardState::FirewallMenu,
            Self::DeleteConfig(_) => WizardState::NginxMenu,
            Self::DeleteCertificate(_) | Self::DeleteAllCertificates => {
                WizardState::CertificateMenu
            }
            Self::ReinstallEverything | Self::UninstallEverything => WizardState::MainMenu,
        }
    }

    fn batch(&self, ctx: &WizardContext<'_>) -> CommandBatch {
        match self {
            Self::DeleteNginx => actions::delete_nginx(ctx.settings, ctx.host),
            Self::DeleteFirewall => actions::delete_firewall(ctx.settings, ctx.host),
            Self::DeleteConfig(name) => actions::delete_config(&ctx.settings.config_path(name)),
            Self::DeleteCertificate(cert) => actions::delete_certificate(cert),
            Self::DeleteAllCertificates => actions::delete_all_certificates(ctx.settings, ctx.host),
            Self::ReinstallEverything => actions::reinstall_everything(ctx.settings, ctx.host),
            Self::UninstallEverything => actions::uninstall_everything(ctx.settings, ctx.host),
        }
    }
}

/// Read-only collaborators available to transitions
pub struct WizardContext<'a> {
    pub host: &'a dyn Host,
    pub settings: &'a Settings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Quit,
    Dispatch(CommandBatch),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Input {
    Up,
    Down,
    Commit,
    Back,
    Quit,
    Char(char),
    Backspace,
    Ignored,
}

fn classify(state: WizardState, code: KeyCode, modifiers: KeyModifiers) -> Input {
    let ctrl = modifiers.contains(KeyModifiers::CONTROL);
    match code {
        KeyCode::Char('c') if ctrl => Input::Quit,
        KeyCode::Char('b') if ctrl => Input::Back,
        KeyCode::Enter => Input::Commit,
        KeyCode::Esc => Input::Back,
        _ if state.is_text() => match code {
            KeyCode::Char(c) if !ctrl => Input::Char(c),
            KeyCode::Backspace => Input::Backspace,
            _ => Input::Ignored,
        },
        KeyCode::Up | KeyCode::Char('k') | KeyCode::Char('w') => Input::Up,
        KeyCode::Down | KeyCode::Char('j') | KeyCode::Char('s') => Input::Down,
        KeyCode::Char('b') => Input::Back,
        KeyCode::Char('q') => Input::Quit,
        _ => Input::Ignored,
    }
}

/// Apply one key press to the session.
///
/// Quit is honoured in every state, also while a batch runs; any other key
/// is ignored until the running batch completes.
pub fn handle_input(
    session: &mut Session,
    key_code: KeyCode,
    modifiers: KeyModifiers,
    ctx: &WizardContext<'_>,
) -> Outcome {
    let input = classify(session.state, key_code, modifiers);
    if input == Input::Quit {
        session.quit = true;
        return Outcome::Quit;
    }
    if session.is_busy() {
        return Outcome::Continue;
    }

    match input {
        Input::Up => {
            if let Some(list) = session.active_list_mut() {
                list.move_up();
            }
            Outcome::Continue
        }
        Input::Down => {
            if let Some(list) = session.active_list_mut() {
                list.move_down();
            }
            Outcome::Continue
        }
        Input::Char(c) => {
            session.input.push(c);
            session.input_error = None;
            Outcome::Continue
        }
        Input::Backspace => {
            session.input.backspace();
            Outcome::Continue
        }
        Input::Back => {
            go_back(session);
            Outcome::Continue
        }
        Input::Commit => commit(session, ctx),
        Input::Quit | Input::Ignored => Outcome::Continue,
    }
}

fn go_back(session: &mut Session) {
    let target = match session.state {
        WizardState::Confirm => session.pending.take().map(|action| action.requested_by()),
        WizardState::HttpPort => match session.answers.tls.get() {
            Some(TlsMode::Ssl) => Some(WizardState::SelectDomain),
            Some(TlsMode::NoSsl) => Some(WizardState::ServerIp),
            None => session.state.parent(),
        },
        state => state.parent(),
    };
    let Some(target) = target else {
        return;
    };

    debug!(from = ?session.state, to = ?target, "Navigating back");
    if session.state.in_add_config_flow() {
        forget_from(session, target);
    }
    match target {
        WizardState::CertificateName | WizardState::CertificateMenu => {
            session.new_certificate = None;
            session.certificate_source = None;
        }
        WizardState::CertificateSource => session.certificate_source = None,
        _ => {}
    }
    session.clear_log();
    session.enter(target);
}

/// Drop the answers of `target` and every later step so they can be redone.
fn forget_from(session: &mut Session, target: WizardState) {
    match ADD_CONFIG_FLOW.iter().position(|state| *state == target) {
        Some(start) => {
            for state in &ADD_CONFIG_FLOW[start..] {
                session.answers.forget(*state);
            }
        }
        None => session.answers.reset(),
    }
    session.duplicate_name = false;
}

fn commit(session: &mut Session, ctx: &WizardContext<'_>) -> Outcome {
    match session.state {
        WizardState::MainMenu => commit_main_menu(session),
        WizardState::NginxMenu => commit_nginx_menu(session, ctx),
        WizardState::FirewallMenu => commit_firewall_menu(session, ctx),
        WizardState::CertificateMenu => commit_certificate_menu(session, ctx),
        WizardState::ConfigName => commit_config_name(session, ctx),
        WizardState::Setup => commit_setup(session),
        WizardState::Upstreams => commit_upstreams(session),
        WizardState::CertType => commit_cert_type(session, ctx),
        WizardState::SelectCertificate => commit_certificate(session, ctx),
        WizardState::SelectDomain => commit_domain(session),
        WizardState::ServerIp => commit_server_ip(session),
        WizardState::HttpPort => commit_http_port(session, ctx),
        WizardState::HttpsPort => commit_https_port(session, ctx),
        WizardState::ManageConfigs => commit_manage_configs(session),
        WizardState::ConfigActions => commit_config_action(session, ctx),
        WizardState::OpenPorts => commit_open_ports(session),
        WizardState::ManageCertificates => commit_manage_certificates(session),
        WizardState::CertificateActions => commit_certificate_action(session),
        WizardState::CertificateName => commit_certificate_name(session, ctx),
        WizardState::CertificateSource => commit_certificate_source(session, ctx),
        WizardState::KeySource => commit_key_source(session, ctx),
        WizardState::Confirm => commit_confirm(session, ctx),
    }
}

fn selected(session: &Session) -> Option<String> {
    session
        .active_list()
        .and_then(|list| list.selected())
        .map(str::to_string)
}

fn confirm(session: &mut Session, action: PendingAction) -> Outcome {
    session.pending = Some(action);
    session.enter(WizardState::Confirm);
    Outcome::Continue
}

/// Record a write-once failure; true when the answer was stored.
fn stored(session: &mut Session, result: Result<(), AnswerError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Rejected answer");
            session.input_error = Some(e.to_string());
            false
        }
    }
}

fn commit_main_menu(session: &mut Session) -> Outcome {
    match selected(session).as_deref() {
        Some(INSTALL_REQUIREMENTS) => Outcome::Dispatch(actions::install_requirements()),
        Some(NGINX_MANAGEMENT) => {
            session.enter(WizardState::NginxMenu);
            Outcome::Continue
        }
        Some(FIREWALL_MANAGEMENT) => {
            session.enter(WizardState::FirewallMenu);
            Outcome::Continue
        }
        Some(CERTIFICATE_MANAGEMENT) => {
            session.enter(WizardState::CertificateMenu);
            Outcome::Continue
        }
        Some(REINSTALL_EVERYTHING) => confirm(session, PendingAction::ReinstallEverything),
        Some(UNINSTALL_EVERYTHING) => confirm(session, PendingAction::UninstallEverything),
        _ => Outcome::Continue,
    }
}

fn commit_nginx_menu(session: &mut Session, ctx: &WizardContext<'_>) -> Outcome {
    match selected(session).as_deref() {
        Some(INSTALL_NGINX) => Outcome::Dispatch(actions::install_nginx()),
        Some(DELETE_NGINX) => confirm(session, PendingAction::DeleteNginx),
        Some(ADD_CONFIGS) => start_add_config(session, ctx),
        Some(MANAGE_CONFIGS) => {
            match ctx.host.list_configs(&ctx.settings.configs_dir) {
                Ok(configs) if configs.is_empty() => {
                    session.push_log(LogEntry::warning("No configs found."));
                }
                Ok(configs) => {
                    session.configs.replace(configs);
                    session.enter(WizardState::ManageConfigs);
                }
                Err(e) => session.push_log(LogEntry::error(format!("An error occurred: {e}"))),
            }
            Outcome::Continue
        }
        _ => Outcome::Continue,
    }
}

fn start_add_config(session: &mut Session, ctx: &WizardContext<'_>) -> Outcome {
    for (program, name) in [("nginx", "Nginx"), ("ufw", "Ufw")] {
        if !ctx.host.program_installed(program) {
            session.push_log(LogEntry::error(format!(
                "{name} is not installed. Please install it first."
            )));
            return Outcome::Continue;
        }
    }

    let existing = ctx
        .host
        .list_configs(&ctx.settings.configs_dir)
        .unwrap_or_else(|e| {
            warn!(error = %e, "Could not list existing configs");
            session.push_log(LogEntry::warning(format!("Could not list configs: {e}")));
            Vec::new()
        });
    session.configs.replace(existing);
    session.answers.reset();
    session.duplicate_name = false;
    session.clear_log();
    session.enter(WizardState::ConfigName);
    Outcome::Continue
}

fn commit_firewall_menu(session: &mut Session, ctx: &WizardContext<'_>) -> Outcome {
    match selected(session).as_deref() {
        Some(FIREWALL_STATUS) => Outcome::Dispatch(actions::firewall_status()),
        Some(INSTALL_FIREWALL) => Outcome::Dispatch(actions::install_firewall(ctx.settings)),
        Some(DELETE_FIREWALL) => confirm(session, PendingAction::DeleteFirewall),
        Some(OPEN_PORTS) => {
            session.enter(WizardState::OpenPorts);
            Outcome::Continue
        }
        _ => Outcome::Continue,
    }
}

fn commit_certificate_menu(session: &mut Session, ctx: &WizardContext<'_>) -> Outcome {
    match selected(session).as_deref() {
        Some(ADD_CERTIFICATE) => {
            session.new_certificate = None;
            session.certificate_source = None;
            session.enter(WizardState::CertificateName);
            Outcome::Continue
        }
        Some(DELETE_ALL_CERTIFICATES) => confirm(session, PendingAction::DeleteAllCertificates),
        Some(MANAGE_CERTIFICATE) => {
            if load_certificates(session, ctx) > 0 {
                session.enter(WizardState::ManageCertificates);
            }
            Outcome::Continue
        }
        _ => Outcome::Continue,
    }
}

/// Refresh the certificate list; problems become log entries.
fn load_certificates(session: &mut Session, ctx: &WizardContext<'_>) -> usize {
    let dir = &ctx.settings.cert_dir;
    let certificates = match ctx.host.discover_certificates(dir) {
        Ok(certificates) => certificates,
        Err(e) => {
            warn!(error = %e, "Certificate discovery failed");
            session.push_log(LogEntry::error(format!("Error scanning certificates: {e}")));
            Vec::new()
        }
    };
    if certificates.is_empty() {
        session.push_log(LogEntry::warning(format!(
            "No certificates found in {}.",
            dir.display()
        )));
    }

    session
        .certificates
        .replace(certificates.iter().map(CertificateInfo::description).collect());
    session.discovered = certificates;
    session.discovered.len()
}

/// Names become file stems and shell arguments.
fn is_valid_file_stem(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

fn commit_config_name(session: &mut Session, ctx: &WizardContext<'_>) -> Outcome {
    let name = session.input.value().trim().to_string();
    if name.is_empty() {
        return Outcome::Continue;
    }
    if !is_valid_file_stem(&name) {
        session.input_error =
            Some("Use only letters, digits, '.', '_' or '-' in the name.".to_string());
        return Outcome::Continue;
    }

    let path = ctx.settings.config_path(&name);
    if ctx.host.file_exists(&path) {
        debug!(path = %path.display(), "Config name already taken");
        session.duplicate_name = true;
        return Outcome::Continue;
    }

    session.duplicate_name = false;
    let result = session.answers.name.fill(name);
    if stored(session, result) {
        session.enter(WizardState::Setup);
    }
    Outcome::Continue
}

fn commit_setup(session: &mut Session) -> Outcome {
    let Some(setup) = selected(session).as_deref().and_then(SetupKind::from_label) else {
        return Outcome::Continue;
    };
    let result = session.answers.setup.fill(setup);
    if stored(session, result) {
        session.enter(WizardState::Upstreams);
    }
    Outcome::Continue
}

fn commit_upstreams(session: &mut Session) -> Outcome {
    let upstreams: Vec<String> = session
        .input
        .value()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    if upstreams.is_empty() {
        return Outcome::Continue;
    }
    let result = session.answers.upstreams.fill(upstreams);
    if stored(session, result) {
        session.enter(WizardState::CertType);
    }
    Outcome::Continue
}

fn commit_cert_type(session: &mut Session, ctx: &WizardContext<'_>) -> Outcome {
    let Some(mode) = selected(session).as_deref().and_then(TlsMode::from_label) else {
        return Outcome::Continue;
    };
    let result = session.answers.tls.fill(mode);
    if !stored(session, result) {
        return Outcome::Continue;
    }

    match mode {
        TlsMode::Ssl => {
            load_certificates(session, ctx);
            session.enter(WizardState::SelectCertificate);
        }
        TlsMode::NoSsl => session.enter(WizardState::ServerIp),
    }
    Outcome::Continue
}

fn commit_certificate(session: &mut Session, ctx: &WizardContext<'_>) -> Outcome {
    let Some(certificate) = session
        .discovered
        .get(session.certificates.cursor())
        .cloned()
    else {
        session.input_error = Some("No certificate to select.".to_string());
        return Outcome::Continue;
    };
    if certificate.key_path.is_none() {
        session.push_log(LogEntry::error(format!(
            "Key file not found for certificate {}.",
            certificate.id
        )));
        return Outcome::Continue;
    }

    let domains = match ctx.host.extract_domains(&certificate.cert_path) {
        Ok(domains) if !domains.is_empty() => domains,
        Ok(_) => {
            session.push_log(LogEntry::warning(format!(
                "No domains found in certificate {}.",
                certificate.id
            )));
            vec![NO_DOMAINS.to_string()]
        }
        Err(e) => {
            warn!(error = %e, "Domain extraction failed");
            session.push_log(LogEntry::warning(format!("Error extracting domains: {e}")));
            vec![NO_DOMAINS.to_string()]
        }
    };

    let result = session.answers.certificate.fill(certificate);
    if stored(session, result) {
        session.domains.replace(domains);
        session.enter(WizardState::SelectDomain);
    }
    Outcome::Continue
}

fn commit_domain(session: &mut Session) -> Outcome {
    match selected(session) {
        Some(domain) if domain != NO_DOMAINS => {
            let result = session.answers.domain.fill(domain);
            if stored(session, result) {
                session.enter(WizardState::HttpPort);
            }
        }
        _ => {
            session.input_error =
                Some("No domain available; go back and choose another certificate.".to_string());
        }
    }
    Outcome::Continue
}

fn commit_server_ip(session: &mut Session) -> Outcome {
    let ip = session.input.value().trim().to_string();
    if ip.is_empty() {
        return Outcome::Continue;
    }
    if ip.contains(char::is_whitespace) {
        session.input_error = Some("Enter a single address.".to_string());
        return Outcome::Continue;
    }
    let result = session.answers.server_ip.fill(ip);
    if stored(session, result) {
        session.enter(WizardState::HttpPort);
    }
    Outcome::Continue
}

/// Empty input takes `default`.
fn parse_port(input: &str, default: u16) -> Result<u16, String> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(default);
    }
    match input.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(format!("Invalid port: {input} (expected 1-65535)")),
    }
}

fn commit_http_port(session: &mut Session, ctx: &WizardContext<'_>) -> Outcome {
    let port = match parse_port(session.input.value(), DEFAULT_HTTP_PORT) {
        Ok(port) => port,
        Err(msg) => {
            session.input_error = Some(msg);
            return Outcome::Continue;
        }
    };
    let result = session.answers.http_port.fill(port);
    if !stored(session, result) {
        return Outcome::Continue;
    }

    match session.answers.tls.get() {
        Some(TlsMode::Ssl) => {
            session.enter(WizardState::HttpsPort);
            Outcome::Continue
        }
        _ => finish_add_config(session, ctx),
    }
}

fn commit_https_port(session: &mut Session, ctx: &WizardContext<'_>) -> Outcome {
    let port = match parse_port(session.input.value(), DEFAULT_HTTPS_PORT) {
        Ok(port) => port,
        Err(msg) => {
            session.input_error = Some(msg);
            return Outcome::Continue;
        }
    };
    let result = session.answers.https_port.fill(port);
    if !stored(session, result) {
        return Outcome::Continue;
    }
    finish_add_config(session, ctx)
}

fn finish_add_config(session: &mut Session, ctx: &WizardContext<'_>) -> Outcome {
    match session.answers.plan() {
        Ok(plan) => {
            info!(name = %plan.name, "Add-config flow complete");
            let batch = actions::add_config(&plan, ctx.settings, ctx.host);
            session.enter(WizardState::NginxMenu);
            Outcome::Dispatch(batch)
        }
        Err(e) => {
            session.push_log(LogEntry::error(format!("Cannot build config: {e}")));
            Outcome::Continue
        }
    }
}

fn commit_manage_configs(session: &mut Session) -> Outcome {
    if let Some(name) = selected(session) {
        session.selected_config = Some(name);
        session.config_actions.replace(CONFIG_ACTIONS.map(str::to_string).to_vec());
        session.enter(WizardState::ConfigActions);
    }
    Outcome::Continue
}

fn commit_config_action(session: &mut Session, ctx: &WizardContext<'_>) -> Outcome {
    let Some(name) = session.selected_config.clone() else {
        return Outcome::Continue;
    };
    match selected(session).as_deref() {
        Some(SHOW_CONFIG) => Outcome::Dispatch(actions::show_config(&ctx.settings.config_path(&name))),
        Some(DELETE_CONFIG) => confirm(session, PendingAction::DeleteConfig(name)),
        _ => Outcome::Continue,
    }
}

/// Space-separated `<port>[/tcp|/udp]` entries; a bare port means tcp.
fn parse_ports(input: &str) -> Result<Vec<String>, String> {
    input
        .split_whitespace()
        .map(|entry| {
            let (port, protocol) = entry.split_once('/').unwrap_or((entry, "tcp"));
            let valid_port = matches!(port.parse::<u16>(), Ok(p) if p > 0);
            if valid_port && matches!(protocol, "tcp" | "udp") {
                Ok(format!("{port}/{protocol}"))
            } else {
                Err(format!("Invalid port: {entry}"))
            }
        })
        .collect()
}

fn commit_open_ports(session: &mut Session) -> Outcome {
    let ports = match parse_ports(session.input.value()) {
        Ok(ports) if ports.is_empty() => return Outcome::Continue,
        Ok(ports) => ports,
        Err(msg) => {
            session.input_error = Some(msg);
            return Outcome::Continue;
        }
    };
    session.enter(WizardState::FirewallMenu);
    Outcome::Dispatch(actions::open_ports(&ports))
}

fn commit_manage_certificates(session: &mut Session) -> Outcome {
    if let Some(certificate) = session.discovered.get(session.certificates.cursor()).cloned() {
        session.selected_certificate = Some(certificate);
        session
            .certificate_actions
            .replace(CERTIFICATE_ACTIONS.map(str::to_string).to_vec());
        session.enter(WizardState::CertificateActions);
    }
    Outcome::Continue
}

fn commit_certificate_action(session: &mut Session) -> Outcome {
    let Some(certificate) = session.selected_certificate.clone() else {
        return Outcome::Continue;
    };
    match selected(session).as_deref() {
        Some(CERTIFICATE_INFO) => Outcome::Dispatch(actions::certificate_info(&certificate)),
        Some(DELETE_CERTIFICATE) => confirm(session, PendingAction::DeleteCertificate(certificate)),
        _ => Outcome::Continue,
    }
}

fn commit_certificate_name(session: &mut Session, ctx: &WizardContext<'_>) -> Outcome {
    let name = session.input.value().trim().to_string();
    if name.is_empty() {
        return Outcome::Continue;
    }
    if !is_valid_file_stem(&name) {
        session.input_error =
            Some("Use only letters, digits, '.', '_' or '-' in the name.".to_string());
        return Outcome::Continue;
    }
    let taken = host::certificate_paths(&ctx.settings.cert_dir, &name)
        .iter()
        .any(|path| ctx.host.file_exists(path));
    if taken {
        session.input_error = Some(format!("A certificate named {name} already exists."));
        return Outcome::Continue;
    }

    session.new_certificate = Some(name);
    session.enter(WizardState::CertificateSource);
    Outcome::Continue
}

/// The trimmed input as an existing file, or an inline error.
fn source_file(session: &mut Session, ctx: &WizardContext<'_>) -> Option<PathBuf> {
    let raw = session.input.value().trim();
    if raw.is_empty() {
        return None;
    }
    let path = PathBuf::from(raw);
    if !ctx.host.file_exists(&path) {
        session.input_error = Some(format!("File not found: {}", path.display()));
        return None;
    }
    Some(path)
}

fn commit_certificate_source(session: &mut Session, ctx: &WizardContext<'_>) -> Outcome {
    if let Some(path) = source_file(session, ctx) {
        session.certificate_source = Some(path);
        session.enter(WizardState::KeySource);
    }
    Outcome::Continue
}

fn commit_key_source(session: &mut Session, ctx: &WizardContext<'_>) -> Outcome {
    let Some(key_source) = source_file(session, ctx) else {
        return Outcome::Continue;
    };
    let (Some(name), Some(cert_source)) =
        (session.new_certificate.take(), session.certificate_source.take())
    else {
        session.enter(WizardState::CertificateName);
        return Outcome::Continue;
    };

    info!(%name, "Adding certificate");
    session.enter(WizardState::CertificateMenu);
    Outcome::Dispatch(actions::add_certificate(
        &name,
        &cert_source,
        &key_source,
        ctx.settings,
    ))
}

fn commit_confirm(session: &mut Session, ctx: &WizardContext<'_>) -> Outcome {
    let answer = session.input.value().trim().to_lowercase();
    if answer.is_empty() {
        return Outcome::Continue;
    }
    let Some(action) = session.pending.take() else {
        session.enter(WizardState::MainMenu);
        return Outcome::Continue;
    };

    if matches!(answer.as_str(), "yes" | "y") {
        info!(action = %action.label(), "Confirmed");
        session.enter(action.return_to());
        Outcome::Dispatch(action.batch(ctx))
    } else {
        session.enter(action.requested_by());
        session.push_log(LogEntry::warning(format!("{} canceled.", action.label())));
        Outcome::Continue
    }
}
