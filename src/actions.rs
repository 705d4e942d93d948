//! Command batches for every console action.
//!
//! Builders only read from the host (to decide which steps apply); every
//! modification happens when the sequencer executes the batch.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::config::Settings;
use crate::host::{CertificateInfo, Host};
use crate::sequencer::{CommandBatch, Step};
use crate::session::{LogEntry, Severity};
use crate::template::{self, ProxyPlan};

pub const ALL_DONE: &str = "All is done.";

fn finished(batch: CommandBatch) -> CommandBatch {
    batch.step(Step::Log(LogEntry::success(ALL_DONE)))
}

/// Single-quote `path` for the shell unless it is plainly safe.
fn quote(path: &Path) -> String {
    let raw = path.display().to_string();
    if !raw.is_empty()
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-'))
    {
        raw
    } else {
        format!("'{}'", raw.replace('\'', r"'\''"))
    }
}

/// Base ports followed by the plan's own, first occurrence wins.
fn firewall_ports(plan: &ProxyPlan, settings: &Settings) -> Vec<String> {
    let mut ports: Vec<String> = Vec::new();
    let plan_ports = std::iter::once(plan.http_port)
        .chain(plan.https_port())
        .map(|port| format!("{port}/tcp"));
    for port in settings.base_firewall_ports.iter().cloned().chain(plan_ports) {
        if !ports.contains(&port) {
            ports.push(port);
        }
    }
    ports
}

fn allow_ports(mut batch: CommandBatch, ports: &[String]) -> CommandBatch {
    for port in ports {
        batch = batch.run(format!("ufw allow {port}"));
    }
    batch
}

/// Write the proxy config, activate it and open its ports.
pub fn add_config(plan: &ProxyPlan, settings: &Settings, host: &dyn Host) -> CommandBatch {
    let path = settings.config_path(&plan.name);
    let mut batch = CommandBatch::new(format!("Add config {}", plan.name))
        .log(
            format!(
                "Creating configuration file for load balancer and reverse proxy: {}",
                path.display()
            ),
            Severity::Info,
        )
        .step(Step::WriteFile {
            path,
            content: template::render(plan),
        });

    for default in &settings.default_site_files {
        if host.file_exists(default) {
            batch = batch
                .log(
                    format!("Removing default configuration at {}", default.display()),
                    Severity::Info,
                )
                .step(Step::RemoveFile {
                    path: default.clone(),
                    required: false,
                });
        }
    }

    let ports = firewall_ports(plan, settings);
    let batch = batch
        .log("Testing nginx configuration...", Severity::Info)
        .run("nginx -t")
        .log("Reloading nginx...", Severity::Info)
        .run("systemctl reload nginx")
        .log(
            "Enabling nginx service to start automatically after reboot...",
            Severity::Info,
        )
        .run("systemctl enable nginx")
        .log(
            "Reverse proxy and load balancer configuration completed.",
            Severity::Success,
        )
        .log(format!("Allowing ports {}...", ports.join(", ")), Severity::Info);

    finished(allow_ports(batch, &ports).run("ufw --force enable"))
}

fn nginx_install_steps() -> CommandBatch {
    CommandBatch::new("Install nginx")
        .log("Updating package lists...", Severity::Info)
        .run("apt-get update -y")
        .log("Installing nginx...", Severity::Info)
        .run("apt-get install -y nginx")
}

pub fn install_nginx() -> CommandBatch {
    finished(nginx_install_steps())
}

fn nginx_removal_steps(settings: &Settings, host: &dyn Host) -> CommandBatch {
    let batch = CommandBatch::new("Delete nginx");
    if !host.program_installed("nginx") {
        return batch.log("Nginx is not installed.", Severity::Info);
    }
    batch
        .log(
            "Nginx is installed. Purging existing installation and configuration files...",
            Severity::Warning,
        )
        .log("Stopping nginx service...", Severity::Warning)
        .run("systemctl stop nginx")
        .run("systemctl disable nginx")
        .log("Purging nginx...", Severity::Warning)
        .run("apt-get purge -y nginx nginx-common")
        .log("Auto removing packages...", Severity::Warning)
        .run("apt-get autoremove -y")
        .log(
            format!("Removing {}...", settings.nginx_dir.display()),
            Severity::Warning,
        )
        .step(Step::RemoveDir {
            path: settings.nginx_dir.clone(),
        })
}

pub fn delete_nginx(settings: &Settings, host: &dyn Host) -> CommandBatch {
    let batch = nginx_removal_steps(settings, host);
    if host.program_installed("nginx") {
        finished(batch)
    } else {
        batch
    }
}

pub fn firewall_status() -> CommandBatch {
    CommandBatch::new("Firewall status").run("ufw status verbose")
}

fn firewall_install_steps(settings: &Settings) -> CommandBatch {
    let batch = CommandBatch::new("Install firewall")
        .log("Updating package lists...", Severity::Info)
        .run("apt-get update -y")
        .log("Installing ufw...", Severity::Info)
        .run("apt-get install -y ufw")
        .log(
            format!("Allowing ports {}...", settings.base_firewall_ports.join(", ")),
            Severity::Info,
        );
    allow_ports(batch, &settings.base_firewall_ports)
}

pub fn install_firewall(settings: &Settings) -> CommandBatch {
    finished(firewall_install_steps(settings))
}

fn firewall_removal_steps(settings: &Settings, host: &dyn Host) -> CommandBatch {
    let batch = CommandBatch::new("Delete firewall");
    if !host.program_installed("ufw") {
        return batch.log("Ufw is not installed.", Severity::Info);
    }
    batch
        .log("Disabling ufw...", Severity::Warning)
        .run("ufw --force disable")
        .log("Purging ufw...", Severity::Warning)
        .run("apt-get purge -y ufw")
        .run("apt-get autoremove -y")
        .log(
            format!("Removing {}...", settings.ufw_dir.display()),
            Severity::Warning,
        )
        .step(Step::RemoveDir {
            path: settings.ufw_dir.clone(),
        })
}

pub fn delete_firewall(settings: &Settings, host: &dyn Host) -> CommandBatch {
    let batch = firewall_removal_steps(settings, host);
    if host.program_installed("ufw") {
        finished(batch)
    } else {
        batch
    }
}

/// `ports` are already validated `<port>[/tcp|/udp]` entries.
pub fn open_ports(ports: &[String]) -> CommandBatch {
    let batch = CommandBatch::new("Open ports")
        .log(format!("Allowing ports {}...", ports.join(", ")), Severity::Info);
    finished(allow_ports(batch, ports).run("ufw status"))
}

fn requirements_steps() -> CommandBatch {
    CommandBatch::new("Install requirements")
        .log("Updating package lists...", Severity::Info)
        .run("apt-get update -y")
        .log("Installing nginx, ufw and openssl...", Severity::Info)
        .run("apt-get install -y nginx ufw openssl")
}

pub fn install_requirements() -> CommandBatch {
    finished(requirements_steps())
}

pub fn show_config(path: &Path) -> CommandBatch {
    CommandBatch::new("Show config").run(format!("cat {}", quote(path)))
}

pub fn delete_config(path: &Path) -> CommandBatch {
    finished(
        CommandBatch::new("Delete config")
            .log(format!("Removing {}...", path.display()), Severity::Warning)
            .step(Step::RemoveFile {
                path: path.to_path_buf(),
                required: true,
            })
            .log("Testing nginx configuration...", Severity::Info)
            .run("nginx -t")
            .log("Reloading nginx...", Severity::Info)
            .run("systemctl reload nginx"),
    )
}

pub fn certificate_info(certificate: &CertificateInfo) -> CommandBatch {
    CommandBatch::new(format!("Certificate {}", certificate.id)).run(format!(
        "openssl x509 -in {} -noout -subject -issuer -dates -ext subjectAltName",
        quote(&certificate.cert_path)
    ))
}

/// Copy an operator-supplied certificate and key into `cert_dir` as `<name>.crt`
/// and `<name>.key`.
pub fn add_certificate(
    name: &str,
    cert_source: &Path,
    key_source: &Path,
    settings: &Settings,
) -> CommandBatch {
    let cert_path = settings.cert_dir.join(format!("{name}.crt"));
    let key_path = settings.cert_dir.join(format!("{name}.key"));
    CommandBatch::new(format!("Add certificate {name}"))
        .log(
            format!("Copying {} to {}...", cert_source.display(), cert_path.display()),
            Severity::Info,
        )
        .step(Step::CopyFile {
            from: cert_source.to_path_buf(),
            to: cert_path,
        })
        .log(
            format!("Copying {} to {}...", key_source.display(), key_path.display()),
            Severity::Info,
        )
        .step(Step::CopyFile {
            from: key_source.to_path_buf(),
            to: key_path,
        })
        .step(Step::Log(LogEntry::success(format!("Certificate {name} created."))))
}

pub fn delete_certificate(certificate: &CertificateInfo) -> CommandBatch {
    let mut batch = CommandBatch::new(format!("Delete certificate {}", certificate.id))
        .log(
            format!("Removing {}...", certificate.cert_path.display()),
            Severity::Warning,
        )
        .step(Step::RemoveFile {
            path: certificate.cert_path.clone(),
            required: true,
        });
    if let Some(key) = &certificate.key_path {
        batch = batch
            .log(format!("Removing {}...", key.display()), Severity::Warning)
            .step(Step::RemoveFile {
                path: key.clone(),
                required: true,
            });
    }
    finished(batch)
}

fn certificate_removal_steps(settings: &Settings, host: &dyn Host) -> CommandBatch {
    let batch = CommandBatch::new("Delete all certificates");
    let files: Vec<PathBuf> = match host.certificate_files(&settings.cert_dir) {
        Ok(files) => files,
        Err(e) => {
            warn!(error = %e, "Could not list certificate files");
            return batch.log(format!("An error occurred: {e}"), Severity::Error);
        }
    };
    if files.is_empty() {
        return batch.log(
            format!("No certificates found in {}.", settings.cert_dir.display()),
            Severity::Info,
        );
    }

    let mut batch = batch.log(
        format!("Removing {} certificate and key files...", files.len()),
        Severity::Warning,
    );
    for path in files {
        batch = batch.step(Step::RemoveFile {
            path,
            required: true,
        });
    }
    batch
}

pub fn delete_all_certificates(settings: &Settings, host: &dyn Host) -> CommandBatch {
    finished(certificate_removal_steps(settings, host))
}

pub fn reinstall_everything(settings: &Settings, host: &dyn Host) -> CommandBatch {
    finished(
        CommandBatch::new("Reinstall everything")
            .then(nginx_removal_steps(settings, host))
            .then(nginx_install_steps())
            .then(firewall_removal_steps(settings, host))
            .then(firewall_install_steps(settings))
            .then(certificate_removal_steps(settings, host))
            .then(requirements_steps()),
    )
}

pub fn uninstall_everything(settings: &Settings, host: &dyn Host) -> CommandBatch {
    finished(
        CommandBatch::new("Uninstall everything")
            .then(nginx_removal_steps(settings, host))
            .then(firewall_removal_steps(settings, host))
            .then(certificate_removal_steps(settings, host)),
    )
}
