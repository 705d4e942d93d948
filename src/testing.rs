//! In-memory collaborators for unit tests

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::host::{CertificateInfo, Host, HostError};
use crate::runner::{CommandRunner, RunError, RunnerEvent, Stream};

/// A host whose filesystem is a set of paths
#[derive(Debug, Default)]
pub struct FakeHost {
    files: Mutex<BTreeSet<PathBuf>>,
    written: Mutex<Vec<(PathBuf, String)>>,
    certificates: Vec<CertificateInfo>,
    domains: BTreeMap<PathBuf, Vec<String>>,
    programs: Vec<String>,
    configs: Vec<String>,
    fail_writes: bool,
    fail_ensure_dir: bool,
}

impl FakeHost {
    pub fn with_programs(mut self, programs: &[&str]) -> Self {
        self.programs = programs.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_file(self, path: impl Into<PathBuf>) -> Self {
        self.files.lock().unwrap().insert(path.into());
        self
    }

    /// Registers an existing `<dir>/<name>.conf`.
    pub fn with_config(mut self, dir: &Path, name: &str) -> Self {
        self.configs.push(name.to_string());
        self.configs.sort();
        self.with_file(dir.join(format!("{name}.conf")))
    }

    pub fn with_certificate(mut self, dir: &Path, id: &str, domains: &[&str], has_key: bool) -> Self {
        let cert_path = dir.join(format!("{id}.crt"));
        let key_path = has_key.then(|| dir.join(format!("{id}.key")));
        let domains: Vec<String> = domains.iter().map(|d| d.to_string()).collect();

        self.domains.insert(cert_path.clone(), domains.clone());
        {
            let mut files = self.files.lock().unwrap();
            files.insert(cert_path.clone());
            if let Some(key) = &key_path {
                files.insert(key.clone());
            }
        }
        self.certificates.push(CertificateInfo {
            id: id.to_string(),
            cert_path,
            key_path,
            domains,
        });
        self.certificates.sort_by(|a, b| a.id.cmp(&b.id));
        self
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn failing_ensure_dir(mut self) -> Self {
        self.fail_ensure_dir = true;
        self
    }

    pub fn written(&self) -> Vec<(PathBuf, String)> {
        self.written.lock().unwrap().clone()
    }

    pub fn has_file(&self, path: &Path) -> bool {
        self.files.lock().unwrap().contains(path)
    }

    fn denied() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::PermissionDenied, "permission denied")
    }
}

impl Host for FakeHost {
    fn discover_certificates(&self, _dir: &Path) -> Result<Vec<CertificateInfo>, HostError> {
        Ok(self.certificates.clone())
    }

    fn extract_domains(&self, cert_path: &Path) -> Result<Vec<String>, HostError> {
        self.domains
            .get(cert_path)
            .cloned()
            .ok_or_else(|| HostError::Inspect {
                path: cert_path.to_path_buf(),
                reason: "unable to load certificate".to_string(),
            })
    }

    fn file_exists(&self, path: &Path) -> bool {
        self.has_file(path)
    }

    fn list_configs(&self, _dir: &Path) -> Result<Vec<String>, HostError> {
        Ok(self.configs.clone())
    }

    fn certificate_files(&self, dir: &Path) -> Result<Vec<PathBuf>, HostError> {
        Ok(self
            .files
            .lock()
            .unwrap()
            .iter()
            .filter(|path| path.parent() == Some(dir))
            .cloned()
            .collect())
    }

    fn program_installed(&self, program: &str) -> bool {
        self.programs.iter().any(|p| p == program)
    }

    fn ensure_dir(&self, dir: &Path) -> Result<(), HostError> {
        if self.fail_ensure_dir {
            return Err(HostError::Write {
                path: dir.to_path_buf(),
                source: Self::denied(),
            });
        }
        Ok(())
    }

    fn write_config(&self, path: &Path, content: &str) -> Result<(), HostError> {
        if self.fail_writes {
            return Err(HostError::Write {
                path: path.to_path_buf(),
                source: Self::denied(),
            });
        }
        self.files.lock().unwrap().insert(path.to_path_buf());
        self.written
            .lock()
            .unwrap()
            .push((path.to_path_buf(), content.to_string()));
        Ok(())
    }

    fn copy_file(&self, from: &Path, to: &Path) -> Result<(), HostError> {
        let mut files = self.files.lock().unwrap();
        if !files.contains(from) {
            return Err(HostError::Read {
                path: from.to_path_buf(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        if !files.insert(to.to_path_buf()) {
            return Err(HostError::Write {
                path: to.to_path_buf(),
                source: std::io::Error::from(std::io::ErrorKind::AlreadyExists),
            });
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<(), HostError> {
        if self.files.lock().unwrap().remove(path) {
            Ok(())
        } else {
            Err(HostError::Remove {
                path: path.to_path_buf(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        }
    }

    fn remove_dir(&self, path: &Path) -> Result<(), HostError> {
        self.files
            .lock()
            .unwrap()
            .retain(|file| !file.starts_with(path));
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Script {
    prefix: String,
    lines: Vec<String>,
    success: bool,
}

/// Answers command lines from a script and records every call.
///
/// Lines are delivered from a spawned task with a yield between each, so a
/// caller that does not wait for `Exited` would see interleaving.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRunner {
    scripts: Vec<Script>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands starting with `prefix` print `lines` then exit 0 or 1.
    pub fn script(mut self, prefix: &str, lines: &[&str], success: bool) -> Self {
        self.scripts.push(Script {
            prefix: prefix.to_string(),
            lines: lines.iter().map(|l| l.to_string()).collect(),
            success,
        });
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, command_line: &str) -> UnboundedReceiver<RunnerEvent> {
        self.calls.lock().unwrap().push(command_line.to_string());
        let script = self
            .scripts
            .iter()
            .find(|script| command_line.starts_with(&script.prefix))
            .cloned();

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let (lines, success) = script.map_or((Vec::new(), true), |s| (s.lines, s.success));
            for text in lines {
                tokio::task::yield_now().await;
                let _ = tx.send(RunnerEvent::Line {
                    stream: Stream::Stdout,
                    text,
                });
            }
            tokio::task::yield_now().await;
            let result = if success {
                Ok(())
            } else {
                Err(RunError::ExitCode(1))
            };
            let _ = tx.send(RunnerEvent::Exited(result));
        });
        rx
    }
}
