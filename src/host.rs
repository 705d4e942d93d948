//! Host collaborators: certificate discovery and inspection, config listing,
//! program lookup and the filesystem writes a batch performs.
//!
//! The wizard only reads through this interface; writes happen from the
//! sequencer while a batch runs.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::{debug, info, warn};

const CERTIFICATE_EXTENSIONS: [&str; 3] = ["crt", "pem", "cer"];
const KEY_EXTENSION: &str = "key";
const CONFIG_EXTENSION: &str = "conf";

/// A certificate discovered on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    /// File stem, unique within the certificate directory
    pub id: String,
    pub cert_path: PathBuf,
    /// `<stem>.key` next to the certificate, when present
    pub key_path: Option<PathBuf>,
    pub domains: Vec<String>,
}

impl CertificateInfo {
    /// One-line summary shown in certificate lists.
    pub fn description(&self) -> String {
        let cert = file_name(&self.cert_path);
        let key = self
            .key_path
            .as_deref()
            .map(file_name)
            .unwrap_or_else(|| "N/A".to_string());
        let domains = if self.domains.is_empty() {
            "N/A".to_string()
        } else {
            self.domains.join(", ")
        };
        format!("Cert: {cert} | Key: {key} | Domains: {domains}")
    }
}

/// Every file a certificate named `name` would occupy in `dir`
pub fn certificate_paths(dir: &Path, name: &str) -> Vec<PathBuf> {
    CERTIFICATE_EXTENSIONS
        .iter()
        .chain(std::iter::once(&KEY_EXTENSION))
        .map(|ext| dir.join(format!("{name}.{ext}")))
        .collect()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to remove {}: {source}", .path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to inspect certificate {}: {reason}", .path.display())]
    Inspect { path: PathBuf, reason: String },
}

/// Everything the console needs from the machine it manages
pub trait Host: Send + Sync {
    /// Certificates in `dir`, ordered by identifier. A missing directory is empty.
    fn discover_certificates(&self, dir: &Path) -> Result<Vec<CertificateInfo>, HostError>;

    /// DNS names from the certificate's subjectAltName extension.
    fn extract_domains(&self, cert_path: &Path) -> Result<Vec<String>, HostError>;

    fn file_exists(&self, path: &Path) -> bool;

    /// Names (without `.conf`) of the proxy configs in `dir`, sorted.
    fn list_configs(&self, dir: &Path) -> Result<Vec<String>, HostError>;

    /// Every certificate and key file in `dir`, sorted.
    fn certificate_files(&self, dir: &Path) -> Result<Vec<PathBuf>, HostError>;

    fn program_installed(&self, program: &str) -> bool;

    fn ensure_dir(&self, dir: &Path) -> Result<(), HostError>;

    fn write_config(&self, path: &Path, content: &str) -> Result<(), HostError>;

    /// Copy `from` to `to`; an existing `to` is an error, never overwritten.
    fn copy_file(&self, from: &Path, to: &Path) -> Result<(), HostError>;

    fn remove_file(&self, path: &Path) -> Result<(), HostError>;

    /// Recursive removal; an absent directory is not an error.
    fn remove_dir(&self, path: &Path) -> Result<(), HostError>;
}

/// The real machine
#[derive(Debug, Clone, Default)]
pub struct SystemHost;

impl SystemHost {
    fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>, HostError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(HostError::Read {
                    path: dir.to_path_buf(),
                    source,
                });
            }
        };

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| HostError::Read {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.contains(&ext))
}

impl Host for SystemHost {
    fn discover_certificates(&self, dir: &Path) -> Result<Vec<CertificateInfo>, HostError> {
        let mut certificates = Vec::new();
        for cert_path in Self::read_dir_sorted(dir)? {
            if !has_extension(&cert_path, &CERTIFICATE_EXTENSIONS) {
                continue;
            }
            let Some(id) = cert_path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            let key_path = dir.join(format!("{id}.{KEY_EXTENSION}"));
            let key_path = key_path.is_file().then_some(key_path);
            let domains = self.extract_domains(&cert_path).unwrap_or_else(|e| {
                warn!(error = %e, "Could not read certificate domains");
                Vec::new()
            });

            certificates.push(CertificateInfo {
                id,
                cert_path,
                key_path,
                domains,
            });
        }
        certificates.sort_by(|a, b| a.id.cmp(&b.id));
        debug!(dir = %dir.display(), count = certificates.len(), "Discovered certificates");
        Ok(certificates)
    }

    fn extract_domains(&self, cert_path: &Path) -> Result<Vec<String>, HostError> {
        let output = Command::new("openssl")
            .args(["x509", "-in"])
            .arg(cert_path)
            .args(["-noout", "-ext", "subjectAltName"])
            .output()
            .map_err(|e| HostError::Inspect {
                path: cert_path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(HostError::Inspect {
                path: cert_path.to_path_buf(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(parse_subject_alt_names(&String::from_utf8_lossy(&output.stdout)))
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn list_configs(&self, dir: &Path) -> Result<Vec<String>, HostError> {
        Ok(Self::read_dir_sorted(dir)?
            .into_iter()
            .filter(|path| has_extension(path, &[CONFIG_EXTENSION]))
            .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect())
    }

    fn certificate_files(&self, dir: &Path) -> Result<Vec<PathBuf>, HostError> {
        let mut extensions = CERTIFICATE_EXTENSIONS.to_vec();
        extensions.push(KEY_EXTENSION);
        Ok(Self::read_dir_sorted(dir)?
            .into_iter()
            .filter(|path| has_extension(path, &extensions))
            .collect())
    }

    fn program_installed(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }

    fn ensure_dir(&self, dir: &Path) -> Result<(), HostError> {
        fs::create_dir_all(dir).map_err(|source| HostError::Write {
            path: dir.to_path_buf(),
            source,
        })
    }

    fn write_config(&self, path: &Path, content: &str) -> Result<(), HostError> {
        fs::write(path, content).map_err(|source| HostError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "Wrote configuration file");
        Ok(())
    }

    fn copy_file(&self, from: &Path, to: &Path) -> Result<(), HostError> {
        let mut source = File::open(from).map_err(|source| HostError::Read {
            path: from.to_path_buf(),
            source,
        })?;
        let mut target = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(to)
            .map_err(|source| HostError::Write {
                path: to.to_path_buf(),
                source,
            })?;
        io::copy(&mut source, &mut target).map_err(|source| HostError::Write {
            path: to.to_path_buf(),
            source,
        })?;
        info!(from = %from.display(), to = %to.display(), "Copied file");
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<(), HostError> {
        fs::remove_file(path).map_err(|source| HostError::Remove {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "Removed file");
        Ok(())
    }

    fn remove_dir(&self, path: &Path) -> Result<(), HostError> {
        match fs::remove_dir_all(path) {
            Ok(()) => {
                info!(path = %path.display(), "Removed directory");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(HostError::Remove {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// Reads from the real machine but never modifies it.
#[derive(Debug, Clone, Default)]
pub struct DryRunHost {
    inner: SystemHost,
}

impl Host for DryRunHost {
    fn discover_certificates(&self, dir: &Path) -> Result<Vec<CertificateInfo>, HostError> {
        self.inner.discover_certificates(dir)
    }

    fn extract_domains(&self, cert_path: &Path) -> Result<Vec<String>, HostError> {
        self.inner.extract_domains(cert_path)
    }

    fn file_exists(&self, path: &Path) -> bool {
        self.inner.file_exists(path)
    }

    fn list_configs(&self, dir: &Path) -> Result<Vec<String>, HostError> {
        self.inner.list_configs(dir)
    }

    fn certificate_files(&self, dir: &Path) -> Result<Vec<PathBuf>, HostError> {
        self.inner.certificate_files(dir)
    }

    fn program_installed(&self, program: &str) -> bool {
        self.inner.program_installed(program)
    }

    fn ensure_dir(&self, dir: &Path) -> Result<(), HostError> {
        info!(dir = %dir.display(), "[dry-run] would create directory");
        Ok(())
    }

    fn write_config(&self, path: &Path, content: &str) -> Result<(), HostError> {
        info!(path = %path.display(), bytes = content.len(), "[dry-run] would write file");
        Ok(())
    }

    fn copy_file(&self, from: &Path, to: &Path) -> Result<(), HostError> {
        info!(from = %from.display(), to = %to.display(), "[dry-run] would copy file");
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<(), HostError> {
        info!(path = %path.display(), "[dry-run] would remove file");
        Ok(())
    }

    fn remove_dir(&self, path: &Path) -> Result<(), HostError> {
        info!(path = %path.display(), "[dry-run] would remove directory");
        Ok(())
    }
}

/// Collect every `DNS:` entry from `openssl x509 -ext subjectAltName` output.
pub fn parse_subject_alt_names(output: &str) -> Vec<String> {
    output
        .lines()
        .flat_map(|line| line.split(','))
        .filter_map(|part| part.trim().strip_prefix("DNS:"))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parses_dns_entries_only() {
        let output = "X509v3 Subject Alternative Name: \n    DNS:example.com, DNS:www.example.com, IP Address:10.0.0.1\n";
        assert_eq!(
            parse_subject_alt_names(output),
            vec!["example.com".to_string(), "www.example.com".to_string()]
        );
    }

    #[test]
    fn no_extension_means_no_domains() {
        assert!(parse_subject_alt_names("").is_empty());
        assert!(parse_subject_alt_names("No extensions in certificate\n").is_empty());
    }

    #[test]
    fn description_marks_missing_parts() {
        let cert = CertificateInfo {
            id: "api".into(),
            cert_path: PathBuf::from("/etc/ssl/files/api.crt"),
            key_path: None,
            domains: Vec::new(),
        };
        assert_eq!(cert.description(), "Cert: api.crt | Key: N/A | Domains: N/A");

        let cert = CertificateInfo {
            key_path: Some(PathBuf::from("/etc/ssl/files/api.key")),
            domains: vec!["api.example.com".into(), "example.com".into()],
            ..cert
        };
        assert_eq!(
            cert.description(),
            "Cert: api.crt | Key: api.key | Domains: api.example.com, example.com"
        );
    }

    #[test]
    fn discovery_pairs_keys_and_orders_by_id() {
        let dir = TempDir::new().unwrap();
        // Not real certificates: domain extraction fails softly.
        fs::write(dir.path().join("zeta.crt"), "x").unwrap();
        fs::write(dir.path().join("zeta.key"), "x").unwrap();
        fs::write(dir.path().join("alpha.pem"), "x").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let certs = SystemHost.discover_certificates(dir.path()).unwrap();
        let ids: Vec<_> = certs.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["alpha", "zeta"]);
        assert!(certs[0].key_path.is_none());
        assert_eq!(certs[1].key_path, Some(dir.path().join("zeta.key")));
    }

    #[test]
    fn missing_directories_are_empty() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing");

        assert!(SystemHost.discover_certificates(&missing).unwrap().is_empty());
        assert!(SystemHost.list_configs(&missing).unwrap().is_empty());
        assert!(SystemHost.remove_dir(&missing).is_ok());
    }

    #[test]
    fn lists_config_names_sorted() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("web.conf"), "").unwrap();
        fs::write(dir.path().join("api.conf"), "").unwrap();
        fs::write(dir.path().join("readme.md"), "").unwrap();

        assert_eq!(SystemHost.list_configs(dir.path()).unwrap(), ["api", "web"]);
    }

    #[test]
    fn certificate_files_include_keys() {
        let dir = TempDir::new().unwrap();
        for name in ["a.crt", "a.key", "b.cer", "c.txt"] {
            fs::write(dir.path().join(name), "").unwrap();
        }

        let files = SystemHost.certificate_files(dir.path()).unwrap();
        let names: Vec<_> = files.iter().map(|p| file_name(p)).collect();
        assert_eq!(names, ["a.crt", "a.key", "b.cer"]);
    }

    #[test]
    fn write_then_remove() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("edge1.conf");

        SystemHost.write_config(&path, "upstream edge1 {}\n").unwrap();
        assert!(SystemHost.file_exists(&path));

        SystemHost.remove_file(&path).unwrap();
        assert!(!SystemHost.file_exists(&path));
        assert!(matches!(
            SystemHost.remove_file(&path),
            Err(HostError::Remove { .. })
        ));
    }

    #[test]
    fn copy_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let from = dir.path().join("upload.pem");
        let to = dir.path().join("shop.crt");
        fs::write(&from, "-----BEGIN CERTIFICATE-----\n").unwrap();

        SystemHost.copy_file(&from, &to).unwrap();
        assert_eq!(fs::read_to_string(&to).unwrap(), "-----BEGIN CERTIFICATE-----\n");

        fs::write(&from, "other").unwrap();
        assert!(matches!(
            SystemHost.copy_file(&from, &to),
            Err(HostError::Write { .. })
        ));
        assert_eq!(fs::read_to_string(&to).unwrap(), "-----BEGIN CERTIFICATE-----\n");
        assert!(matches!(
            SystemHost.copy_file(&dir.path().join("missing.pem"), &dir.path().join("x.crt")),
            Err(HostError::Read { .. })
        ));
    }

    #[test]
    fn certificate_paths_cover_every_extension() {
        let names: Vec<_> = certificate_paths(Path::new("/etc/ssl/files"), "shop")
            .iter()
            .map(|p| file_name(p))
            .collect();
        assert_eq!(names, ["shop.crt", "shop.pem", "shop.cer", "shop.key"]);
    }
}
