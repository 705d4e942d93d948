//! nginx reverse-proxy configuration rendering

use std::fmt::Write as _;
use std::path::PathBuf;

use crate::session::SetupKind;

/// Listener side of a proxy plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Site {
    /// Plain HTTP, addressed by the server's own IP
    Plain { server_name: String },
    /// HTTP redirect plus an HTTPS listener
    Tls {
        server_name: String,
        https_port: u16,
        cert_path: PathBuf,
        key_path: PathBuf,
    },
}

/// A fully answered add-config flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyPlan {
    pub name: String,
    pub setup: SetupKind,
    pub upstreams: Vec<String>,
    pub http_port: u16,
    pub site: Site,
}

impl ProxyPlan {
    pub fn https_port(&self) -> Option<u16> {
        match &self.site {
            Site::Plain { .. } => None,
            Site::Tls { https_port, .. } => Some(*https_port),
        }
    }
}

/// Render the complete `<name>.conf` content.
pub fn render(plan: &ProxyPlan) -> String {
    let mut out = String::new();
    out.push_str("# Upstream block for the backend server(s)\n");
    out.push_str(&upstream_block(plan));
    out.push('\n');

    match &plan.site {
        Site::Plain { server_name } => {
            let _ = write!(
                out,
                "server {{\n    listen {};\n    server_name {};\n\n{}}}\n",
                plan.http_port,
                server_name,
                location_block(plan)
            );
        }
        Site::Tls {
            server_name,
            https_port,
            cert_path,
            key_path,
        } => {
            out.push_str("# Redirect all HTTP traffic to HTTPS\n");
            let _ = write!(
                out,
                "server {{\n    listen {};\n    server_name {};\n    return 301 https://$host$request_uri;\n}}\n\n",
                plan.http_port, server_name
            );
            out.push_str("# TLS termination and reverse proxy\n");
            let _ = write!(
                out,
                "server {{\n    listen {} ssl;\n    server_name {};\n\n    ssl_certificate {};\n    ssl_certificate_key {};\n\n    ssl_protocols TLSv1.2 TLSv1.3;\n    ssl_ciphers HIGH:!aNULL:!MD5;\n\n{}}}\n",
                https_port,
                server_name,
                cert_path.display(),
                key_path.display(),
                location_block(plan)
            );
        }
    }
    out
}

fn upstream_block(plan: &ProxyPlan) -> String {
    let mut block = format!("upstream {} {{\n", plan.name);
    if plan.setup == SetupKind::Websocket {
        block.push_str("    ip_hash;\n");
    }
    for upstream in &plan.upstreams {
        let _ = writeln!(block, "    server {upstream};");
    }
    block.push_str("}\n");
    block
}

fn location_block(plan: &ProxyPlan) -> String {
    let mut block = format!("    location / {{\n        proxy_pass http://{};\n", plan.name);
    if plan.setup == SetupKind::Websocket {
        block.push_str("\n        proxy_http_version 1.1;\n");
        block.push_str("        proxy_set_header Upgrade $http_upgrade;\n");
        block.push_str("        proxy_set_header Connection \"upgrade\";\n\n");
    }
    block.push_str("        proxy_set_header Host $host;\n");
    block.push_str("        proxy_set_header X-Real-IP $remote_addr;\n");
    block.push_str("        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;\n");
    block.push_str("        proxy_set_header X-Forwarded-Proto $scheme;\n");
    block.push_str("    }\n");
    block
}
