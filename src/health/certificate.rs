use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{Result, VaultError};

const DEFAULT_CERT_MARKERS: [&str; 2] = ["TRAEFIK DEFAULT CERT", "Kubernetes Ingress Controller Fake Certificate"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateInfo {
    pub subject: Option<String>,
    pub issuer: Option<String>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
    /// Chain validated against the trusted root store.
    pub verified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateReport {
    pub domain: String,
    pub issuer: Option<String>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
    pub days_remaining: Option<i64>,
    pub trusted: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl CertificateReport {
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }
}

pub trait CertificateProbe: Sync {
    /// Status code of `GET https://<domain>/` with certificate verification on.
    fn https_status(&self, domain: &str) -> Result<u16>;
    fn fetch_certificate(&self, domain: &str) -> Result<CertificateInfo>;
}

pub fn status_is_acceptable(code: u16) -> bool {
    matches!(code, 200..=399 | 401 | 403)
}

/// reqwest (rustls, webpki roots) for the HTTPS probe, `openssl` for the certificate details.
pub struct TlsProbe {
    client: reqwest::blocking::Client,
}

impl TlsProbe {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(15))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| VaultError::message(format!("build https client: {}", e)))?;
        Ok(Self { client })
    }
}

impl CertificateProbe for TlsProbe {
    fn https_status(&self, domain: &str) -> Result<u16> {
        let url = format!("https://{}/", domain);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| VaultError::message(format!("GET {}: {}", url, e)))?;
        Ok(response.status().as_u16())
    }

    fn fetch_certificate(&self, domain: &str) -> Result<CertificateInfo> {
        let output = Command::new("openssl")
            .arg("s_client")
            .arg("-servername")
            .arg(domain)
            .arg("-connect")
            .arg(format!("{}:443", domain))
            .stdin(Stdio::null())
            .output()
            .map_err(|e| VaultError::message(format!("openssl s_client: {}", e)))?;
        let transcript = String::from_utf8_lossy(&output.stdout).to_string();
        let pem = first_pem_block(&transcript).ok_or_else(|| {
            VaultError::message(format!("no certificate presented by {}", domain))
        })?;
        let verified = parse_verify_code(&transcript) == Some(0);

        let mut child = Command::new("openssl")
            .arg("x509")
            .arg("-noout")
            .arg("-subject")
            .arg("-issuer")
            .arg("-dates")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| VaultError::message(format!("openssl x509: {}", e)))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(pem.as_bytes())
                .map_err(|e| VaultError::message(format!("openssl x509: {}", e)))?;
        }
        let parsed = child
            .wait_with_output()
            .map_err(|e| VaultError::message(format!("openssl x509: {}", e)))?;
        if !parsed.status.success() {
            return Err(VaultError::message(format!(
                "openssl x509 failed: {}",
                String::from_utf8_lossy(&parsed.stderr).trim()
            )));
        }
        let mut info = parse_x509_text(&String::from_utf8_lossy(&parsed.stdout));
        info.verified = verified;
        Ok(info)
    }
}

fn first_pem_block(text: &str) -> Option<String> {
    let start = text.find("-----BEGIN CERTIFICATE-----")?;
    let end_marker = "-----END CERTIFICATE-----";
    let end = text[start..].find(end_marker)? + start + end_marker.len();
    Some(format!("{}\n", &text[start..end]))
}

fn parse_verify_code(text: &str) -> Option<i64> {
    text.lines()
        .filter_map(|line| line.trim().strip_prefix("Verify return code:"))
        .last()
        .and_then(|rest| rest.trim().split_whitespace().next())
        .and_then(|code| code.parse().ok())
}

pub fn parse_x509_text(text: &str) -> CertificateInfo {
    let mut info = CertificateInfo::default();
    for line in text.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("subject=") {
            info.subject = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("issuer=") {
            info.issuer = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("notBefore=") {
            info.not_before = parse_openssl_date(value);
        } else if let Some(value) = line.strip_prefix("notAfter=") {
            info.not_after = parse_openssl_date(value);
        }
    }
    info
}

/// OpenSSL prints dates as `Jan  1 00:00:00 2024 GMT`.
pub fn parse_openssl_date(date_str: &str) -> Option<DateTime<Utc>> {
    let date_str = date_str.trim().trim_end_matches(" GMT");
    NaiveDateTime::parse_from_str(date_str, "%b %e %H:%M:%S %Y")
        .ok()
        .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc))
}

pub fn evaluate_certificate(
    domain: &str,
    info: &CertificateInfo,
    now: DateTime<Utc>,
    warning_days: i64,
) -> CertificateReport {
    let mut warnings = Vec::new();
    let mut errors = Vec::new();

    if !info.verified {
        errors.push("certificate chain does not validate against a trusted root".to_string());
    }
    match info.not_before {
        Some(from) if from > now => errors.push(format!("certificate not valid before {}", from)),
        Some(_) => {}
        None => errors.push("certificate has no readable notBefore".to_string()),
    }
    let days_remaining = info.not_after.map(|until| (until - now).num_days());
    match info.not_after {
        Some(until) if until <= now => errors.push(format!("certificate expired at {}", until)),
        Some(until) => {
            if let Some(days) = days_remaining {
                if days < warning_days {
                    warnings.push(format!("certificate expires in {} days ({})", days, until));
                }
            }
        }
        None => errors.push("certificate has no readable notAfter".to_string()),
    }
    if let Some(issuer) = &info.issuer {
        if DEFAULT_CERT_MARKERS.iter().any(|m| issuer.contains(m)) {
            warnings.push(format!("certificate issuer looks like a default certificate: {}", issuer));
        } else if info.subject.as_deref() == Some(issuer.as_str()) {
            warnings.push(format!("certificate is self-signed: {}", issuer));
        }
    } else {
        warnings.push("certificate issuer unreadable".to_string());
    }

    CertificateReport {
        domain: domain.to_string(),
        issuer: info.issuer.clone(),
        not_before: info.not_before,
        not_after: info.not_after,
        days_remaining,
        trusted: info.verified,
        warnings,
        errors,
    }
}
