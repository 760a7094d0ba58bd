use std::path::{Path, PathBuf};
use std::sync::Arc;

use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair, PKCS_RSA_SHA256};
use rsa::pkcs8::EncodePrivateKey;
use rsa::RsaPrivateKey;
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use thiserror::Error;

const RSA_KEY_BITS: usize = 2048;

/// Mirrors the teacher's `DistributedTlsError`: one error enum for every
/// way a TLS bundle can fail to come together, each with a stable tag.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("tls is disabled")]
    Disabled,
    #[error("missing certificate path")]
    MissingCertPath,
    #[error("missing key path")]
    MissingKeyPath,
    #[error("invalid minimum tls version: {0}")]
    InvalidMinVersion(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("empty certificate chain")]
    EmptyCertChain,
    #[error("empty private key")]
    EmptyPrivateKey,
    #[error("tls config error: {0}")]
    Config(String),
}

impl TlsError {
    pub fn code(&self) -> &'static str {
        match self {
            TlsError::Disabled => "tls.disabled",
            TlsError::MissingCertPath => "tls.missing_cert_path",
            TlsError::MissingKeyPath => "tls.missing_key_path",
            TlsError::InvalidMinVersion(_) => "tls.invalid_min_version",
            TlsError::Io(_) => "tls.io",
            TlsError::EmptyCertChain => "tls.empty_cert_chain",
            TlsError::EmptyPrivateKey => "tls.empty_private_key",
            TlsError::Config(_) => "tls.config",
        }
    }
}

/// Minimum TLS version accepted by the dispatcher; defaults to 1.2 per
/// the transport security section of the command dispatcher design.
pub fn resolve_min_version(name: &str) -> Result<&'static rustls::SupportedProtocolVersion, TlsError> {
    match name {
        "TLSv1.2" => Ok(&rustls::version::TLS12),
        "TLSv1.3" => Ok(&rustls::version::TLS13),
        "TLSv1" | "TLSv1.1" => Err(TlsError::InvalidMinVersion(name.to_string())),
        other => Err(TlsError::InvalidMinVersion(other.to_string())),
    }
}

/// Layout of a certificate store: a self-signed CA plus a server leaf it
/// signs, matching the on-disk bundle the dispatcher expects to find.
pub struct CertPaths {
    pub dir: PathBuf,
    pub ca_key_pem: PathBuf,
    pub ca_pem: PathBuf,
    pub key_pem: PathBuf,
    pub cert_pem: PathBuf,
    pub openssl_cnf: PathBuf,
}

impl CertPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            ca_key_pem: dir.join("ca-key.pem"),
            ca_pem: dir.join("ca.pem"),
            key_pem: dir.join("key.pem"),
            cert_pem: dir.join("cert.pem"),
            openssl_cnf: dir.join("openssl.cnf"),
        }
    }
}

/// Generates a self-signed CA and a server leaf it signs (2048-bit RSA,
/// `validity_days` validity) if the store is incomplete, and regenerates
/// it if the leaf is within 30 days of expiry.
pub fn ensure_certificate(paths: &CertPaths, validity_days: u32) -> Result<(), TlsError> {
    let complete = [&paths.ca_key_pem, &paths.ca_pem, &paths.key_pem, &paths.cert_pem, &paths.openssl_cnf]
        .iter()
        .all(|p| p.exists());
    if complete && !is_near_expiry(&paths.cert_pem)? {
        return Ok(());
    }
    std::fs::create_dir_all(&paths.dir)?;
    generate_self_signed(paths, validity_days)
}

fn is_near_expiry(cert_path: &Path) -> Result<bool, TlsError> {
    let pem = std::fs::read_to_string(cert_path)?;
    let der = match rustls_pemfile::certs(&mut pem.as_bytes()).next() {
        Some(Ok(der)) => der,
        _ => return Ok(true),
    };
    let (_, parsed) = x509_parser::parse_x509_certificate(der.as_ref())
        .map_err(|e| TlsError::Config(e.to_string()))?;
    let not_after = parsed.validity().not_after.timestamp();
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    const THIRTY_DAYS_SECS: i64 = 30 * 24 * 3600;
    Ok(not_after - now < THIRTY_DAYS_SECS)
}

fn rsa_key_pair() -> Result<KeyPair, TlsError> {
    let mut rng = rand_core::OsRng;
    let private_key =
        RsaPrivateKey::new(&mut rng, RSA_KEY_BITS).map_err(|e| TlsError::Config(e.to_string()))?;
    let pkcs8_der = private_key.to_pkcs8_der().map_err(|e| TlsError::Config(e.to_string()))?;
    KeyPair::from_der_and_sign_algo(&PrivatePkcs8KeyDer::from(pkcs8_der.as_bytes().to_vec()), &PKCS_RSA_SHA256)
        .map_err(|e| TlsError::Config(e.to_string()))
}

fn write_private_key(path: &Path, pem: &str) -> Result<(), TlsError> {
    std::fs::write(path, pem)?;
    restrict_key_permissions(path)?;
    Ok(())
}

#[cfg(unix)]
fn restrict_key_permissions(path: &Path) -> Result<(), TlsError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_key_permissions(_path: &Path) -> Result<(), TlsError> {
    Ok(())
}

const OPENSSL_CNF: &str = "[req]\n\
distinguished_name = req_distinguished_name\n\
x509_extensions = v3_ca\n\
prompt = no\n\
\n\
[req_distinguished_name]\n\
CN = localhost\n\
\n\
[v3_ca]\n\
basicConstraints = critical,CA:TRUE\n\
keyUsage = critical,keyCertSign,cRLSign\n\
\n\
[v3_leaf]\n\
basicConstraints = critical,CA:FALSE\n\
keyUsage = critical,digitalSignature,keyEncipherment\n\
subjectAltName = DNS:localhost\n";

/// Builds a self-signed CA and a server leaf it signs, both 2048-bit
/// RSA. `rcgen` can only sign with an externally-supplied RSA key, so
/// the keys themselves come from the `rsa` crate.
fn generate_self_signed(paths: &CertPaths, validity_days: u32) -> Result<(), TlsError> {
    let not_before = time::OffsetDateTime::now_utc();
    let not_after = not_before + time::Duration::days(validity_days as i64);

    let mut ca_params =
        CertificateParams::new(vec!["revenant local CA".to_string()]).map_err(|e| TlsError::Config(e.to_string()))?;
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.not_before = not_before;
    ca_params.not_after = not_after;
    let ca_key = rsa_key_pair()?;
    let ca_cert = ca_params.self_signed(&ca_key).map_err(|e| TlsError::Config(e.to_string()))?;

    let mut leaf_params =
        CertificateParams::new(vec!["localhost".to_string()]).map_err(|e| TlsError::Config(e.to_string()))?;
    leaf_params.not_before = not_before;
    leaf_params.not_after = not_after;
    let leaf_key = rsa_key_pair()?;
    let leaf_cert =
        leaf_params.signed_by(&leaf_key, &ca_cert, &ca_key).map_err(|e| TlsError::Config(e.to_string()))?;

    write_private_key(&paths.ca_key_pem, &ca_key.serialize_pem())?;
    std::fs::write(&paths.ca_pem, ca_cert.pem())?;
    write_private_key(&paths.key_pem, &leaf_key.serialize_pem())?;
    std::fs::write(&paths.cert_pem, leaf_cert.pem())?;
    std::fs::write(&paths.openssl_cnf, OPENSSL_CNF)?;
    Ok(())
}

pub fn load_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let pem = std::fs::read_to_string(path)?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut pem.as_bytes())
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(TlsError::EmptyCertChain);
    }
    Ok(certs)
}

pub fn load_private_key(path: &Path) -> Result<PrivatePkcs8KeyDer<'static>, TlsError> {
    let pem = std::fs::read_to_string(path)?;
    let key = rustls_pemfile::pkcs8_private_keys(&mut pem.as_bytes())
        .next()
        .ok_or(TlsError::EmptyPrivateKey)?
        .map_err(|e| TlsError::Config(e.to_string()))?;
    Ok(key)
}

/// Builds the server-side TLS bundle the dispatcher's websocket
/// listener wraps connections in. The presented chain is leaf-then-CA so
/// clients that don't already trust the CA can still validate the path.
pub fn build_server_config(paths: &CertPaths, min_version_name: &str) -> Result<Arc<ServerConfig>, TlsError> {
    resolve_min_version(min_version_name)?;
    let mut certs = load_cert_chain(&paths.cert_pem)?;
    certs.extend(load_cert_chain(&paths.ca_pem)?);
    let key = load_private_key(&paths.key_pem)?;
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key.into())
        .map_err(|e| TlsError::Config(e.to_string()))?;
    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_pre_tls12_minimum_versions() {
        assert!(matches!(resolve_min_version("TLSv1"), Err(TlsError::InvalidMinVersion(_))));
        assert!(matches!(resolve_min_version("TLSv1.1"), Err(TlsError::InvalidMinVersion(_))));
    }

    #[test]
    fn accepts_tls12_and_tls13() {
        assert!(resolve_min_version("TLSv1.2").is_ok());
        assert!(resolve_min_version("TLSv1.3").is_ok());
    }

    #[test]
    fn self_signed_store_is_generated_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CertPaths::in_dir(dir.path());
        ensure_certificate(&paths, 365).unwrap();
        assert!(paths.ca_key_pem.exists());
        assert!(paths.ca_pem.exists());
        assert!(paths.key_pem.exists());
        assert!(paths.cert_pem.exists());
        assert!(paths.openssl_cnf.exists());
    }

    #[test]
    fn server_config_builds_from_generated_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CertPaths::in_dir(dir.path());
        ensure_certificate(&paths, 365).unwrap();
        let config = build_server_config(&paths, "TLSv1.2");
        assert!(config.is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn private_key_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let paths = CertPaths::in_dir(dir.path());
        ensure_certificate(&paths, 365).unwrap();
        for key_path in [&paths.ca_key_pem, &paths.key_pem] {
            let mode = std::fs::metadata(key_path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
    }

    #[test]
    fn leaf_certificate_is_signed_by_the_generated_ca() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CertPaths::in_dir(dir.path());
        ensure_certificate(&paths, 365).unwrap();
        let leaf_pem = std::fs::read_to_string(&paths.cert_pem).unwrap();
        let ca_pem = std::fs::read_to_string(&paths.ca_pem).unwrap();
        assert_ne!(leaf_pem, ca_pem);
        let leaf_der = rustls_pemfile::certs(&mut leaf_pem.as_bytes()).next().unwrap().unwrap();
        let (_, leaf) = x509_parser::parse_x509_certificate(leaf_der.as_ref()).unwrap();
        let ca_der = rustls_pemfile::certs(&mut ca_pem.as_bytes()).next().unwrap().unwrap();
        let (_, ca) = x509_parser::parse_x509_certificate(ca_der.as_ref()).unwrap();
        assert_eq!(leaf.issuer(), ca.subject());
    }
}
