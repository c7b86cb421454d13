//! The bastion's certificate authority.
//!
//! An ed25519 signing key persisted in OpenSSH PEM at a configured path
//! (0600, directory 0700). User certificates are issued only against live
//! grants and carry the grant id and target as extensions, so even a
//! transiently wrong grant store is bounded by the certificate's validity
//! window.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use russh::keys::ssh_key;
use ssh_key::certificate::{Builder, CertType, Certificate};
use ssh_key::rand_core::OsRng;
use ssh_key::{Algorithm, HashAlg, LineEnding, PrivateKey, PublicKey};

use shield_types::{Grant, ShieldError};

use crate::fsutil::write_atomic;
use crate::{system_clock, Clock};

/// Signs and validates short-lived user certificates tied to grants.
pub struct CertificateAuthority {
    key: PrivateKey,
    key_path: PathBuf,
    clock: Clock,
}

impl CertificateAuthority {
    /// Load the CA key from `path`, generating and persisting a fresh
    /// ed25519 keypair if the file does not exist.
    pub fn load_or_create(path: &Path) -> Result<Self, ShieldError> {
        Self::with_clock(path, system_clock())
    }

    /// As `load_or_create` with an injectable clock.
    pub fn with_clock(path: &Path, clock: Clock) -> Result<Self, ShieldError> {
        let key = load_or_create_key(path)?;
        Ok(Self {
            key,
            key_path: path.to_path_buf(),
            clock,
        })
    }

    /// The CA public key.
    pub fn public_key(&self) -> &PublicKey {
        self.key.public_key()
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    /// Issue a user certificate for the caller's public key, bound to a
    /// live grant.
    ///
    /// The certificate's principal is the grant's principal, its validity
    /// window runs from now to the grant's expiry, and the grant id and
    /// target are embedded as extensions.
    pub fn issue_user_certificate(
        &self,
        public_key: &PublicKey,
        grant: &Grant,
    ) -> Result<Certificate, ShieldError> {
        let now = (self.clock)();
        if !grant.is_active_at(now) {
            return Err(ShieldError::Grant(format!("grant {} expired", grant.id)));
        }

        let valid_after = now.timestamp().max(0) as u64;
        let valid_before = grant.expires_at.timestamp().max(0) as u64;
        let serial = now.timestamp_nanos_opt().unwrap_or_default().max(0) as u64;

        let mut builder = Builder::new_with_random_nonce(
            &mut OsRng,
            public_key.key_data().clone(),
            valid_after,
            valid_before,
        )
        .map_err(cert_err)?;
        builder.serial(serial).map_err(cert_err)?;
        builder.cert_type(CertType::User).map_err(cert_err)?;
        builder.key_id(grant.id.as_str()).map_err(cert_err)?;
        builder
            .valid_principal(grant.principal.as_str())
            .map_err(cert_err)?;
        builder
            .extension("grant_id", grant.id.as_str())
            .map_err(cert_err)?;
        builder
            .extension("target", grant.target.as_str())
            .map_err(cert_err)?;

        builder.sign(&self.key).map_err(cert_err)
    }

    /// Validate a presented user certificate: signed by this CA, inside its
    /// validity window, and valid for the supplied principal. A certificate
    /// with no principals is valid for any user, matching the standard
    /// checker.
    pub fn validate_user_certificate(
        &self,
        cert: &Certificate,
        principal: &str,
    ) -> Result<(), ShieldError> {
        if cert.cert_type() != CertType::User {
            return Err(ShieldError::Certificate("not a user certificate".into()));
        }

        let now = (self.clock)().timestamp().max(0) as u64;
        let ca_fingerprint = self.key.public_key().fingerprint(HashAlg::Sha256);
        cert.validate_at(now, [&ca_fingerprint])
            .map_err(|e| ShieldError::Certificate(format!("certificate rejected: {e}")))?;

        let principals = cert.valid_principals();
        if !principals.is_empty() && !principals.iter().any(|p| p == principal) {
            return Err(ShieldError::Certificate(format!(
                "certificate not valid for principal '{principal}'"
            )));
        }
        Ok(())
    }
}

fn cert_err(e: ssh_key::Error) -> ShieldError {
    ShieldError::Certificate(e.to_string())
}

/// Load an OpenSSH private key from disk, or generate an ed25519 key and
/// persist it (0600) along with its `.pub` counterpart (0644).
pub(crate) fn load_or_create_key(path: &Path) -> Result<PrivateKey, ShieldError> {
    match std::fs::read_to_string(path) {
        Ok(pem) => PrivateKey::from_openssh(&pem).map_err(|e| {
            ShieldError::Certificate(format!("parse key {}: {e}", path.display()))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => generate_key(path),
        Err(e) => Err(e.into()),
    }
}

fn generate_key(path: &Path) -> Result<PrivateKey, ShieldError> {
    let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).map_err(cert_err)?;

    let pem = key.to_openssh(LineEnding::LF).map_err(cert_err)?;
    write_atomic(path, pem.as_bytes(), 0o600)?;

    let mut public = key.public_key().to_openssh().map_err(cert_err)?;
    public.push('\n');
    let mut pub_path = OsString::from(path.as_os_str());
    pub_path.push(".pub");
    write_atomic(Path::new(&pub_path), public.as_bytes(), 0o644)?;

    tracing::info!(path = %path.display(), "generated new ed25519 key");
    Ok(key)
}
