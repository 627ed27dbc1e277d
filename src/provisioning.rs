//! Credential provisioning.
//!
//! Certificate and SSH key generation belong to the secure session provider.
//! The built-in provisioner reports the capability as missing instead of
//! pretending to succeed.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProvisionError {
    #[error("{capability} is not implemented by this build")]
    NotImplemented { capability: &'static str },
}

/// Paths written by a successful provisioning step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedFiles {
    pub private_key: PathBuf,
    pub public_material: PathBuf,
}

pub trait CredentialProvisioner {
    /// Generate a self-signed certificate and its key into `dir`.
    fn generate_certificate(&self, dir: &Path) -> Result<ProvisionedFiles, ProvisionError>;

    /// Generate an SSH key pair into `dir`.
    fn generate_ssh_key(&self, dir: &Path) -> Result<ProvisionedFiles, ProvisionError>;
}

/// Provisioner used when no secure provider is linked in.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unprovisioned;

impl CredentialProvisioner for Unprovisioned {
    fn generate_certificate(&self, dir: &Path) -> Result<ProvisionedFiles, ProvisionError> {
        tracing::warn!(dir = %dir.display(), "Certificate generation requested but unavailable");
        Err(ProvisionError::NotImplemented {
            capability: "certificate generation",
        })
    }

    fn generate_ssh_key(&self, dir: &Path) -> Result<ProvisionedFiles, ProvisionError> {
        tracing::warn!(dir = %dir.display(), "SSH key generation requested but unavailable");
        Err(ProvisionError::NotImplemented {
            capability: "ssh key generation",
        })
    }
}
