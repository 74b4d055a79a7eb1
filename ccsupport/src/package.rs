//! Code package lookup for process chaincodes.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use ccsupport_shared::errors::{ChaincodeError, ChaincodeResult};

use crate::types::ContainerInfo;

#[async_trait]
pub trait PackageProvider: Send + Sync {
    /// Bytes of the installed package `info` refers to.
    ///
    /// # Errors
    ///
    /// `PackageRetrievalFailed` when the package is missing or unreadable.
    async fn get_chaincode_code_package(&self, info: &ContainerInfo) -> ChaincodeResult<Vec<u8>>;
}

/// Reads packages from `<dir>/<package_id>`, or `<dir>/<name>.<version>`
/// when the chaincode carries no package reference.
#[derive(Debug, Clone)]
pub struct FsPackageProvider {
    dir: PathBuf,
}

impl FsPackageProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Where the package for `info` is expected.
    ///
    /// # Errors
    ///
    /// `PackageRetrievalFailed` if the package reference is not a plain file
    /// name.
    pub fn package_path(&self, info: &ContainerInfo) -> ChaincodeResult<PathBuf> {
        if info.package_id.is_empty() {
            return Ok(self.dir.join(format!("{}.{}", info.name, info.version)));
        }

        let mut components = Path::new(&info.package_id).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(file)), None) => Ok(self.dir.join(file)),
            _ => Err(ChaincodeError::PackageRetrievalFailed {
                key: info.key().to_string(),
                reason: format!("invalid package reference '{}'", info.package_id),
            }),
        }
    }
}

#[async_trait]
impl PackageProvider for FsPackageProvider {
    async fn get_chaincode_code_package(&self, info: &ContainerInfo) -> ChaincodeResult<Vec<u8>> {
        let path = self.package_path(info)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| ChaincodeError::PackageRetrievalFailed {
                key: info.key().to_string(),
                reason: format!("{}: {}", path.display(), e),
            })
    }
}
