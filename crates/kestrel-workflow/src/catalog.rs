//! Image catalog
//!
//! Maps user-facing version strings onto image artifacts in a directory.
//! Artifacts are named `<prefix>-<version>.ova`. An image may have a
//! companion installer script named `<prefix>_installer_<version>[_<tag>...].sh`,
//! where a fourth dotted component of the version is a build number and is
//! ignored. Anything else in the directory is ignored.

use crate::error::{ProvisionError, Result};
use kestrel_common::config::ApplianceConfig;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;

const IMAGE_EXTENSION: &str = ".ova";
const INSTALLER_EXTENSION: &str = ".sh";
const INSTALLER_MARKER: &str = "_installer_";

#[derive(Debug, Clone)]
pub struct ImageCatalog {
    dir: PathBuf,
    prefix: String,
}

impl ImageCatalog {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn from_config(appliance: &ApplianceConfig) -> Self {
        Self::new(&appliance.images_dir, &appliance.image_prefix)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Version encoded in `filename`, if it follows the naming scheme
    pub fn derive_version(&self, filename: &str) -> Option<String> {
        let version = filename
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix('-')?
            .strip_suffix(IMAGE_EXTENSION)?;
        is_valid_version(version).then(|| version.to_string())
    }

    /// Artifact filename for `version`
    pub fn derive_filename(&self, version: &str) -> String {
        format!("{}-{}{}", self.prefix, version, IMAGE_EXTENSION)
    }

    /// Image version an installer script belongs to
    pub fn installer_version(&self, filename: &str) -> Option<String> {
        let rest = filename
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix(INSTALLER_MARKER)?
            .strip_suffix(INSTALLER_EXTENSION)?;
        let full = rest.split('_').next()?;
        let version = match full.split('.').collect::<Vec<_>>().as_slice() {
            [major, minor, patch, _build] => format!("{}.{}.{}", major, minor, patch),
            _ => full.to_string(),
        };
        is_valid_version(&version).then_some(version)
    }

    /// Every version available in the image directory
    pub async fn list_versions(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .entries(Self::derive_version)
            .await?
            .into_iter()
            .map(|(version, _)| version)
            .collect())
    }

    /// Path of the single artifact for `version`
    pub async fn resolve(&self, version: &str) -> Result<PathBuf> {
        let mut matches: Vec<PathBuf> = self
            .entries(Self::derive_version)
            .await?
            .into_iter()
            .filter(|(candidate, _)| candidate == version)
            .map(|(_, path)| path)
            .collect();

        match matches.len() {
            0 => Err(ProvisionError::ImageNotFound(version.to_string())),
            1 => Ok(matches.remove(0)),
            count => Err(ProvisionError::AmbiguousImage {
                version: version.to_string(),
                count,
            }),
        }
    }

    /// Companion installer for `version`, if the directory has one
    pub async fn resolve_installer(&self, version: &str) -> Result<Option<PathBuf>> {
        let mut matches: Vec<PathBuf> = self
            .entries(Self::installer_version)
            .await?
            .into_iter()
            .filter(|(candidate, _)| candidate == version)
            .map(|(_, path)| path)
            .collect();

        match matches.len() {
            0 => Ok(None),
            1 => Ok(Some(matches.remove(0))),
            count => Err(ProvisionError::AmbiguousInstaller {
                version: version.to_string(),
                count,
            }),
        }
    }

    async fn entries(
        &self,
        derive: fn(&Self, &str) -> Option<String>,
    ) -> Result<Vec<(String, PathBuf)>> {
        let io_err = |source| ProvisionError::Catalog {
            path: self.dir.clone(),
            source,
        };
        let mut reader = tokio::fs::read_dir(&self.dir).await.map_err(io_err)?;

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(io_err)? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            match derive(self, name) {
                Some(version) => entries.push((version, entry.path())),
                None => debug!(file = name, "Skipping file outside the image naming scheme"),
            }
        }
        Ok(entries)
    }
}

fn is_valid_version(version: &str) -> bool {
    !version.is_empty()
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_common::ErrorKind;
    use std::fs;

    fn catalog_with(files: &[&str]) -> (tempfile::TempDir, ImageCatalog) {
        let dir = tempfile::tempdir().unwrap();
        for file in files {
            fs::write(dir.path().join(file), b"ova").unwrap();
        }
        let catalog = ImageCatalog::new(dir.path(), "appliance");
        (dir, catalog)
    }

    #[test]
    fn test_filename_round_trip() {
        let catalog = ImageCatalog::new("/images", "appliance");
        for name in ["appliance-1.0.0.ova", "appliance-2.1.3rc1.ova", "appliance-7.ova"] {
            let version = catalog.derive_version(name).unwrap();
            assert_eq!(catalog.derive_filename(&version), name);
        }
        assert_eq!(catalog.derive_version("appliance-1.0.0.ova").as_deref(), Some("1.0.0"));
    }

    #[test]
    fn test_rejects_names_outside_the_scheme() {
        let catalog = ImageCatalog::new("/images", "appliance");
        assert_eq!(catalog.derive_version("appliance-.ova"), None);
        assert_eq!(catalog.derive_version("appliance-1.0-beta.ova"), None);
        assert_eq!(catalog.derive_version("appliance1.0.ova"), None);
        assert_eq!(catalog.derive_version("other-1.0.ova"), None);
        assert_eq!(catalog.derive_version("appliance-1.0.vmdk"), None);
    }

    #[tokio::test]
    async fn test_list_versions_ignores_strays() {
        let (_dir, catalog) = catalog_with(&[
            "appliance-1.0.0.ova",
            "appliance-1.1.0.ova",
            "README.txt",
            "jumpbox-1.0.0.ova",
        ]);

        let versions: Vec<String> = catalog.list_versions().await.unwrap().into_iter().collect();
        assert_eq!(versions, vec!["1.0.0", "1.1.0"]);
    }

    #[tokio::test]
    async fn test_resolve() {
        let (dir, catalog) = catalog_with(&["appliance-1.0.0.ova"]);

        let path = catalog.resolve("1.0.0").await.unwrap();
        assert_eq!(path, dir.path().join("appliance-1.0.0.ova"));

        let err = catalog.resolve("missing-version").await.unwrap_err();
        assert!(matches!(err, ProvisionError::ImageNotFound(_)));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_installer_version() {
        let catalog = ImageCatalog::new("/images", "appliance");
        assert_eq!(
            catalog
                .installer_version("appliance_installer_1.0.0.10_202003090706_v1.sh")
                .as_deref(),
            Some("1.0.0")
        );
        assert_eq!(
            catalog.installer_version("appliance_installer_2.1.sh").as_deref(),
            Some("2.1")
        );
        assert_eq!(catalog.installer_version("appliance_installer_.sh"), None);
        assert_eq!(catalog.installer_version("appliance-1.0.0.ova"), None);
        assert_eq!(catalog.installer_version("jumpbox_installer_1.0.0.sh"), None);
        assert_eq!(catalog.installer_version("appliance_installer_1.0.0.txt"), None);
    }

    #[tokio::test]
    async fn test_resolve_installer() {
        let (dir, catalog) = catalog_with(&[
            "appliance-1.0.0.ova",
            "appliance-1.1.0.ova",
            "appliance_installer_1.0.0.10_202003090706_v1.sh",
            "appliance_installer_2.0.0.sh",
            "appliance_installer_2.0.0.7_v2.sh",
        ]);

        assert_eq!(
            catalog.resolve_installer("1.0.0").await.unwrap(),
            Some(dir.path().join("appliance_installer_1.0.0.10_202003090706_v1.sh"))
        );
        assert_eq!(catalog.resolve_installer("1.1.0").await.unwrap(), None);

        let err = catalog.resolve_installer("2.0.0").await.unwrap_err();
        assert!(matches!(err, ProvisionError::AmbiguousInstaller { count: 2, .. }));

        // installers never show up as images
        let versions: Vec<String> = catalog.list_versions().await.unwrap().into_iter().collect();
        assert_eq!(versions, vec!["1.0.0", "1.1.0"]);
    }

    #[tokio::test]
    async fn test_missing_directory_is_internal() {
        let catalog = ImageCatalog::new("/nonexistent/kestrel/images", "appliance");
        let err = catalog.list_versions().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
