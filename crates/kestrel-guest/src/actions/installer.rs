//! Installer payload upload
//!
//! Copies an image's installer script from the image directory into the
//! guest's staging directory. The script is left for the appliance's own
//! first-boot tooling to run.

use crate::context::{ActionContext, ActionResult};
use crate::error::{ActionError, Result};
use crate::progress::Progress;
use crate::traits::Action;
use async_trait::async_trait;
use std::path::Path;
use tracing::info;

/// Upload a local installer script into the guest
///
/// Environment variables:
/// - `INSTALLER_PATH` (required): local path of the script
pub struct InstallerUploadAction;

impl InstallerUploadAction {
    fn file_name(path: &str) -> Result<&str> {
        Path::new(path)
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                ActionError::InvalidParameters(format!("Installer path has no file name: {}", path))
            })
    }
}

#[async_trait]
impl Action for InstallerUploadAction {
    fn name(&self) -> &str {
        "installer-upload"
    }

    fn description(&self) -> &str {
        "Upload the image's installer script to the guest staging directory"
    }

    fn required_env_vars(&self) -> Vec<&str> {
        vec!["INSTALLER_PATH"]
    }

    fn validate(&self, ctx: &ActionContext) -> Result<()> {
        Self::file_name(ctx.require_env("INSTALLER_PATH")?).map(|_| ())
    }

    async fn execute(&self, ctx: &ActionContext) -> Result<ActionResult> {
        let source = ctx.require_env("INSTALLER_PATH")?;
        let file_name = Self::file_name(source)?;
        let target = format!(
            "{}/{}",
            ctx.config().guest.staging_dir.trim_end_matches('/'),
            file_name
        );
        let vm = ctx.vm();

        let contents = tokio::fs::read(source).await.map_err(|e| {
            ActionError::ResourceNotFound(format!("Cannot read installer {}: {}", source, e))
        })?;

        ctx.progress_reporter()
            .report(Progress::new(self.name(), 20, "Uploading installer"));
        let size = contents.len();
        ctx.file_transfer()
            .upload(vm, &target, contents, ctx.credentials())
            .await?;

        info!(vm = %vm.name, path = %target, size, "Uploaded installer");
        Ok(ActionResult::success(format!("Uploaded {}", file_name)).with_output("path", target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ActionEngine;
    use kestrel_common::ErrorKind;

    #[tokio::test]
    async fn test_uploads_script_to_staging_dir() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("appliance_installer_1.0.0.10_v1.sh");
        std::fs::write(&script, b"#!/bin/sh\necho install\n").unwrap();

        let (hv, ctx) = crate::test_support::test_context();
        let ctx = ctx.with_env("INSTALLER_PATH", script.to_str().unwrap());

        let mut engine = ActionEngine::new();
        engine.register(InstallerUploadAction);
        let result = engine.execute("installer-upload", &ctx).await.unwrap();

        let target = "/home/administrator/appliance_installer_1.0.0.10_v1.sh";
        assert_eq!(result.get_output_as::<String>("path").as_deref(), Some(target));
        assert_eq!(
            hv.guest_file(ctx.vm(), target).unwrap(),
            b"#!/bin/sh\necho install\n".to_vec()
        );
        assert!(hv.commands().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_installer_is_not_found() {
        let (hv, ctx) = crate::test_support::test_context();
        let ctx = ctx.with_env("INSTALLER_PATH", "/nonexistent/appliance_installer_1.0.0.sh");

        let err = InstallerUploadAction.execute(&ctx).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(hv.file_transfer_attempts(), 0);
    }

    #[test]
    fn test_validate_requires_a_file_name() {
        let (_, ctx) = crate::test_support::test_context();
        assert!(matches!(
            InstallerUploadAction.validate(&ctx),
            Err(ActionError::MissingEnvVar(_))
        ));

        let ctx = ctx.with_env("INSTALLER_PATH", "/");
        assert!(matches!(
            InstallerUploadAction.validate(&ctx),
            Err(ActionError::InvalidParameters(_))
        ));
    }
}
