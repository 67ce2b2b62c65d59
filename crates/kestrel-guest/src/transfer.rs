//! Guest file transfer
//!
//! Files reach the guest in two hops: the hypervisor hands out a one-time
//! upload URL through the guest agent, then the payload is PUT to that URL.
//! Right after power-on the guest agent is not running yet, so the first
//! hop retries on `GuestOperationsUnavailable` with a linear backoff.

use crate::error::{ActionError, Result};
use kestrel_common::config::GuestAgentConfig;
use kestrel_hypervisor::{Credentials, Hypervisor, HypervisorError, UploadClient, VmRef};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct GuestFileTransfer<'a> {
    hypervisor: &'a dyn Hypervisor,
    uploader: &'a dyn UploadClient,
    attempts: u32,
    backoff_step: Duration,
}

impl<'a> GuestFileTransfer<'a> {
    pub fn new(
        hypervisor: &'a dyn Hypervisor,
        uploader: &'a dyn UploadClient,
        retry: &GuestAgentConfig,
    ) -> Self {
        Self {
            hypervisor,
            uploader,
            attempts: retry.attempts(),
            backoff_step: retry.backoff_step(),
        }
    }

    /// Write `payload` to `guest_path`, replacing any existing file
    pub async fn upload(
        &self,
        vm: &VmRef,
        guest_path: &str,
        payload: Vec<u8>,
        creds: &Credentials,
    ) -> Result<()> {
        let size = payload.len() as u64;
        let url = self.request_url(vm, guest_path, size, creds).await?;

        let status = self.uploader.put(&url, payload).await?;
        if !(200..300).contains(&status) {
            return Err(ActionError::UploadFailed {
                path: guest_path.to_string(),
                status,
            });
        }

        info!(vm = %vm.name, path = guest_path, size, "Uploaded file to guest");
        Ok(())
    }

    async fn request_url(
        &self,
        vm: &VmRef,
        guest_path: &str,
        size: u64,
        creds: &Credentials,
    ) -> Result<String> {
        for attempt in 0..self.attempts {
            match self
                .hypervisor
                .initiate_file_transfer(vm, creds, guest_path, size, true)
                .await
            {
                Ok(url) => {
                    debug!(vm = %vm.name, attempt = attempt + 1, "Obtained guest upload URL");
                    return Ok(url);
                }
                Err(HypervisorError::GuestOperationsUnavailable) => {
                    warn!(
                        vm = %vm.name,
                        attempt = attempt + 1,
                        max = self.attempts,
                        "Guest operations unavailable, retrying"
                    );
                    if attempt + 1 < self.attempts {
                        tokio::time::sleep(self.backoff_step * attempt).await;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ActionError::GuestUnavailable {
            vm: vm.name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_context;

    const PATH: &str = "/home/administrator/ifcfg-ens192";

    #[tokio::test(start_paused = true)]
    async fn test_upload_first_try() {
        let (hv, ctx) = test_context();

        ctx.file_transfer()
            .upload(ctx.vm(), PATH, b"TYPE=Ethernet\n".to_vec(), ctx.credentials())
            .await
            .unwrap();

        assert_eq!(hv.file_transfer_attempts(), 1);
        assert_eq!(hv.guest_file(ctx.vm(), PATH), Some(b"TYPE=Ethernet\n".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_succeeds_on_last_attempt() {
        let (hv, ctx) = test_context();
        hv.fail_file_transfers(9);

        let start = tokio::time::Instant::now();
        ctx.file_transfer()
            .upload(ctx.vm(), PATH, b"x".to_vec(), ctx.credentials())
            .await
            .unwrap();

        assert_eq!(hv.file_transfer_attempts(), 10);
        // 0 + 1 + ... + 8 seconds of backoff
        assert_eq!(start.elapsed(), Duration::from_secs(36));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_gives_up_after_ten_attempts() {
        let (hv, ctx) = test_context();
        hv.fail_file_transfers(u32::MAX);

        let err = ctx
            .file_transfer()
            .upload(ctx.vm(), PATH, b"x".to_vec(), ctx.credentials())
            .await
            .unwrap_err();

        assert!(matches!(err, ActionError::GuestUnavailable { .. }));
        assert_eq!(err.kind(), kestrel_common::ErrorKind::Timeout);
        assert_eq!(hv.file_transfer_attempts(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_faults_are_not_retried() {
        let (hv, ctx) = test_context();
        let stranger = VmRef {
            id: "vm-404".to_string(),
            name: "ghost".to_string(),
            owner: "alice".to_string(),
        };

        let err = ctx
            .file_transfer()
            .upload(&stranger, PATH, b"x".to_vec(), ctx.credentials())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ActionError::Hypervisor(HypervisorError::NotFound { .. })
        ));
        assert_eq!(hv.file_transfer_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_2xx_upload_is_fatal() {
        let (hv, ctx) = test_context();
        hv.set_upload_status(500);

        let err = ctx
            .file_transfer()
            .upload(ctx.vm(), PATH, b"x".to_vec(), ctx.credentials())
            .await
            .unwrap_err();

        assert!(matches!(err, ActionError::UploadFailed { status: 500, .. }));
        assert_eq!(hv.file_transfer_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_tries_once() {
        let (hv, ctx) = test_context();
        let retry = GuestAgentConfig {
            attempts: 0,
            backoff_step_secs: 1,
        };
        let transfer = GuestFileTransfer::new(hv.as_ref(), hv.as_ref(), &retry);

        transfer
            .upload(ctx.vm(), PATH, b"x".to_vec(), ctx.credentials())
            .await
            .unwrap();

        assert_eq!(hv.file_transfer_attempts(), 1);
    }
}
