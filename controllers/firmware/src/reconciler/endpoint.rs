//! BMC connection material.
//!
//! Servers reach their BMC through `spec.bmcRef` (a BMC resource) or, for
//! servers registered without one, through the inline `spec.bmc` block.
//! Credentials live base64-encoded in a BMCSecret.

use super::Reconciler;
use crate::error::ControllerError;
use crate::reconcile_helpers::name_of;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use crds::{ImageSpec, Server, BMC, BMC_SECRET_PASSWORD_KEY, BMC_SECRET_USERNAME_KEY};
use redfish_client::{BmcEndpoint, FirmwareImage};

impl Reconciler {
    /// Decoded `(username, password)` from a BMCSecret
    pub(crate) async fn credentials(&self, secret_name: &str) -> Result<(String, String), ControllerError> {
        let secret = self.bmc_secrets.get(secret_name).await?;
        let decode = |key: &str| -> Result<String, ControllerError> {
            let raw = secret.spec.data.get(key).ok_or_else(|| {
                ControllerError::Validation(format!("BMCSecret {secret_name} has no {key}"))
            })?;
            let bytes = STANDARD.decode(raw.trim()).map_err(|e| {
                ControllerError::Validation(format!("BMCSecret {secret_name} {key} is not base64: {e}"))
            })?;
            String::from_utf8(bytes).map_err(|e| {
                ControllerError::Validation(format!("BMCSecret {secret_name} {key} is not UTF-8: {e}"))
            })
        };
        Ok((decode(BMC_SECRET_USERNAME_KEY)?, decode(BMC_SECRET_PASSWORD_KEY)?))
    }

    /// Endpoint of a BMC resource
    pub(crate) async fn bmc_endpoint(&self, bmc: &BMC) -> Result<BmcEndpoint, ControllerError> {
        let (username, password) = self.credentials(&bmc.spec.bmc_secret_ref.name).await?;
        Ok(BmcEndpoint {
            address: bmc.spec.endpoint.address.clone(),
            port: bmc.spec.endpoint.port,
            username,
            password,
        })
    }

    /// Endpoint of the BMC managing `server`
    pub(crate) async fn server_endpoint(&self, server: &Server) -> Result<BmcEndpoint, ControllerError> {
        if let Some(bmc_ref) = &server.spec.bmc_ref {
            let bmc = self.bmcs.get(&bmc_ref.name).await?;
            return self.bmc_endpoint(&bmc).await;
        }
        let access = server.spec.bmc.as_ref().ok_or_else(|| {
            ControllerError::Validation(format!("server {} has neither bmcRef nor bmc", name_of(server).unwrap_or("?")))
        })?;
        let (username, password) = self.credentials(&access.bmc_secret_ref.name).await?;
        Ok(BmcEndpoint {
            address: access.address.clone(),
            port: access.port,
            username,
            password,
        })
    }

    /// Firmware image with fetch credentials resolved
    pub(crate) async fn firmware_image(&self, image: &ImageSpec, force: bool) -> Result<FirmwareImage, ControllerError> {
        let (username, password) = match &image.secret_ref {
            Some(secret) => {
                let (user, pass) = self.credentials(&secret.name).await?;
                (Some(user), Some(pass))
            }
            None => (None, None),
        };
        Ok(FirmwareImage {
            uri: image.uri.clone(),
            transfer_protocol: image.transfer_protocol.clone(),
            username,
            password,
            force,
        })
    }
}
