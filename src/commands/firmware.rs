//! Commands for inspecting and producing `.dfu` files.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::dfu::{
    build_dfuse_file, read_dfu_file, DeviceProfile, DfuError, DfuResult, DfuseImageSpec,
    FirmwareImage,
};

/// Information about a firmware file.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FirmwareInfo {
    pub path: String,
    /// Size of the whole `.dfu` file in bytes.
    pub file_size: usize,
    pub target_name: String,
    pub start_address: u32,
    pub element_length: u32,
    pub vendor_id: u16,
    pub product_id: u16,
    pub bootloader_version: u16,
    /// SHA-256 of the whole file, lowercase hex.
    pub sha256: String,
}

impl FirmwareInfo {
    fn from_image(path: &Path, image: &FirmwareImage) -> Self {
        Self {
            path: path.to_string_lossy().to_string(),
            file_size: image.raw_bytes().len(),
            target_name: image.target_name.clone(),
            start_address: image.element_start_address,
            element_length: image.element_length,
            vendor_id: image.vendor_id,
            product_id: image.product_id,
            bootloader_version: image.bootloader_version,
            sha256: image.sha256_hex(),
        }
    }
}

/// Wrap a raw binary into a `.dfu` file.
#[derive(Debug, Clone)]
pub struct PackRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub target_name: String,
    /// Flash address of the binary; defaults to the profile's flash base.
    pub address: Option<u32>,
    pub bootloader_version: u16,
    pub profile: DeviceProfile,
}

/// Validate that a `.dfu` file is well formed.
pub async fn validate_firmware_package(firmware_path: PathBuf) -> DfuResult<FirmwareInfo> {
    tokio::task::spawn_blocking(move || {
        let image = read_dfu_file(&firmware_path)?;
        Ok(FirmwareInfo::from_image(&firmware_path, &image))
    })
    .await
    .map_err(|e| DfuError::Worker(format!("Validation failed: {}", e)))?
}

/// Build a `.dfu` file and write it to `request.output`.
///
/// The result is parsed back before it is written, so the output is
/// always a file the programmer accepts.
pub async fn pack_firmware(request: PackRequest) -> DfuResult<FirmwareInfo> {
    tokio::task::spawn_blocking(move || pack_blocking(&request))
        .await
        .map_err(|e| DfuError::Worker(format!("Packing failed: {}", e)))?
}

fn pack_blocking(request: &PackRequest) -> DfuResult<FirmwareInfo> {
    let payload = fs::read(&request.input)?;
    let bytes = build_dfuse_file(&DfuseImageSpec {
        target_name: &request.target_name,
        address: request.address.unwrap_or(request.profile.flash_base),
        payload: &payload,
        vendor_id: request.profile.vendor_id,
        product_id: request.profile.product_id,
        bootloader_version: request.bootloader_version,
    });

    let image = FirmwareImage::parse(bytes)?;

    if let Some(parent) = request.output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(&request.output, image.raw_bytes())?;
    log::info!(
        "Packed {} bytes at 0x{:08X} into {}",
        payload.len(),
        image.element_start_address,
        request.output.display()
    );

    Ok(FirmwareInfo::from_image(&request.output, &image))
}
