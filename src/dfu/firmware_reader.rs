//! DfuSe firmware file reader.
//!
//! Reads and validates a `.dfu` container holding:
//! - DfuSe prefix - signature, version, image size, target count
//! - Target prefix - signature, alternate setting, name, size, element count
//! - One element - flash start address, length, payload
//! - DFU suffix - bcdDevice, idProduct, idVendor, bcdDFU, "UFD", length, CRC

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use super::checksum::checksum;
use super::config::{
    DFUSE_SIGNATURE, DFUSE_VERSION, ELEMENT_ADDRESS_OFFSET, ELEMENT_DATA_OFFSET,
    ELEMENT_LENGTH_OFFSET, MIN_ELEMENT_LENGTH, MIN_FILE_LENGTH, SUFFIX_BCD_DFU, SUFFIX_LENGTH,
    SUFFIX_SIGNATURE, TARGET_NAME_OFFSET, TARGET_NAME_WIDTH, TARGET_NUM_ELEMENTS_OFFSET,
    TARGET_SIGNATURE, TARGET_SIGNATURE_OFFSET, TARGET_SIZE_OFFSET,
};
use super::error::{DfuError, DfuResult, FormatError};

/// A validated single-element DfuSe image.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    raw: Vec<u8>,
    pub target_name: String,
    pub target_size: u32,
    pub num_elements: u32,
    /// Absolute flash address of the element.
    pub element_start_address: u32,
    pub element_length: u32,
    pub vendor_id: u16,
    pub product_id: u16,
    pub bootloader_version: u16,
}

impl FirmwareImage {
    /// Validate a complete `.dfu` file.
    ///
    /// Checks run in a fixed order and stop at the first failure: length,
    /// checksum, signature, version, suffix, target signature, target name,
    /// element fields.
    pub fn parse(raw: Vec<u8>) -> Result<Self, FormatError> {
        let len = raw.len();
        if len < MIN_FILE_LENGTH {
            return Err(FormatError::TooShort {
                len,
                min: MIN_FILE_LENGTH,
            });
        }

        let stored = read_u32_le(&raw, len - 4)?;
        let computed = checksum(&raw[..len - 4]);
        if stored != computed {
            return Err(FormatError::ChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }

        if field(&raw, 0, DFUSE_SIGNATURE.len())? != DFUSE_SIGNATURE {
            return Err(FormatError::BadSignature);
        }

        let version = raw[DFUSE_SIGNATURE.len()];
        if version != DFUSE_VERSION {
            return Err(FormatError::UnsupportedVersion(version));
        }

        if field(&raw, len - 8, SUFFIX_SIGNATURE.len())? != SUFFIX_SIGNATURE
            || raw[len - 10] != SUFFIX_BCD_DFU[0]
            || raw[len - 9] != SUFFIX_BCD_DFU[1]
            || raw[len - 5] as usize != SUFFIX_LENGTH
        {
            return Err(FormatError::BadSuffix);
        }

        if field(&raw, TARGET_SIGNATURE_OFFSET, TARGET_SIGNATURE.len())? != TARGET_SIGNATURE {
            return Err(FormatError::BadTargetSignature);
        }

        let target_name = read_target_name(&raw)?;

        let target_size = read_u32_le(&raw, TARGET_SIZE_OFFSET)?;
        let num_elements = read_u32_le(&raw, TARGET_NUM_ELEMENTS_OFFSET)?;
        if num_elements != 1 {
            return Err(FormatError::UnsupportedMultiElement(num_elements));
        }

        let element_start_address = read_u32_le(&raw, ELEMENT_ADDRESS_OFFSET)?;
        let element_length = read_u32_le(&raw, ELEMENT_LENGTH_OFFSET)?;
        if element_length < MIN_ELEMENT_LENGTH {
            return Err(FormatError::ElementTooSmall(element_length));
        }

        let available = len - SUFFIX_LENGTH - ELEMENT_DATA_OFFSET;
        if element_length as usize > available {
            return Err(FormatError::ElementOutOfBounds {
                length: element_length,
                available,
            });
        }

        let bootloader_version = read_u16_le(&raw, len - 16)?;
        let product_id = read_u16_le(&raw, len - 14)?;
        let vendor_id = read_u16_le(&raw, len - 12)?;

        Ok(Self {
            raw,
            target_name,
            target_size,
            num_elements,
            element_start_address,
            element_length,
            vendor_id,
            product_id,
            bootloader_version,
        })
    }

    /// The whole file as read.
    pub fn raw_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// The element payload to be written at `element_start_address`.
    pub fn payload(&self) -> &[u8] {
        let end = ELEMENT_DATA_OFFSET + self.element_length as usize;
        &self.raw[ELEMENT_DATA_OFFSET..end]
    }

    /// SHA-256 of the whole file, lowercase hex.
    pub fn sha256_hex(&self) -> String {
        let hash = Sha256::digest(&self.raw);
        format!("{:x}", hash)
    }
}

/// Where the firmware file comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirmwareSource {
    /// A file chosen by the user.
    File(PathBuf),
    /// The first `.dfu` file found in a directory.
    Discover(PathBuf),
}

impl FirmwareSource {
    /// Resolve to a concrete file path.
    pub fn resolve(&self) -> DfuResult<PathBuf> {
        match self {
            FirmwareSource::File(path) => Ok(path.clone()),
            FirmwareSource::Discover(dir) => find_dfu_file(dir),
        }
    }
}

/// Find the first `.dfu` file (by name) in `dir`.
pub fn find_dfu_file(dir: &Path) -> DfuResult<PathBuf> {
    let not_found = || DfuError::NoFirmwareFile {
        dir: dir.display().to_string(),
    };

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Err(not_found()),
    };

    let mut candidates: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("dfu"))
        .collect();
    candidates.sort();

    candidates.into_iter().next().ok_or_else(not_found)
}

/// Read and validate a `.dfu` file.
///
/// # Arguments
/// * `path` - Path to the firmware file
///
/// # Returns
/// The validated image, or the first format rule it violates
pub fn read_dfu_file<P: AsRef<Path>>(path: P) -> DfuResult<FirmwareImage> {
    let path = path.as_ref();
    let raw = std::fs::read(path)?;
    verify_dfu_bytes(path, raw)
}

/// Validate the contents of a `.dfu` file already read from `path`.
pub fn verify_dfu_bytes(path: &Path, raw: Vec<u8>) -> DfuResult<FirmwareImage> {
    let image = FirmwareImage::parse(raw).map_err(|e| {
        log::warn!("Rejected firmware file {}: {}", path.display(), e);
        DfuError::Format(e)
    })?;
    log::debug!(
        "Target '{}': {} bytes, {} element(s)",
        image.target_name,
        image.target_size,
        image.num_elements
    );
    Ok(image)
}

/// Null-terminated name inside the fixed-width target name field.
fn read_target_name(raw: &[u8]) -> Result<String, FormatError> {
    let name_field = field(raw, TARGET_NAME_OFFSET, TARGET_NAME_WIDTH)
        .map_err(|_| FormatError::MissingTargetName)?;

    if name_field[0] == 0 {
        return Err(FormatError::MissingTargetName);
    }

    let end = name_field
        .iter()
        .position(|&b| b == 0)
        .ok_or(FormatError::MissingTargetName)?;

    Ok(String::from_utf8_lossy(&name_field[..end]).into_owned())
}

fn field(raw: &[u8], offset: usize, len: usize) -> Result<&[u8], FormatError> {
    raw.get(offset..offset + len).ok_or(FormatError::TooShort {
        len: raw.len(),
        min: offset + len,
    })
}

fn read_u32_le(raw: &[u8], offset: usize) -> Result<u32, FormatError> {
    let bytes = field(raw, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_u16_le(raw: &[u8], offset: usize) -> Result<u16, FormatError> {
    let bytes = field(raw, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}
