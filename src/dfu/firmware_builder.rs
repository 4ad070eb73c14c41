//! DfuSe file writer.
//!
//! Wraps a raw flash image into a single-target, single-element `.dfu`
//! container that the reader accepts.

use super::checksum::checksum;
use super::config::{
    DFUSE_SIGNATURE, DFUSE_VERSION, ELEMENT_DATA_OFFSET, PREFIX_LENGTH, SUFFIX_BCD_DFU,
    SUFFIX_LENGTH, SUFFIX_SIGNATURE, TARGET_ALT_SETTING_OFFSET, TARGET_NAMED_OFFSET,
    TARGET_NAME_OFFSET, TARGET_NAME_WIDTH, TARGET_NUM_ELEMENTS_OFFSET, TARGET_SIGNATURE,
    TARGET_SIGNATURE_OFFSET, TARGET_SIZE_OFFSET,
};

/// Everything needed to produce a `.dfu` file.
#[derive(Debug, Clone)]
pub struct DfuseImageSpec<'a> {
    pub target_name: &'a str,
    /// Flash address of the payload.
    pub address: u32,
    pub payload: &'a [u8],
    pub vendor_id: u16,
    pub product_id: u16,
    /// bcdDevice stored in the suffix.
    pub bootloader_version: u16,
}

/// Serialize a DfuSe container.
///
/// The target name is truncated to leave room for its null terminator.
pub fn build_dfuse_file(spec: &DfuseImageSpec<'_>) -> Vec<u8> {
    let payload_len = spec.payload.len();
    let body_len = ELEMENT_DATA_OFFSET + payload_len;
    let mut out = vec![0u8; body_len];

    // Prefix
    out[..DFUSE_SIGNATURE.len()].copy_from_slice(DFUSE_SIGNATURE);
    out[DFUSE_SIGNATURE.len()] = DFUSE_VERSION;
    out[6..10].copy_from_slice(&(body_len as u32).to_le_bytes());
    out[PREFIX_LENGTH - 1] = 1;

    // Target prefix
    out[TARGET_SIGNATURE_OFFSET..TARGET_SIGNATURE_OFFSET + TARGET_SIGNATURE.len()]
        .copy_from_slice(TARGET_SIGNATURE);
    out[TARGET_ALT_SETTING_OFFSET] = 0;
    out[TARGET_NAMED_OFFSET..TARGET_NAMED_OFFSET + 4].copy_from_slice(&1u32.to_le_bytes());

    let name = spec.target_name.as_bytes();
    let name_len = name.len().min(TARGET_NAME_WIDTH - 1);
    out[TARGET_NAME_OFFSET..TARGET_NAME_OFFSET + name_len].copy_from_slice(&name[..name_len]);

    let target_size = (8 + payload_len) as u32;
    out[TARGET_SIZE_OFFSET..TARGET_SIZE_OFFSET + 4].copy_from_slice(&target_size.to_le_bytes());
    out[TARGET_NUM_ELEMENTS_OFFSET..TARGET_NUM_ELEMENTS_OFFSET + 4]
        .copy_from_slice(&1u32.to_le_bytes());

    // Element
    out[ELEMENT_DATA_OFFSET - 8..ELEMENT_DATA_OFFSET - 4]
        .copy_from_slice(&spec.address.to_le_bytes());
    out[ELEMENT_DATA_OFFSET - 4..ELEMENT_DATA_OFFSET]
        .copy_from_slice(&(payload_len as u32).to_le_bytes());
    out[ELEMENT_DATA_OFFSET..].copy_from_slice(spec.payload);

    // Suffix
    out.reserve(SUFFIX_LENGTH);
    out.extend_from_slice(&spec.bootloader_version.to_le_bytes());
    out.extend_from_slice(&spec.product_id.to_le_bytes());
    out.extend_from_slice(&spec.vendor_id.to_le_bytes());
    out.extend_from_slice(&SUFFIX_BCD_DFU);
    out.extend_from_slice(SUFFIX_SIGNATURE);
    out.push(SUFFIX_LENGTH as u8);

    let crc = checksum(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dfu::firmware_reader::FirmwareImage;

    fn spec<'a>(name: &'a str, payload: &'a [u8]) -> DfuseImageSpec<'a> {
        DfuseImageSpec {
            target_name: name,
            address: 0x0800_0000,
            payload,
            vendor_id: 0x0483,
            product_id: 0xDF11,
            bootloader_version: 0x2200,
        }
    }

    #[test]
    fn test_built_file_is_accepted_by_reader() {
        let payload: Vec<u8> = (0..3000u32).map(|i| (i * 7) as u8).collect();
        let bytes = build_dfuse_file(&spec("ST...", &payload));

        assert_eq!(bytes.len(), ELEMENT_DATA_OFFSET + 3000 + SUFFIX_LENGTH);

        let image = FirmwareImage::parse(bytes).unwrap();
        assert_eq!(image.target_name, "ST...");
        assert_eq!(image.element_start_address, 0x0800_0000);
        assert_eq!(image.payload(), &payload[..]);
        assert_eq!(image.bootloader_version, 0x2200);
    }

    #[test]
    fn test_prefix_image_size_excludes_suffix() {
        let payload = vec![0u8; 600];
        let bytes = build_dfuse_file(&spec("app", &payload));

        let image_size = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
        assert_eq!(image_size as usize, bytes.len() - SUFFIX_LENGTH);
        assert_eq!(bytes[10], 1);
    }

    #[test]
    fn test_long_target_name_is_truncated() {
        let name = "N".repeat(400);
        let payload = vec![0u8; 512];
        let bytes = build_dfuse_file(&spec(&name, &payload));

        let image = FirmwareImage::parse(bytes).unwrap();
        assert_eq!(image.target_name.len(), TARGET_NAME_WIDTH - 1);
    }
}
