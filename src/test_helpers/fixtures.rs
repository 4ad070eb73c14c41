use crate::dfu::{build_dfuse_file, checksum, DfuseImageSpec};

/// Builder for `.dfu` test files.
///
/// Produces a valid file by default. The `num_elements` and `element_length`
/// overrides patch the header after building and re-seal the CRC.
pub struct DfuFileBuilder {
    target_name: String,
    address: u32,
    payload: Vec<u8>,
    vendor_id: u16,
    product_id: u16,
    bootloader_version: u16,
    num_elements: Option<u32>,
    element_length: Option<u32>,
}

impl DfuFileBuilder {
    pub fn new() -> Self {
        Self {
            target_name: "ST...".to_string(),
            address: 0x0800_0000,
            payload: pattern(1024),
            vendor_id: 0x0483,
            product_id: 0xDF11,
            bootloader_version: 0x0200,
            num_elements: None,
            element_length: None,
        }
    }

    pub fn target_name(mut self, name: &str) -> Self {
        self.target_name = name.to_string();
        self
    }

    pub fn address(mut self, address: u32) -> Self {
        self.address = address;
        self
    }

    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Payload of `len` bytes with a repeating, non-0xFF pattern.
    pub fn payload_len(self, len: usize) -> Self {
        self.payload(pattern(len))
    }

    pub fn vendor_id(mut self, vendor_id: u16) -> Self {
        self.vendor_id = vendor_id;
        self
    }

    pub fn product_id(mut self, product_id: u16) -> Self {
        self.product_id = product_id;
        self
    }

    pub fn bootloader_version(mut self, version: u16) -> Self {
        self.bootloader_version = version;
        self
    }

    pub fn num_elements(mut self, count: u32) -> Self {
        self.num_elements = Some(count);
        self
    }

    /// Declared element length, independent of the actual payload.
    pub fn element_length(mut self, length: u32) -> Self {
        self.element_length = Some(length);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut bytes = build_dfuse_file(&DfuseImageSpec {
            target_name: &self.target_name,
            address: self.address,
            payload: &self.payload,
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            bootloader_version: self.bootloader_version,
        });

        if self.num_elements.is_none() && self.element_length.is_none() {
            return bytes;
        }

        if let Some(count) = self.num_elements {
            bytes[281..285].copy_from_slice(&count.to_le_bytes());
        }
        if let Some(length) = self.element_length {
            bytes[289..293].copy_from_slice(&length.to_le_bytes());
        }
        reseal(&mut bytes);
        bytes
    }
}

impl Default for DfuFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Recompute the trailing CRC after editing a file in place.
pub fn reseal(bytes: &mut [u8]) {
    let crc_at = bytes.len() - 4;
    let crc = checksum(&bytes[..crc_at]);
    bytes[crc_at..].copy_from_slice(&crc.to_le_bytes());
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
