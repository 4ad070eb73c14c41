use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::dfu::{DfuState, DfuTransport, TransportResult};

const REQ_DNLOAD: u8 = 0x01;
const REQ_GETSTATUS: u8 = 0x03;
const REQ_CLRSTATUS: u8 = 0x04;
const REQ_GET_DESCRIPTOR: u8 = 0x06;

const STATUS_OK: u8 = 0x00;
const STATUS_ERR_TARGET: u8 = 0x01;
const STATUS_ERR_PROG: u8 = 0x06;
const STATUS_ERR_VENDOR: u8 = 0x0B;
const STATUS_ERR_STALLED: u8 = 0x0F;

/// A request as seen by the simulated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeRequest {
    ClearStatus,
    GetStatus,
    Download { value: u16, data: Vec<u8> },
    GetDescriptor { value: u16 },
}

#[derive(Debug, Clone, Copy)]
struct Reply {
    state: DfuState,
    status: u8,
    poll_timeout_ms: u32,
}

impl Reply {
    fn new(state: DfuState, status: u8) -> Self {
        Self {
            state,
            status,
            poll_timeout_ms: 0,
        }
    }
}

/// In-memory STM32 DfuSe bootloader.
///
/// Downloads queue the replies the following GETSTATUS calls will return,
/// the way the real bootloader executes a command on the first status read
/// and reports the outcome on the next. Every request is recorded with the
/// instant it arrived and the timeout the host passed.
pub struct FakeDfuDevice {
    vendor_id: u16,
    product_id: u16,
    device_version: u16,
    flash_descriptor: String,
    connect_error: Option<rusb::Error>,
    connected: bool,
    release_count: usize,

    state: DfuState,
    status: u8,
    script: VecDeque<Reply>,
    erasing: bool,
    erase_busy_reads: usize,
    erase_reads_left: usize,
    endless_erase: bool,
    erase_poll_timeout_ms: u32,

    protected: bool,
    reject_address: bool,
    reject_unprotect: bool,
    failing_block: Option<u16>,
    stuck_state: Option<DfuState>,
    status_failures: u32,
    short_status: Option<usize>,
    descriptor_error: bool,

    status_reads: usize,
    requests: Vec<(Instant, FakeRequest, Duration)>,
}

impl FakeDfuDevice {
    /// An idle STM32F042 bootloader (0483:DF11, bcdDevice 0x0200).
    pub fn new() -> Self {
        Self {
            vendor_id: 0x0483,
            product_id: 0xDF11,
            device_version: 0x0200,
            flash_descriptor: "@Internal Flash  /0x08000000/032*0001Kg".to_string(),
            connect_error: None,
            connected: false,
            release_count: 0,
            state: DfuState::DfuIdle,
            status: STATUS_OK,
            script: VecDeque::new(),
            erasing: false,
            erase_busy_reads: 2,
            erase_reads_left: 0,
            endless_erase: false,
            erase_poll_timeout_ms: 20,
            protected: false,
            reject_address: false,
            reject_unprotect: false,
            failing_block: None,
            stuck_state: None,
            status_failures: 0,
            short_status: None,
            descriptor_error: false,
            status_reads: 0,
            requests: Vec::new(),
        }
    }

    /// Same as `new`, already connected.
    pub fn connected() -> Self {
        let mut device = Self::new();
        device.connected = true;
        device
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
        self.device_version = version;
        self
    }

    pub fn flash_descriptor(mut self, descriptor: &str) -> Self {
        self.flash_descriptor = descriptor.to_string();
        self
    }

    pub fn descriptor_unavailable(mut self) -> Self {
        self.descriptor_error = true;
        self
    }

    /// `connect` fails as if nothing is plugged in.
    pub fn unplugged(mut self) -> Self {
        self.connect_error = Some(rusb::Error::NoDevice);
        self
    }

    pub fn starting_in(mut self, state: DfuState) -> Self {
        self.state = state;
        self
    }

    /// Read protection is active: address pointer checks end in dfuERROR.
    pub fn protected(mut self) -> Self {
        self.protected = true;
        self
    }

    pub fn rejecting_address(mut self) -> Self {
        self.reject_address = true;
        self
    }

    pub fn rejecting_unprotect(mut self) -> Self {
        self.reject_unprotect = true;
        self
    }

    /// Programming of block `block_number` fails after being accepted.
    pub fn failing_block(mut self, block_number: u16) -> Self {
        self.failing_block = Some(block_number);
        self
    }

    /// bwPollTimeout reported while a mass erase runs.
    pub fn erase_poll_timeout(mut self, millis: u32) -> Self {
        self.erase_poll_timeout_ms = millis;
        self
    }

    /// Number of status reads that report dfuDNBUSY after a mass erase.
    pub fn erase_busy_reads(mut self, reads: usize) -> Self {
        self.erase_busy_reads = reads;
        self
    }

    pub fn endless_erase(mut self) -> Self {
        self.endless_erase = true;
        self
    }

    /// Every status read reports `state`, whatever the host does.
    pub fn stuck_in(mut self, state: DfuState) -> Self {
        self.stuck_state = Some(state);
        self
    }

    /// The next `count` GETSTATUS transfers time out.
    pub fn failing_status_reads(mut self, count: u32) -> Self {
        self.status_failures = count;
        self
    }

    /// GETSTATUS returns only `len` bytes.
    pub fn short_status_reply(mut self, len: usize) -> Self {
        self.short_status = Some(len);
        self
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn requests(&self) -> Vec<FakeRequest> {
        self.requests.iter().map(|(_, r, _)| r.clone()).collect()
    }

    /// Every request paired with the timeout it was sent with.
    pub fn requests_with_timeouts(&self) -> Vec<(FakeRequest, Duration)> {
        self.requests
            .iter()
            .map(|(_, r, timeout)| (r.clone(), *timeout))
            .collect()
    }

    /// Payloads of command downloads (wValue 0), in order.
    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.requests
            .iter()
            .filter_map(|(_, r, _)| match r {
                FakeRequest::Download { value: 0, data } => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// (wValue, data) of every firmware block download, in order.
    pub fn block_writes(&self) -> Vec<(u16, Vec<u8>)> {
        self.requests
            .iter()
            .filter_map(|(_, r, _)| match r {
                FakeRequest::Download { value, data } if *value >= 2 => {
                    Some((*value, data.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// GETSTATUS attempts, failed ones included.
    pub fn status_reads(&self) -> usize {
        self.status_reads
    }

    pub fn release_count(&self) -> usize {
        self.release_count
    }

    pub fn is_protected(&self) -> bool {
        self.protected
    }

    pub fn current_state(&self) -> DfuState {
        self.state
    }

    /// Shortest gap between consecutive GETSTATUS requests after the
    /// first command download equal to `command`.
    pub fn min_status_gap_after(&self, command: &[u8]) -> Option<Duration> {
        let start = self.requests.iter().position(|(_, r, _)| {
            matches!(r, FakeRequest::Download { value: 0, data } if data.as_slice() == command)
        })?;

        let times: Vec<Instant> = self.requests[start..]
            .iter()
            .filter(|(_, r, _)| *r == FakeRequest::GetStatus)
            .map(|(at, _, _)| *at)
            .collect();

        times.windows(2).map(|w| w[1] - w[0]).min()
    }

    // ------------------------------------------------------------------
    // Device behaviour
    // ------------------------------------------------------------------

    fn record(&mut self, request: FakeRequest, timeout: Duration) {
        self.requests.push((Instant::now(), request, timeout));
    }

    fn execute_command(&mut self, data: &[u8]) {
        let busy = Reply::new(DfuState::DownloadBusy, STATUS_OK);
        match data.first() {
            Some(0x21) if data.len() == 5 => {
                if self.protected || self.reject_address {
                    self.script.push_back(busy);
                    self.script
                        .push_back(Reply::new(DfuState::Error, STATUS_ERR_TARGET));
                } else {
                    self.script.push_back(busy);
                    self.script
                        .push_back(Reply::new(DfuState::DownloadIdle, STATUS_OK));
                }
            }
            Some(0x41) if data.len() == 1 => {
                self.erasing = true;
                self.erase_reads_left = self.erase_busy_reads.max(1);
            }
            Some(0x92) if data.len() == 1 => {
                if self.reject_unprotect {
                    self.script
                        .push_back(Reply::new(DfuState::Error, STATUS_ERR_VENDOR));
                } else {
                    self.protected = false;
                    self.script.push_back(busy);
                }
            }
            _ => {
                self.script
                    .push_back(Reply::new(DfuState::Error, STATUS_ERR_STALLED));
            }
        }
    }

    fn execute_block(&mut self, block_number: u16) {
        self.script
            .push_back(Reply::new(DfuState::DownloadBusy, STATUS_OK));
        if self.failing_block == Some(block_number) {
            self.script
                .push_back(Reply::new(DfuState::Error, STATUS_ERR_PROG));
        } else {
            self.script
                .push_back(Reply::new(DfuState::DownloadIdle, STATUS_OK));
        }
    }

    fn next_reply(&mut self) -> Reply {
        if let Some(state) = self.stuck_state {
            return Reply::new(state, STATUS_OK);
        }

        if self.erasing {
            if self.endless_erase || self.erase_reads_left > 0 {
                self.erase_reads_left = self.erase_reads_left.saturating_sub(1);
                return Reply {
                    state: DfuState::DownloadBusy,
                    status: STATUS_OK,
                    poll_timeout_ms: self.erase_poll_timeout_ms,
                };
            }
            self.erasing = false;
            return Reply::new(DfuState::DownloadIdle, STATUS_OK);
        }

        self.script
            .pop_front()
            .unwrap_or_else(|| Reply::new(self.state, self.status))
    }

    fn descriptor_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8, 0x03];
        for unit in self.flash_descriptor.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        bytes[0] = bytes.len().min(255) as u8;
        bytes
    }
}

impl Default for FakeDfuDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DfuTransport for FakeDfuDevice {
    fn connect(&mut self) -> TransportResult<()> {
        if let Some(e) = self.connect_error {
            return Err(e);
        }
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn release(&mut self) {
        self.connected = false;
        self.release_count += 1;
    }

    fn control_out(
        &mut self,
        _request_type: u8,
        request: u8,
        value: u16,
        _index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> TransportResult<usize> {
        if !self.connected {
            return Err(rusb::Error::NoDevice);
        }

        match request {
            REQ_CLRSTATUS => {
                self.record(FakeRequest::ClearStatus, timeout);
                if self.script.is_empty() && !self.erasing && self.stuck_state.is_none() {
                    self.state = DfuState::DfuIdle;
                    self.status = STATUS_OK;
                }
                Ok(0)
            }
            REQ_DNLOAD => {
                self.record(
                    FakeRequest::Download {
                        value,
                        data: data.to_vec(),
                    },
                    timeout,
                );
                self.state = DfuState::DownloadSync;
                if value == 0 {
                    self.execute_command(data);
                } else if value >= 2 {
                    self.execute_block(value - 2);
                }
                Ok(data.len())
            }
            _ => Err(rusb::Error::Pipe),
        }
    }

    fn control_in(
        &mut self,
        _request_type: u8,
        request: u8,
        value: u16,
        _index: u16,
        buffer: &mut [u8],
        timeout: Duration,
    ) -> TransportResult<usize> {
        if !self.connected {
            return Err(rusb::Error::NoDevice);
        }

        match request {
            REQ_GETSTATUS => {
                self.record(FakeRequest::GetStatus, timeout);
                self.status_reads += 1;
                if self.status_failures > 0 {
                    self.status_failures -= 1;
                    return Err(rusb::Error::Timeout);
                }

                let reply = self.next_reply();
                self.state = reply.state;
                self.status = reply.status;

                let poll = reply.poll_timeout_ms.to_le_bytes();
                let bytes = [
                    reply.status,
                    poll[0],
                    poll[1],
                    poll[2],
                    reply.state.as_byte(),
                    0,
                ];
                let len = self.short_status.unwrap_or(bytes.len()).min(buffer.len());
                buffer[..len].copy_from_slice(&bytes[..len]);
                Ok(len)
            }
            REQ_GET_DESCRIPTOR => {
                self.record(FakeRequest::GetDescriptor { value }, timeout);
                if self.descriptor_error {
                    return Err(rusb::Error::Pipe);
                }
                let bytes = self.descriptor_bytes();
                let len = bytes.len().min(buffer.len());
                buffer[..len].copy_from_slice(&bytes[..len]);
                Ok(len)
            }
            _ => Err(rusb::Error::Pipe),
        }
    }

    fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    fn product_id(&self) -> u16 {
        self.product_id
    }

    fn device_version(&self) -> u16 {
        self.device_version
    }
}
