//! Client side of the embedded controller's request/response command
//! protocol: frame codec, transports, and the named operations on top.

use core::fmt;
use num_traits::FromPrimitive;

pub mod bus_scan;
pub mod command;
pub mod commands;
pub mod protocol;

#[cfg(target_os = "linux")]
pub mod dev;
#[cfg(target_os = "linux")]
pub mod i2c;

use crate::config::EcConfig;
use crate::util;
use self::command::EcRequestRaw;
use self::commands::*;
use self::protocol::EcResponseStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EcError {
    /// Physical I/O failure. Not retried at this layer.
    Transport(String),
    /// The controller itself reported a nonzero result code
    Device(u16),
    /// Frame integrity failure; the response cannot be trusted
    ChecksumMismatch { expected: u8, actual: u8 },
    /// Declared payload length disagrees with what the caller expected
    LengthMismatch { expected: usize, actual: usize },
    /// Local precondition violation, caught before any I/O
    PayloadTooLarge(usize),
    /// Hello response did not carry the expected magic value
    HandshakeFailed(u32),
}

impl EcError {
    /// The controller's result code as a named status, if it is a known one
    pub fn status(&self) -> Option<EcResponseStatus> {
        match self {
            EcError::Device(code) => FromPrimitive::from_u16(*code),
            _ => None,
        }
    }
}

impl fmt::Display for EcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcError::Transport(msg) => write!(f, "transport error: {}", msg),
            EcError::Device(code) => match self.status() {
                Some(status) => write!(f, "controller returned {:?} ({})", status, code),
                None => write!(f, "controller returned unknown result code {}", code),
            },
            EcError::ChecksumMismatch { expected, actual } => write!(
                f,
                "response checksum mismatch: frame says {:#04x}, computed {:#04x}",
                expected, actual
            ),
            EcError::LengthMismatch { expected, actual } => write!(
                f,
                "response length mismatch: expected {}, got {}",
                expected, actual
            ),
            EcError::PayloadTooLarge(len) => {
                write!(f, "payload of {} bytes exceeds the protocol maximum", len)
            }
            EcError::HandshakeFailed(value) => {
                write!(f, "handshake returned unexpected value {:#010x}", value)
            }
        }
    }
}

pub type EcResult<T> = Result<T, EcError>;

/// One physical way of exchanging a command with a controller. Exactly one
/// transport is bound per endpoint; commands on it are strictly ordered.
pub trait EcTransport {
    fn execute(
        &mut self,
        command: u16,
        version: u8,
        outbound: &[u8],
        inbound_len: usize,
    ) -> EcResult<Vec<u8>>;

    /// Human-readable description for probe logs
    fn name(&self) -> String;
}

/// Which logical controller an endpoint talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EcDeviceKind {
    /// The main embedded controller
    Ec,
    /// Power-delivery MCU
    Pd,
    /// Sensor hub
    Sh,
    /// Fingerprint MCU
    Fp,
}

impl EcDeviceKind {
    pub fn dev_path(&self) -> &'static str {
        match self {
            EcDeviceKind::Ec => "/dev/cros_ec",
            EcDeviceKind::Pd => "/dev/cros_pd",
            EcDeviceKind::Sh => "/dev/cros_sh",
            EcDeviceKind::Fp => "/dev/cros_fp",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EcDeviceKind::Ec => "Embedded Controller",
            EcDeviceKind::Pd => "PD MCU",
            EcDeviceKind::Sh => "Sensor Hub",
            EcDeviceKind::Fp => "Fingerprint MCU",
        }
    }
}

/// Preferred transport, overriding the probe order
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EcDriverType {
    /// Kernel character-device command interface
    Dev,
    /// Raw register-level bus access
    I2c,
}

/// The two deployed firmware generations answer the handshake with
/// different magic pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolGeneration {
    Current,
    Legacy,
}

impl ProtocolGeneration {
    /// (input magic, expected output magic) - protocol constants, not
    /// arbitrary values
    pub fn hello_magic(&self) -> (u32, u32) {
        match self {
            ProtocolGeneration::Current => (0xa0b0c0d0, 0xa1b2c3d4),
            ProtocolGeneration::Legacy => (0xf0e0d0c0, 0xf1e2d3c4),
        }
    }
}

/// Which of the two firmware copies is currently in-use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcCurrentImage {
    Unknown,
    RO,
    RW,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub ro: String,
    pub rw: String,
    pub active: EcCurrentImage,
}

impl FirmwareVersion {
    /// Version string of the copy that is currently running
    pub fn active_string(&self) -> &str {
        match self.active {
            EcCurrentImage::RO => &self.ro,
            EcCurrentImage::RW => &self.rw,
            EcCurrentImage::Unknown => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipInfo {
    pub vendor: String,
    pub name: String,
    pub revision: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashInfo {
    pub flash_size: u32,
    pub write_block_size: u32,
    pub erase_block_size: u32,
    pub protect_block_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdChipInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_id: u16,
    /// None if the vendor is not on the allow-list; the raw bytes are not
    /// meaningful then
    pub fw_version: Option<u64>,
}

/// Cached display identity, populated lazily on first access
#[derive(Debug, Clone)]
pub struct EcIdentity {
    pub vendor: String,
    pub name: String,
    pub revision: String,
    pub firmware: String,
}

/// A logical controller bound to exactly one transport
pub struct EcEndpoint {
    kind: EcDeviceKind,
    transport: Box<dyn EcTransport>,
    generation: ProtocolGeneration,
    identity: Option<EcIdentity>,
}

impl EcEndpoint {
    pub fn new(
        kind: EcDeviceKind,
        transport: Box<dyn EcTransport>,
        generation: ProtocolGeneration,
    ) -> Self {
        EcEndpoint {
            kind,
            transport,
            generation,
            identity: None,
        }
    }

    pub fn kind(&self) -> EcDeviceKind {
        self.kind
    }

    pub fn generation(&self) -> ProtocolGeneration {
        self.generation
    }

    pub fn transport_name(&self) -> String {
        self.transport.name()
    }

    /// Uniform command exchange over the bound transport
    pub fn execute(
        &mut self,
        command: u16,
        version: u8,
        outbound: &[u8],
        inbound_len: usize,
    ) -> EcResult<Vec<u8>> {
        self.transport.execute(command, version, outbound, inbound_len)
    }

    /// Handshake: send the magic input, expect the exact magic output.
    /// Used both for probing and for later liveness checks.
    pub fn hello(&mut self) -> EcResult<()> {
        let (input, expected) = self.generation.hello_magic();
        let response = EcRequestHello { in_data: input }.send_command(self)?;
        let out_data = response.out_data;
        if out_data != expected {
            return Err(EcError::HandshakeFailed(out_data));
        }
        Ok(())
    }

    /// RO/RW firmware version strings and which copy is running
    pub fn version(&mut self) -> EcResult<FirmwareVersion> {
        let v = EcRequestGetVersion {}.send_command(self)?;
        let active = match v.current_image {
            1 => EcCurrentImage::RO,
            2 => EcCurrentImage::RW,
            _ => EcCurrentImage::Unknown,
        };
        Ok(FirmwareVersion {
            ro: util::c_string(&v.version_string_ro),
            rw: util::c_string(&v.version_string_rw),
            active,
        })
    }

    /// Free-form firmware build string
    pub fn build_info(&mut self) -> EcResult<String> {
        let data = EcRequestGetBuildInfo {}.send_command_vec(self)?;
        Ok(util::c_string(&data))
    }

    pub fn chip_info(&mut self) -> EcResult<ChipInfo> {
        let info = EcRequestGetChipInfo {}.send_command(self)?;
        Ok(ChipInfo {
            vendor: util::c_string(&info.vendor),
            name: util::c_string(&info.name),
            revision: util::c_string(&info.revision),
        })
    }

    pub fn board_version(&mut self) -> EcResult<u16> {
        let v = EcRequestGetBoardVersion {}.send_command(self)?;
        Ok(v.board_version)
    }

    pub fn flash_info(&mut self) -> EcResult<FlashInfo> {
        let info = EcRequestFlashInfo {}.send_command(self)?;
        Ok(FlashInfo {
            flash_size: info.flash_size,
            write_block_size: info.write_block_size,
            erase_block_size: info.erase_block_size,
            protect_block_size: info.protect_block_size,
        })
    }

    pub fn pd_chip_info(&mut self, port: u8) -> EcResult<PdChipInfo> {
        let info = EcRequestPdChipInfo { port, live: 0 }.send_command(self)?;
        let vendor_id = info.vendor_id;
        let fw_version = if PD_FW_VENDORS.contains(&vendor_id) {
            Some(u64::from_le_bytes(info.fw_version))
        } else {
            None
        };
        Ok(PdChipInfo {
            vendor_id,
            product_id: info.product_id,
            device_id: info.device_id,
            fw_version,
        })
    }

    pub fn vbnv_read(&mut self) -> EcResult<[u8; VBNV_BLOCK_SIZE]> {
        let r = EcRequestVbnvContextRead {
            op: VBNV_CONTEXT_OP_READ,
        }
        .send_command(self)?;
        Ok(r.block)
    }

    pub fn vbnv_write(&mut self, block: &[u8]) -> EcResult<()> {
        if block.len() != VBNV_BLOCK_SIZE {
            return Err(EcError::LengthMismatch {
                expected: VBNV_BLOCK_SIZE,
                actual: block.len(),
            });
        }
        let mut request = EcRequestVbnvContextWrite {
            op: VBNV_CONTEXT_OP_WRITE,
            block: [0; VBNV_BLOCK_SIZE],
        };
        request.block.copy_from_slice(block);
        request.send_command(self)
    }

    /// Display identity, cached for the process lifetime
    pub fn identity(&mut self) -> EcResult<&EcIdentity> {
        if self.identity.is_none() {
            let chip = self.chip_info()?;
            let fw = self.version()?;
            self.identity = Some(EcIdentity {
                vendor: chip.vendor,
                name: chip.name,
                revision: chip.revision,
                firmware: fw.active_string().to_string(),
            });
        }
        Ok(self.identity.as_ref().unwrap())
    }
}

/// Bind a transport to an endpoint if it answers the handshake. Tries the
/// current-generation magic first, then the legacy pair. Returns None if
/// neither answers; the caller moves on to the next transport.
pub fn probe_endpoint(kind: EcDeviceKind, transport: Box<dyn EcTransport>) -> Option<EcEndpoint> {
    let mut endpoint = EcEndpoint::new(kind, transport, ProtocolGeneration::Current);
    debug!(
        "probing {} over {}",
        kind.label(),
        endpoint.transport_name()
    );
    match endpoint.hello() {
        Ok(()) => return Some(endpoint),
        Err(err) => debug!("current-generation handshake failed: {}", err),
    }
    endpoint.generation = ProtocolGeneration::Legacy;
    match endpoint.hello() {
        Ok(()) => Some(endpoint),
        Err(err) => {
            debug!("legacy handshake failed: {}", err);
            None
        }
    }
}

/// Try transports in priority order and bind the first that answers the
/// handshake: the kernel device first, raw I2C as the fallback. Returning
/// None means the controller is not present, which is a valid system state
/// for inventory tooling, not an error.
#[cfg(target_os = "linux")]
pub fn setup(kind: EcDeviceKind, config: &EcConfig) -> Option<EcEndpoint> {
    if config.driver != Some(EcDriverType::I2c) {
        let path = config.device_path.as_deref().unwrap_or(kind.dev_path());
        match dev::EcDev::open(path) {
            Ok(transport) => {
                if let Some(endpoint) = probe_endpoint(kind, Box::new(transport)) {
                    return Some(endpoint);
                }
            }
            Err(err) => debug!("device channel unavailable: {}", err),
        }
    }

    if config.driver != Some(EcDriverType::Dev) {
        let bus = config.i2c_bus.or_else(|| {
            let names = config.adapter_name_refs();
            bus_scan::discover_bus(&names)
        });
        if let Some(bus) = bus {
            let addr = config.i2c_address.unwrap_or(i2c::DEFAULT_EC_ADDR);
            let transport = i2c::I2cEc::new(bus, addr);
            if let Some(endpoint) = probe_endpoint(kind, Box::new(transport)) {
                return Some(endpoint);
            }
        }
    }

    info!("{} not present", kind.label());
    None
}

#[cfg(not(target_os = "linux"))]
pub fn setup(kind: EcDeviceKind, _config: &EcConfig) -> Option<EcEndpoint> {
    info!("no transport available for {} on this OS", kind.label());
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Canned-response transport: maps command code to the response bytes.
    /// Hello is answered by transforming the input magic.
    struct MockEc {
        /// What to add to the Hello input magic; the real controllers answer
        /// 0xa0b0c0d0 with 0xa1b2c3d4 and 0xf0e0d0c0 with 0xf1e2d3c4
        hello_replies: HashMap<u32, u32>,
        canned: HashMap<u16, Vec<u8>>,
    }

    impl MockEc {
        fn new() -> Self {
            MockEc {
                hello_replies: HashMap::new(),
                canned: HashMap::new(),
            }
        }

        fn current_generation() -> Self {
            let mut mock = Self::new();
            mock.hello_replies.insert(0xa0b0c0d0, 0xa1b2c3d4);
            mock
        }

        fn legacy_generation() -> Self {
            let mut mock = Self::new();
            mock.hello_replies.insert(0xf0e0d0c0, 0xf1e2d3c4);
            mock
        }
    }

    impl EcTransport for MockEc {
        fn execute(
            &mut self,
            command: u16,
            _version: u8,
            outbound: &[u8],
            inbound_len: usize,
        ) -> EcResult<Vec<u8>> {
            if command == command::EcCommands::Hello as u16 {
                let input = u32::from_le_bytes(outbound[..4].try_into().unwrap());
                // An unknown magic still gets a transport-level success,
                // just with a junk payload
                let reply = self.hello_replies.get(&input).copied().unwrap_or(0xeeeeeeee);
                return Ok(reply.to_le_bytes().to_vec());
            }
            match self.canned.get(&command) {
                Some(data) => {
                    assert_eq!(data.len(), inbound_len);
                    Ok(data.clone())
                }
                None => Err(EcError::Device(1)),
            }
        }

        fn name(&self) -> String {
            "mock".to_string()
        }
    }

    fn endpoint(mock: MockEc, generation: ProtocolGeneration) -> EcEndpoint {
        EcEndpoint::new(EcDeviceKind::Ec, Box::new(mock), generation)
    }

    #[test]
    fn hello_accepts_only_the_exact_magic() {
        let mut ep = endpoint(MockEc::current_generation(), ProtocolGeneration::Current);
        assert_eq!(ep.hello(), Ok(()));

        // Same transport probed with the wrong generation: transport-level
        // success, wrong payload. Must be HandshakeFailed, not Ok.
        let mut ep = endpoint(MockEc::current_generation(), ProtocolGeneration::Legacy);
        assert_eq!(ep.hello(), Err(EcError::HandshakeFailed(0xeeeeeeee)));
    }

    #[test]
    fn probe_falls_back_to_the_legacy_generation() {
        let ep = probe_endpoint(EcDeviceKind::Ec, Box::new(MockEc::legacy_generation()))
            .expect("legacy controller should bind");
        assert_eq!(ep.generation(), ProtocolGeneration::Legacy);

        let ep = probe_endpoint(EcDeviceKind::Ec, Box::new(MockEc::current_generation()))
            .expect("current controller should bind");
        assert_eq!(ep.generation(), ProtocolGeneration::Current);

        assert!(probe_endpoint(EcDeviceKind::Ec, Box::new(MockEc::new())).is_none());
    }

    #[test]
    fn version_reports_the_active_copy() {
        let mut mock = MockEc::current_generation();
        let mut response = vec![];
        let mut ro = [0u8; 32];
        ro[..8].copy_from_slice(b"ro-1.0.0");
        let mut rw = [0u8; 32];
        rw[..8].copy_from_slice(b"rw-1.2.3");
        response.extend_from_slice(&ro);
        response.extend_from_slice(&rw);
        response.extend_from_slice(&[0u8; 32]);
        response.extend_from_slice(&2u32.to_le_bytes());
        mock.canned
            .insert(command::EcCommands::GetVersion as u16, response);

        let mut ep = endpoint(mock, ProtocolGeneration::Current);
        let version = ep.version().unwrap();
        assert_eq!(version.active, EcCurrentImage::RW);
        assert_eq!(version.active_string(), "rw-1.2.3");
        assert_eq!(version.ro, "ro-1.0.0");
    }

    #[test]
    fn pd_firmware_version_is_vendor_gated() {
        let pd_response = |vendor: u16| {
            let mut data = vec![];
            data.extend_from_slice(&vendor.to_le_bytes());
            data.extend_from_slice(&0x1234u16.to_le_bytes());
            data.extend_from_slice(&0x0007u16.to_le_bytes());
            data.extend_from_slice(&0x0102030405060708u64.to_le_bytes());
            data
        };

        let mut mock = MockEc::current_generation();
        mock.canned
            .insert(command::EcCommands::PdChipInfo as u16, pd_response(0xaaaa));
        let mut ep = endpoint(mock, ProtocolGeneration::Current);
        let info = ep.pd_chip_info(0).unwrap();
        assert_eq!(info.fw_version, Some(0x0102030405060708));

        let mut mock = MockEc::current_generation();
        mock.canned
            .insert(command::EcCommands::PdChipInfo as u16, pd_response(0x1234));
        let mut ep = endpoint(mock, ProtocolGeneration::Current);
        let info = ep.pd_chip_info(0).unwrap();
        assert_eq!(info.vendor_id, 0x1234);
        assert_eq!(info.fw_version, None);
    }

    #[test]
    fn vbnv_write_requires_an_exact_block() {
        let mut ep = endpoint(MockEc::current_generation(), ProtocolGeneration::Current);
        assert_eq!(
            ep.vbnv_write(&[0u8; 8]),
            Err(EcError::LengthMismatch {
                expected: VBNV_BLOCK_SIZE,
                actual: 8
            })
        );
    }

    #[test]
    fn identity_is_cached_after_first_access() {
        let mut mock = MockEc::current_generation();
        let mut chip = vec![];
        for s in [&b"npcx"[..], &b"npcx996f"[..], &b"B1"[..]] {
            let mut field = [0u8; 32];
            field[..s.len()].copy_from_slice(s);
            chip.extend_from_slice(&field);
        }
        mock.canned
            .insert(command::EcCommands::GetChipInfo as u16, chip);
        let mut version = vec![0u8; 100];
        version[0..6].copy_from_slice(b"ro-0.1");
        version[32..38].copy_from_slice(b"rw-0.2");
        version[96..100].copy_from_slice(&1u32.to_le_bytes());
        mock.canned
            .insert(command::EcCommands::GetVersion as u16, version);

        let mut ep = endpoint(mock, ProtocolGeneration::Current);
        let identity = ep.identity().unwrap();
        assert_eq!(identity.name, "npcx996f");
        assert_eq!(identity.firmware, "ro-0.1");
        // Second access hits the cache even if the transport would now fail
        ep.transport = Box::new(MockEc::new());
        assert_eq!(ep.identity().unwrap().vendor, "npcx");
    }
}
