use super::command::*;
use super::protocol::EC_MAX_PARAM_SIZE;

#[repr(C, packed)]
pub struct EcRequestHello {
    /// Magic input value; the controller transforms it into a different,
    /// fixed output value so both sides can verify the framing
    pub in_data: u32,
}

#[repr(C, packed)]
pub struct EcResponseHello {
    pub out_data: u32,
}

impl EcRequest<EcResponseHello> for EcRequestHello {
    fn command_id() -> EcCommands {
        EcCommands::Hello
    }
}

#[repr(C, packed)]
pub struct EcRequestGetVersion {}

#[repr(C, packed)]
pub struct EcResponseGetVersion {
    /// Null-terminated version of the RO firmware
    pub version_string_ro: [u8; 32],
    /// Null-terminated version of the RW firmware
    pub version_string_rw: [u8; 32],
    /// Used to be the RW-B string
    pub reserved: [u8; 32],
    /// Which firmware copy is currently in-use. See enum EcCurrentImage
    pub current_image: u32,
}

impl EcRequest<EcResponseGetVersion> for EcRequestGetVersion {
    fn command_id() -> EcCommands {
        EcCommands::GetVersion
    }
}

#[repr(C, packed)]
pub struct EcRequestGetBuildInfo {}

/// Free-form null-terminated build string. The firmware pads up to the host
/// parameter limit.
#[repr(C, packed)]
pub struct EcResponseGetBuildInfo {
    pub build_string: [u8; EC_MAX_PARAM_SIZE],
}

impl EcRequest<EcResponseGetBuildInfo> for EcRequestGetBuildInfo {
    fn command_id() -> EcCommands {
        EcCommands::GetBuildInfo
    }
}

#[repr(C, packed)]
pub struct EcRequestGetChipInfo {}

#[repr(C, packed)]
pub struct EcResponseGetChipInfo {
    /// Null-terminated chip vendor string
    pub vendor: [u8; 32],
    /// Null-terminated chip name string
    pub name: [u8; 32],
    /// Null-terminated chip revision string
    pub revision: [u8; 32],
}

impl EcRequest<EcResponseGetChipInfo> for EcRequestGetChipInfo {
    fn command_id() -> EcCommands {
        EcCommands::GetChipInfo
    }
}

#[repr(C, packed)]
pub struct EcRequestGetBoardVersion {}

#[repr(C, packed)]
pub struct EcResponseGetBoardVersion {
    pub board_version: u16,
}

impl EcRequest<EcResponseGetBoardVersion> for EcRequestGetBoardVersion {
    fn command_id() -> EcCommands {
        EcCommands::GetBoardVersion
    }
}

/// The controller is still processing the previous command
pub const COMMS_STATUS_PROCESSING: u32 = 1 << 0;

#[repr(C, packed)]
pub struct EcRequestGetCommsStatus {}

#[repr(C, packed)]
pub struct EcResponseGetCommsStatus {
    pub flags: u32,
}

impl EcResponseGetCommsStatus {
    pub fn processing(&self) -> bool {
        self.flags & COMMS_STATUS_PROCESSING != 0
    }
}

impl EcRequest<EcResponseGetCommsStatus> for EcRequestGetCommsStatus {
    fn command_id() -> EcCommands {
        EcCommands::GetCommsStatus
    }
}

#[repr(C, packed)]
pub struct EcRequestFlashInfo {}

#[repr(C, packed)]
pub struct EcResponseFlashInfo {
    /// Usable flash size in bytes
    pub flash_size: u32,
    /// Write granularity
    pub write_block_size: u32,
    /// Erase granularity
    pub erase_block_size: u32,
    /// Protection granularity
    pub protect_block_size: u32,
}

impl EcRequest<EcResponseFlashInfo> for EcRequestFlashInfo {
    fn command_id() -> EcCommands {
        EcCommands::FlashInfo
    }
}

#[repr(C, packed)]
pub struct EcRequestPdChipInfo {
    pub port: u8,
    /// Re-read from the chip instead of answering from the EC's cache
    pub live: u8,
}

#[repr(C, packed)]
pub struct EcResponsePdChipInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_id: u16,
    /// Only meaningful for an allow-list of vendors, see PD_FW_VENDORS
    pub fw_version: [u8; 8],
}

impl EcRequest<EcResponsePdChipInfo> for EcRequestPdChipInfo {
    fn command_id() -> EcCommands {
        EcCommands::PdChipInfo
    }
}

/// Vendor IDs whose PD chips report a usable firmware version number
pub const PD_FW_VENDORS: [u16; 2] = [
    0xaaaa, // Analogix
    0x1da0, // Parade
];

/// Size of the opaque boot-verification non-volatile block
pub const VBNV_BLOCK_SIZE: usize = 16;

pub const VBNV_CONTEXT_OP_READ: u32 = 0;
pub const VBNV_CONTEXT_OP_WRITE: u32 = 1;

#[repr(C, packed)]
pub struct EcRequestVbnvContextRead {
    pub op: u32,
}

#[repr(C, packed)]
pub struct EcResponseVbnvContextRead {
    pub block: [u8; VBNV_BLOCK_SIZE],
}

impl EcRequest<EcResponseVbnvContextRead> for EcRequestVbnvContextRead {
    fn command_id() -> EcCommands {
        EcCommands::VbnvContext
    }
    fn command_version() -> u8 {
        1
    }
}

#[repr(C, packed)]
pub struct EcRequestVbnvContextWrite {
    pub op: u32,
    pub block: [u8; VBNV_BLOCK_SIZE],
}

impl EcRequest<()> for EcRequestVbnvContextWrite {
    fn command_id() -> EcCommands {
        EcCommands::VbnvContext
    }
    fn command_version() -> u8 {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn wire_struct_sizes() {
        assert_eq!(size_of::<EcRequestHello>(), 4);
        assert_eq!(size_of::<EcResponseGetVersion>(), 100);
        assert_eq!(size_of::<EcResponseGetChipInfo>(), 96);
        assert_eq!(size_of::<EcResponseGetBoardVersion>(), 2);
        assert_eq!(size_of::<EcResponseFlashInfo>(), 16);
        assert_eq!(size_of::<EcResponsePdChipInfo>(), 14);
        assert_eq!(size_of::<EcRequestVbnvContextWrite>(), 20);
        assert_eq!(size_of::<EcResponseVbnvContextRead>(), VBNV_BLOCK_SIZE);
    }

    #[test]
    fn comms_status_processing_bit() {
        assert!(EcResponseGetCommsStatus { flags: 1 }.processing());
        assert!(!EcResponseGetCommsStatus { flags: 0 }.processing());
        assert!(!EcResponseGetCommsStatus { flags: 2 }.processing());
    }
}
