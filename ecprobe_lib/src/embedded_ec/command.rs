use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::util;

use super::{EcEndpoint, EcError, EcResult};

/// Command codes shared with the controller firmware. Stable across
/// transports and preserved bit-for-bit for interoperability.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, FromPrimitive)]
#[repr(u16)]
pub enum EcCommands {
    /// Handshake to confirm an endpoint is live and speaking our protocol
    Hello = 0x01,
    GetVersion = 0x02,
    GetBuildInfo = 0x04,
    GetChipInfo = 0x05,
    GetBoardVersion = 0x06,
    /// Poll whether the controller is still processing a command
    GetCommsStatus = 0x09,
    FlashInfo = 0x10,
    /// Read/write the boot-verification non-volatile context block
    VbnvContext = 0x17,
    /// Get information about a power-delivery chip behind the EC
    PdChipInfo = 0x011b,
}

pub trait EcRequest<R> {
    fn command_id() -> EcCommands;
    // Can optionally override this
    fn command_version() -> u8 {
        0
    }
}

impl<T: EcRequest<R>, R> EcRequestRaw<R> for T {
    fn command_id_u16() -> u16 {
        Self::command_id() as u16
    }
    fn command_version() -> u8 {
        Self::command_version()
    }
}

pub trait EcRequestRaw<R> {
    fn command_id_u16() -> u16;
    fn command_version() -> u8;

    fn format_request(&self) -> &[u8]
    where
        Self: Sized,
    {
        unsafe { util::any_as_u8_slice(self) }
    }

    /// Issue the command and return the raw response bytes. The expected
    /// inbound length is derived from the response struct.
    fn send_command_vec(&self, ec: &mut EcEndpoint) -> EcResult<Vec<u8>>
    where
        Self: Sized,
    {
        let request = self.format_request();
        let response = ec.execute(
            Self::command_id_u16(),
            Self::command_version(),
            request,
            std::mem::size_of::<R>(),
        )?;
        trace!(
            "send_command<{:X?}>",
            <EcCommands as FromPrimitive>::from_u16(Self::command_id_u16())
        );
        trace!("  Request:  {:?}", request);
        trace!("  Response: {:?}", response);
        Ok(response)
    }

    fn send_command(&self, ec: &mut EcEndpoint) -> EcResult<R>
    where
        Self: Sized,
    {
        let response = self.send_command_vec(ec)?;
        if response.len() != std::mem::size_of::<R>() {
            return Err(EcError::LengthMismatch {
                expected: std::mem::size_of::<R>(),
                actual: response.len(),
            });
        }
        let val: R = unsafe { std::ptr::read(response.as_ptr() as *const _) };
        Ok(val)
    }
}
