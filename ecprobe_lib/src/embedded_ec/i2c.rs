//! Talk to the controller directly over an I2C bus, doing our own wire
//! framing. One exchange is a single combined write-then-read transfer
//! against the controller's bus address.

use nix::ioctl_write_ptr_bad;
use std::fs::{File, OpenOptions};
use std::os::unix::io::{AsRawFd, RawFd};

use crate::embedded_ec::protocol::{self, EC_MAX_PARAM_SIZE};
use crate::embedded_ec::{EcError, EcResult, EcTransport};
use crate::util;

/// Bus address the EC responds on
pub const DEFAULT_EC_ADDR: u16 = 0x1e;

/// Open device handles kept around between calls. Exceeding this is a
/// configuration error, not something to retry.
const HANDLE_POOL_CAP: usize = 4;

const I2C_RDWR: u32 = 0x0707;
/// Marks a read message in an I2C_RDWR transfer
const I2C_M_RD: u16 = 0x0001;

#[repr(C)]
struct I2cMsg {
    addr: u16,
    flags: u16,
    len: u16,
    buf: *mut u8,
}

#[repr(C)]
struct I2cRdwrIoctlData {
    msgs: *mut I2cMsg,
    nmsgs: u32,
}

ioctl_write_ptr_bad!(i2c_rdwr, I2C_RDWR, I2cRdwrIoctlData);

/// Open-handle cache keyed by (bus, address). Handles are reused, never
/// evicted below the cap.
struct HandlePool {
    open: Vec<((u8, u16), File)>,
}

impl HandlePool {
    fn new() -> Self {
        HandlePool { open: vec![] }
    }

    fn device(&mut self, bus: u8, addr: u16) -> EcResult<RawFd> {
        if let Some((_, file)) = self.open.iter().find(|(key, _)| *key == (bus, addr)) {
            return Ok(file.as_raw_fd());
        }
        if self.open.len() >= HANDLE_POOL_CAP {
            return Err(EcError::Transport(format!(
                "i2c handle pool exhausted (cap {})",
                HANDLE_POOL_CAP
            )));
        }
        let path = format!("/dev/i2c-{}", bus);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| EcError::Transport(format!("failed to open {}: {}", path, e)))?;
        self.open.push(((bus, addr), file));
        Ok(self.open.last().unwrap().1.as_raw_fd())
    }
}

/// One controller endpoint bound to an I2C bus/address pair
pub struct I2cEc {
    bus: u8,
    addr: u16,
    pool: HandlePool,
}

impl I2cEc {
    pub fn new(bus: u8, addr: u16) -> Self {
        I2cEc {
            bus,
            addr,
            pool: HandlePool::new(),
        }
    }

    /// Single combined write-then-read bus transfer
    fn transfer(&mut self, outbound: &[u8], inbound: &mut [u8]) -> EcResult<()> {
        let fd = self.pool.device(self.bus, self.addr)?;
        let mut msgs = [
            I2cMsg {
                addr: self.addr,
                flags: 0,
                len: outbound.len() as u16,
                buf: outbound.as_ptr() as *mut u8,
            },
            I2cMsg {
                addr: self.addr,
                flags: I2C_M_RD,
                len: inbound.len() as u16,
                buf: inbound.as_mut_ptr(),
            },
        ];
        let data = I2cRdwrIoctlData {
            msgs: msgs.as_mut_ptr(),
            nmsgs: msgs.len() as u32,
        };
        unsafe { i2c_rdwr(fd, &data) }.map_err(|e| {
            EcError::Transport(format!(
                "i2c transfer on bus {} addr {:#04x} failed: {}",
                self.bus, self.addr, e
            ))
        })?;
        Ok(())
    }
}

impl EcTransport for I2cEc {
    fn execute(
        &mut self,
        command: u16,
        version: u8,
        outbound: &[u8],
        inbound_len: usize,
    ) -> EcResult<Vec<u8>> {
        if outbound.len() > EC_MAX_PARAM_SIZE {
            return Err(EcError::PayloadTooLarge(outbound.len()));
        }
        if inbound_len > EC_MAX_PARAM_SIZE {
            return Err(EcError::PayloadTooLarge(inbound_len));
        }
        // The frame carries the command in a single byte
        let command: u8 = command
            .try_into()
            .map_err(|_| EcError::Transport(format!("command {:#x} not addressable over i2c", command)))?;

        let frame = protocol::encode_request(command, version, outbound)?;
        let mut response = vec![0u8; protocol::response_frame_len(version, inbound_len)];
        self.transfer(&frame, &mut response)?;

        if log_enabled!(log::Level::Trace) {
            trace!("i2c out: {}", util::format_buffer(&frame));
            trace!("i2c in:  {}", util::format_buffer(&response));
        }

        protocol::decode_response(version, inbound_len, &response)
    }

    fn name(&self) -> String {
        format!("i2c(bus {}, addr {:#04x})", self.bus, self.addr)
    }
}
