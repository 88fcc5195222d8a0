//! Talk to the controller through the kernel's character-device command
//! interface. The kernel performs the wire framing, we only hand it one
//! opaque command record per exchange.

use nix::errno::Errno;
use nix::ioctl_readwrite;
use num_traits::FromPrimitive;
use std::fs::File;
use std::os::unix::io::AsRawFd;

use crate::embedded_ec::command::EcCommands;
use crate::embedded_ec::commands::COMMS_STATUS_PROCESSING;
use crate::embedded_ec::protocol::EcResponseStatus;
use crate::embedded_ec::{EcError, EcResult, EcTransport};
use crate::os_specific;

/// Size of the shared in/out data buffer in the command record
const IN_SIZE: usize = 256;

/// How often to re-check the comms status while the controller is busy
pub const COMMS_POLL_RETRIES: usize = 50;
/// Sleep between two comms-status polls
pub const COMMS_POLL_INTERVAL_US: u64 = 1000;

// Must be public for the ioctl macro to generate the function.
// And this struct must shadow the struct in the kernel exactly,
// otherwise the ioctl returns ENOTTY.
// We never allocate through it; the real buffer lives in EcCommandRecord.
#[repr(C)]
pub struct _EcCommandRecord {
    version: u32,
    command: u32,
    outsize: u32,
    insize: u32,
    result: u32,
    data: [u8; 0],
}

#[repr(C)]
struct EcCommandRecord {
    /// Version of the command (usually 0)
    version: u32,
    /// Command ID
    command: u32,
    /// Size of the request in bytes
    outsize: u32,
    /// Maximum number of bytes to accept. Buffer must be big enough!
    insize: u32,
    /// Response status code, filled in by the kernel
    result: u32,
    /// Buffer to send and receive data
    data: [u8; IN_SIZE],
}

impl EcCommandRecord {
    fn new(command: u16, version: u8, outbound: &[u8]) -> Self {
        let mut record = EcCommandRecord {
            version: version as u32,
            command: command as u32,
            outsize: outbound.len() as u32,
            insize: IN_SIZE as u32,
            result: 0xff,
            data: [0; IN_SIZE],
        };
        record.data[..outbound.len()].copy_from_slice(outbound);
        record
    }
}

const EC_DEV_IOC_MAGIC: u8 = 0xEC;
ioctl_readwrite!(ec_dev_xcmd, EC_DEV_IOC_MAGIC, 0, _EcCommandRecord);

enum IoctlOutcome {
    /// Kernel completed the exchange and returned this many bytes
    Done(usize),
    /// Kernel asked us to try again, the controller is still processing
    Busy,
}

/// One controller endpoint bound to its character device
pub struct EcDev {
    path: String,
    file: File,
}

impl EcDev {
    pub fn open(path: &str) -> EcResult<Self> {
        let file = File::open(path)
            .map_err(|e| EcError::Transport(format!("failed to open {}: {}", path, e)))?;
        Ok(EcDev {
            path: path.to_string(),
            file,
        })
    }

    fn ioctl_xcmd(&self, record: &mut EcCommandRecord) -> EcResult<IoctlOutcome> {
        let record_ptr = record as *mut _ as *mut _EcCommandRecord;
        let read = match unsafe { ec_dev_xcmd(self.file.as_raw_fd(), record_ptr) } {
            Err(Errno::EAGAIN) => return Ok(IoctlOutcome::Busy),
            Err(err) => {
                return Err(EcError::Transport(format!(
                    "command ioctl on {} failed: {}",
                    self.path, err
                )))
            }
            Ok(read) => read as usize,
        };
        match FromPrimitive::from_u32(record.result) {
            Some(EcResponseStatus::Success) => Ok(IoctlOutcome::Done(read.min(IN_SIZE))),
            Some(EcResponseStatus::InProgress) => Ok(IoctlOutcome::Busy),
            _ => Err(EcError::Device(record.result as u16)),
        }
    }

    /// Ask the controller whether it is still processing. A deferred status
    /// query counts as "still processing".
    fn comms_status(&self) -> EcResult<u32> {
        let mut record = EcCommandRecord::new(EcCommands::GetCommsStatus as u16, 0, &[]);
        match self.ioctl_xcmd(&mut record)? {
            IoctlOutcome::Busy => Ok(COMMS_STATUS_PROCESSING),
            IoctlOutcome::Done(read) if read >= 4 => {
                Ok(u32::from_le_bytes(record.data[..4].try_into().unwrap()))
            }
            IoctlOutcome::Done(read) => Err(EcError::Transport(format!(
                "comms status response too short: {} bytes",
                read
            ))),
        }
    }

    fn wait_until_idle(&self) -> EcResult<()> {
        wait_while_processing(|| Ok(self.comms_status()? & COMMS_STATUS_PROCESSING != 0))
    }
}

/// Resolve one command exchange. A "try again" answer means the kernel copied
/// nothing back into the record, so after the controller goes idle the command
/// is submitted once more and only that completed record's buffer is returned.
fn complete_exchange<S, W>(mut submit: S, wait: W) -> EcResult<Vec<u8>>
where
    S: FnMut() -> EcResult<Option<Vec<u8>>>,
    W: FnOnce() -> EcResult<()>,
{
    if let Some(data) = submit()? {
        return Ok(data);
    }
    wait()?;
    match submit()? {
        Some(data) => Ok(data),
        None => Err(EcError::Transport(
            "controller deferred the command again after going idle".to_string(),
        )),
    }
}

/// Bounded busy-poll loop: query until the processing bit clears, sleeping a
/// fixed interval in between. This is the only wait/retry policy in the
/// subsystem, and it is local to a single command exchange.
pub fn wait_while_processing<F>(mut still_processing: F) -> EcResult<()>
where
    F: FnMut() -> EcResult<bool>,
{
    for _ in 0..COMMS_POLL_RETRIES {
        if !still_processing()? {
            return Ok(());
        }
        os_specific::sleep(COMMS_POLL_INTERVAL_US);
    }
    Err(EcError::Transport(format!(
        "controller still processing after {} polls",
        COMMS_POLL_RETRIES
    )))
}

impl EcTransport for EcDev {
    fn execute(
        &mut self,
        command: u16,
        version: u8,
        outbound: &[u8],
        inbound_len: usize,
    ) -> EcResult<Vec<u8>> {
        if outbound.len() > IN_SIZE {
            return Err(EcError::PayloadTooLarge(outbound.len()));
        }
        if inbound_len > IN_SIZE {
            return Err(EcError::PayloadTooLarge(inbound_len));
        }

        let this = &*self;
        complete_exchange(
            || {
                let mut record = EcCommandRecord::new(command, version, outbound);
                match this.ioctl_xcmd(&mut record)? {
                    IoctlOutcome::Done(read) => Ok(Some(record.data[..read].to_vec())),
                    IoctlOutcome::Busy => Ok(None),
                }
            },
            || this.wait_until_idle(),
        )
    }

    fn name(&self) -> String {
        format!("dev({})", self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_poll_terminates_at_the_retry_budget() {
        let mut polls = 0;
        let result = wait_while_processing(|| {
            polls += 1;
            Ok(true)
        });
        assert!(matches!(result, Err(EcError::Transport(_))));
        assert_eq!(polls, COMMS_POLL_RETRIES);
    }

    #[test]
    fn busy_poll_succeeds_after_k_plus_one_queries() {
        for k in [0usize, 1, 3, COMMS_POLL_RETRIES - 1] {
            let mut polls = 0;
            let result = wait_while_processing(|| {
                polls += 1;
                Ok(polls <= k)
            });
            assert_eq!(result, Ok(()));
            assert_eq!(polls, k + 1);
        }
    }

    #[test]
    fn busy_poll_propagates_poll_errors() {
        let result = wait_while_processing(|| Err(EcError::Device(2)));
        assert_eq!(result, Err(EcError::Device(2)));
    }

    #[test]
    fn deferred_exchange_returns_the_resubmitted_buffer() {
        // The first submission carries the outbound payload; a deferral means
        // the kernel never wrote it back, so only the second, completed
        // submission may supply the response bytes.
        let mut submissions = 0;
        let mut waited = false;
        let result = complete_exchange(
            || {
                submissions += 1;
                if submissions == 1 {
                    Ok(None)
                } else {
                    Ok(Some(vec![0xa1, 0xb2, 0xc3]))
                }
            },
            || {
                waited = true;
                Ok(())
            },
        );
        assert_eq!(result, Ok(vec![0xa1, 0xb2, 0xc3]));
        assert_eq!(submissions, 2);
        assert!(waited);
    }

    #[test]
    fn immediate_completion_skips_the_poll_loop() {
        let result = complete_exchange(
            || Ok(Some(vec![1, 2, 3])),
            || panic!("no wait expected for a completed submission"),
        );
        assert_eq!(result, Ok(vec![1, 2, 3]));
    }

    #[test]
    fn repeated_deferral_after_idle_is_an_error() {
        let result = complete_exchange(|| Ok(None), || Ok(()));
        assert!(matches!(result, Err(EcError::Transport(_))));
    }

    #[test]
    fn deferred_exchange_gives_up_when_the_controller_stays_busy() {
        let mut submissions = 0;
        let result = complete_exchange(
            || {
                submissions += 1;
                Ok(None)
            },
            || Err(EcError::Transport("still processing".to_string())),
        );
        assert!(matches!(result, Err(EcError::Transport(_))));
        assert_eq!(submissions, 1);
    }
}
