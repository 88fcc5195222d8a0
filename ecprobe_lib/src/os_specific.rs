//! Helper functions that need OS/platform specific implementations

use std::{thread, time};

/// Sleep a number of microseconds
pub fn sleep(micros: u64) {
    let duration = time::Duration::from_micros(micros);
    thread::sleep(duration);
}
