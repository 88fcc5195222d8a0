//! Miscellaneous utility functions to use across modules

/// Convert any type to a u8 slice (Like a C byte buffer)
pub unsafe fn any_as_u8_slice<T: Sized>(p: &T) -> &[u8] {
    let len = ::std::mem::size_of::<T>();
    ::std::slice::from_raw_parts((p as *const T) as *const u8, len)
}

/// Format a byte buffer as a series of hex bytes
pub fn format_buffer(buffer: &[u8]) -> String {
    buffer
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Read a null-terminated string out of a fixed-size byte buffer.
/// Stops at the first NULL byte, or takes the whole buffer if there is none.
pub fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c_string_stops_at_null() {
        assert_eq!(c_string(b"RO 1.2.3\0garbage"), "RO 1.2.3");
        assert_eq!(c_string(b"\0"), "");
        assert_eq!(c_string(b"no-null"), "no-null");
    }

    #[test]
    fn format_buffer_hex() {
        assert_eq!(format_buffer(&[0x01, 0xd0, 0xc0]), "01 D0 C0");
    }
}
