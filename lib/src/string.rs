/// Extract a NUL-padded byte array as a `&str`.
///
/// Scans for the first NUL byte (or end of slice) and interprets the
/// prefix as UTF-8. Returns `"<invalid>"` if the bytes are not valid
/// UTF-8, or `""` if the buffer starts with NUL / is empty.
#[inline]
pub fn bytes_as_str(buf: &[u8]) -> &str {
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    core::str::from_utf8(&buf[..len]).unwrap_or("<invalid>")
}

/// Copy `name` into a fixed-size NUL-padded buffer, truncating if needed.
///
/// Used for kernel object names: the stored form is always NUL-padded so
/// [`bytes_as_str`] round-trips it.
#[inline]
pub fn copy_name<const N: usize>(name: &str) -> [u8; N] {
    let mut buf = [0u8; N];
    let len = name.len().min(N - 1);
    buf[..len].copy_from_slice(&name.as_bytes()[..len]);
    buf
}
