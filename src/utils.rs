use std::fmt::Write as _;

/// Formats bytes as space-separated upper-case hex pairs.
pub(crate) fn format_hex(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "<empty>".to_string();
    }

    bytes
        .iter()
        .enumerate()
        .fold(String::with_capacity(bytes.len() * 3), |mut rendered, (index, byte)| {
            if index > 0 {
                rendered.push(' ');
            }
            let _ = write!(rendered, "{byte:02X}");
            rendered
        })
}
