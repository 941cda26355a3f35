use elevate::RunningAs;
use std::io;
use std::path::Path;
use std::sync::OnceLock;

static IS_ROOT: OnceLock<bool> = OnceLock::new();

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;

/// Returns whether the current process is running as root/admin.
/// The result is cached on first call using OnceLock.
pub fn is_root() -> bool {
    *IS_ROOT.get_or_init(|| matches!(elevate::check(), RunningAs::Root | RunningAs::Suid))
}

/// Removes colour/erase sequences (`ESC [ digits;... m|K`) and window-title
/// sequences (`ESC ] 0 ; ... BEL`). Everything else is kept verbatim.
pub fn strip_ansi(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == ESC {
            if let Some(end) = csi_end(bytes, i).or_else(|| title_end(bytes, i)) {
                i = end;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Index just past an `ESC [ [0-9;]* (m|K)` sequence starting at `start`
fn csi_end(bytes: &[u8], start: usize) -> Option<usize> {
    if bytes.get(start + 1) != Some(&b'[') {
        return None;
    }
    let mut j = start + 2;
    while j < bytes.len() && (bytes[j].is_ascii_digit() || bytes[j] == b';') {
        j += 1;
    }
    matches!(bytes.get(j), Some(b'm' | b'K')).then_some(j + 1)
}

/// Index just past an `ESC ] 0 ; ... BEL` sequence starting at `start`
fn title_end(bytes: &[u8], start: usize) -> Option<usize> {
    if bytes.get(start + 1..start + 4) != Some(b"]0;".as_slice()) {
        return None;
    }
    let bel = bytes[start + 4..].iter().position(|b| *b == BEL)?;
    Some(start + 4 + bel + 1)
}

/// Removes the helper's scratch log; a file that is already gone is fine
pub fn remove_scratch_log(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_ansi_colours() {
        assert_eq!(strip_ansi("\x1b[1;32mdone\x1b[0m"), "done");
        assert_eq!(strip_ansi("50%\x1b[K"), "50%");
        assert_eq!(strip_ansi("\x1b[m plain"), " plain");
    }

    #[test]
    fn test_strip_ansi_title() {
        assert_eq!(strip_ansi("\x1b]0;formatting sdb\x07Writing"), "Writing");
    }

    #[test]
    fn test_strip_ansi_keeps_other_bytes() {
        assert_eq!(strip_ansi("mkfs.fat 4.2 (2021-01-31)"), "mkfs.fat 4.2 (2021-01-31)");
        // Other escape sequences are not touched
        assert_eq!(strip_ansi("\x1b[2Jclear"), "\x1b[2Jclear");
        // Unterminated title sequence is left alone
        assert_eq!(strip_ansi("\x1b]0;no bell"), "\x1b]0;no bell");
        assert_eq!(strip_ansi("Größe \x1b[31mrot\x1b[0m"), "Größe rot");
    }

    #[test]
    fn test_remove_scratch_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("formatusb.log");
        std::fs::write(&log, "helper output").unwrap();

        remove_scratch_log(&log).unwrap();
        assert!(!log.exists());
        // Second removal is a no-op
        remove_scratch_log(&log).unwrap();
    }
}
