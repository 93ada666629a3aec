//! PECMD shell environments (Hiren's BootCD PE and relatives).
//!
//! Booted from RAM, the image root is `X:` but PECMD's configuration refers
//! to its own files through a second drive letter. A `subst` at the top of
//! `pecmd.ini` maps that letter back onto `X:\`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{IoContext, Result, ServicingError};
use crate::runlog::RunLog;

pub fn pecmd_exe(mount_dir: &Path) -> PathBuf {
    super::system32(mount_dir).join("pecmd.exe")
}

pub fn pecmd_ini(mount_dir: &Path) -> PathBuf {
    super::system32(mount_dir).join("pecmd.ini")
}

/// Lines inserted after the header line of `pecmd.ini`.
fn subst_block(letter: char, eol: &str) -> String {
    format!(
        "// bootwim: map {letter}: to X: for RAM boot{eol}\
         EXEC @!X:\\Windows\\System32\\subst.exe {letter}: X:\\{eol}\
         WAIT 500{eol}{eol}"
    )
}

/// Insert the `subst` block after the first line of `content`.
///
/// The file is handled as bytes: pecmd.ini is often in a legacy code page.
/// The inserted lines use the line ending of the header line.
pub fn insert_subst(content: &[u8], letter: char) -> Result<Vec<u8>> {
    let newline = content
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| ServicingError::parse("pecmd.ini (no line break after the header)"))?;

    let eol = if newline > 0 && content[newline - 1] == b'\r' {
        "\r\n"
    } else {
        "\n"
    };

    let block = subst_block(letter.to_ascii_uppercase(), eol);
    let mut out = Vec::with_capacity(content.len() + block.len());
    out.extend_from_slice(&content[..=newline]);
    out.extend_from_slice(block.as_bytes());
    out.extend_from_slice(&content[newline + 1..]);
    Ok(out)
}

/// Add the drive mapping to the mounted image's `pecmd.ini`.
pub fn configure(mount_dir: &Path, letter: char, log: &RunLog) -> Result<()> {
    let path = pecmd_ini(mount_dir);
    let content = fs::read(&path).map_err(|e| {
        log.warn(format!("Could not read {}: {}", path.display(), e));
        ServicingError::missing(format!("readable {}", path.display()))
    })?;

    let updated = insert_subst(&content, letter)?;
    fs::write(&path, updated).io_context(|| format!("Writing {}", path.display()))?;

    log.line(format!(
        "Added 'subst {}: X:\\' to pecmd.ini for RAM boot",
        letter.to_ascii_uppercase()
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_after_header_crlf() {
        let original = b"{ENTER:SHELL}\r\nLOGS X:\\pecmd.log\r\n";
        let updated = insert_subst(original, 'y').unwrap();
        let text = String::from_utf8(updated).unwrap();
        let lines: Vec<&str> = text.split("\r\n").collect();

        assert_eq!(lines[0], "{ENTER:SHELL}");
        assert!(lines[1].starts_with("//"));
        assert_eq!(lines[2], "EXEC @!X:\\Windows\\System32\\subst.exe Y: X:\\");
        assert_eq!(lines[3], "WAIT 500");
        assert_eq!(lines[4], "");
        assert_eq!(lines[5], "LOGS X:\\pecmd.log");
    }

    #[test]
    fn test_insert_preserves_rest_bytes() {
        let mut original = b"HEADER\n".to_vec();
        original.extend_from_slice(&[0xC4, 0xE3, 0xBA, 0xC3, b'\n']);
        let updated = insert_subst(&original, 'Y').unwrap();
        assert!(updated.starts_with(b"HEADER\n//"));
        assert!(updated.ends_with(&[0xC4, 0xE3, 0xBA, 0xC3, b'\n']));
        assert!(!updated.windows(2).any(|w| w == b"\r\n"));
    }

    #[test]
    fn test_no_line_break_is_parse_failure() {
        let err = insert_subst(b"{ENTER:SHELL}", 'Y').unwrap_err();
        assert!(matches!(err, ServicingError::ParseFailure { .. }));
    }
}
