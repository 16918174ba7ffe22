use crate::error::ProbeError;
use std::process::Stdio;
use tokio::process::Command;
use uuid::Uuid;

/// Returns the supplied token unchanged, or a fresh random UUID when none
/// (or only whitespace) was given. The generated token lives only in memory
/// for this process.
pub fn resolve_identity(custom: Option<&str>) -> String {
    match custom.filter(|v| !v.trim().is_empty()) {
        Some(id) => id.to_string(),
        None => Uuid::new_v4().to_string(),
    }
}

/// Reads the hardware serial / system UUID. The caller bounds this with a
/// deadline; the external command is killed when the future is dropped.
pub async fn hardware_serial() -> Result<String, ProbeError> {
    #[cfg(target_os = "linux")]
    {
        if let Ok(text) = tokio::fs::read_to_string("/sys/class/dmi/id/product_uuid").await {
            let text = text.trim();
            if !text.is_empty() {
                return Ok(text.to_string());
            }
        }
    }

    let (program, args) = serial_command();
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|err| ProbeError::failed("smbios", format!("failed to run {program}: {err}")))?;
    if !output.status.success() {
        return Err(ProbeError::failed(
            "smbios",
            format!("{program} exited with {}", output.status),
        ));
    }

    first_serial_line(&decode_cmd_stdout(&output.stdout))
        .ok_or_else(|| ProbeError::failed("smbios", format!("{program} printed no serial")))
}

#[cfg(target_os = "windows")]
fn serial_command() -> (&'static str, &'static [&'static str]) {
    ("wmic", &["bios", "get", "serialnumber"])
}

#[cfg(not(target_os = "windows"))]
fn serial_command() -> (&'static str, &'static [&'static str]) {
    ("dmidecode", &["-s", "system-uuid"])
}

/// First non-empty line that is not a column header.
fn first_serial_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.to_lowercase().contains("serial"))
        .map(str::to_string)
}

/// wmic writes UTF-16LE when redirected; everything else is UTF-8.
fn decode_cmd_stdout(bytes: &[u8]) -> String {
    if let Ok(utf8) = std::str::from_utf8(bytes) {
        return utf8.to_string();
    }

    if bytes.len() >= 2 && bytes.len() % 2 == 0 {
        let u16buf: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        if let Ok(s) = String::from_utf16(&u16buf) {
            return s;
        }
    }

    String::from_utf8_lossy(bytes).to_string()
}
