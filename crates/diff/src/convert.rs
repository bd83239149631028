//! Legacy-format detection and conversion.
//!
//! The content signature wins over the file extension: an `.xls` that is
//! really a ZIP container is read directly, while an `.xlsx` carrying an
//! OLE2 compound file must be converted before the main read path.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tracing::{info, warn};

use crate::error::DiffError;

const OLE2_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SniffedFormat {
    /// ZIP container — a modern OOXML spreadsheet.
    Zip,
    /// OLE2 compound file — a legacy binary spreadsheet.
    Ole2,
    Unknown,
}

/// Inspect the first 8 bytes of a file.
pub fn sniff_format(path: &Path) -> std::io::Result<SniffedFormat> {
    let mut f = std::fs::File::open(path)?;
    let mut hdr = [0u8; 8];
    let n = f.read(&mut hdr)?;
    if n >= 2 && hdr[0] == b'P' && hdr[1] == b'K' {
        return Ok(SniffedFormat::Zip);
    }
    if n >= 8 && hdr == OLE2_MAGIC {
        return Ok(SniffedFormat::Ole2);
    }
    Ok(SniffedFormat::Unknown)
}

/// External converter client settings (a `unoserver` deployment).
#[derive(Debug, Clone)]
pub struct ConverterConfig {
    pub host: String,
    pub port: u16,
    pub protocol: String,
    pub bin: String,
    pub timeout: Duration,
    pub keep_original: bool,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            host: "xlsconvert".to_string(),
            port: 2003,
            protocol: "http".to_string(),
            bin: "unoconvert".to_string(),
            timeout: Duration::from_secs(60),
            keep_original: false,
        }
    }
}

/// Convert a legacy binary spreadsheet to the modern format if needed,
/// returning the path to read from afterwards.
///
/// `.xls` with ZIP content is returned as-is (mislabeled modern file); any
/// OLE2 content is pushed through the converter regardless of extension.
pub async fn convert_legacy_if_needed(
    path: &Path,
    cfg: &ConverterConfig,
) -> Result<PathBuf, DiffError> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let sniffed = sniff_format(path).map_err(|e| DiffError::Convert(e.to_string()))?;

    let needs_convert = match (ext.as_str(), sniffed) {
        ("xls", SniffedFormat::Zip) => false,
        ("xls", _) => true,
        (_, SniffedFormat::Ole2) => true,
        _ => false,
    };
    if !needs_convert {
        return Ok(path.to_path_buf());
    }

    // xxx.xls -> xxx.xlsx; a mislabeled legacy file keeps its name and gains
    // a .converted.xlsx sibling so the original is not clobbered.
    let out_path = if ext == "xls" {
        path.with_extension("xlsx")
    } else {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        path.with_file_name(format!("{stem}.converted.xlsx"))
    };
    let _ = std::fs::remove_file(&out_path);

    info!(input = %path.display(), output = %out_path.display(), "converting legacy spreadsheet");
    let mut cmd = Command::new(&cfg.bin);
    cmd.arg("--host")
        .arg(&cfg.host)
        .arg("--port")
        .arg(cfg.port.to_string())
        .arg("--protocol")
        .arg(&cfg.protocol)
        .arg("--host-location")
        .arg("remote")
        .arg(path)
        .arg(&out_path);

    let output = match tokio::time::timeout(cfg.timeout, cmd.output()).await {
        Ok(result) => result.map_err(|e| DiffError::Convert(e.to_string()))?,
        Err(_) => return Err(DiffError::ConvertTimeout(cfg.timeout.as_secs())),
    };
    if !output.status.success() {
        let mut msg = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if msg.is_empty() {
            msg = String::from_utf8_lossy(&output.stdout).trim().to_string();
        }
        if msg.is_empty() {
            msg = output.status.to_string();
        }
        return Err(DiffError::Convert(msg));
    }
    if !out_path.exists() {
        return Err(DiffError::Convert("转换后输出文件不存在".to_string()));
    }
    if !cfg.keep_original {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "failed to remove original after conversion");
        }
    }
    Ok(out_path)
}
