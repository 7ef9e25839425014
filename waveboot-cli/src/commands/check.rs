//! Offline HEX file validation and frame listing.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;
use waveboot::{Frame, HexFile, HexRecord, HexSummary};

use crate::{Cli, CliError};

fn load(hex: &Path) -> Result<HexFile> {
    let image =
        HexFile::from_file(hex).with_context(|| format!("Failed to read {}", hex.display()))?;
    if image.is_empty() {
        return Err(CliError::Failed(format!("{} contains no HEX records", hex.display())).into());
    }
    Ok(image)
}

/// Turn a library rejection into a failure naming the 1-based line.
fn rejection(hex: &Path, err: &waveboot::Error) -> anyhow::Error {
    match err {
        waveboot::Error::LineRejected { index, reason } => CliError::Failed(format!(
            "{}: record {} rejected: {reason}",
            hex.display(),
            index + 1
        ))
        .into(),
        other => CliError::Failed(format!("{}: {other}", hex.display())).into(),
    }
}

fn summary_json(summary: &HexSummary) -> serde_json::Value {
    let address_range = summary
        .address_range
        .map(|(lo, hi)| serde_json::json!({ "start": lo, "end": hi }));
    serde_json::json!({
        "ok": true,
        "data": {
            "records": summary.records,
            "data_records": summary.data_records,
            "data_bytes": summary.data_bytes,
            "address_range": address_range,
            "has_eof": summary.has_eof,
        }
    })
}

/// Frames in send order; the first bad record aborts with its index.
fn encode_frames(image: &HexFile) -> waveboot::Result<Vec<Frame>> {
    image
        .lines()
        .iter()
        .enumerate()
        .map(|(index, line)| {
            let record = HexRecord::parse(line)
                .map_err(|reason| waveboot::Error::LineRejected { index, reason })?;
            Frame::encode_line(record.payload())
                .map_err(|reason| waveboot::Error::LineRejected { index, reason })
        })
        .collect()
}

/// Validate every record of a HEX file.
pub(crate) fn cmd_check(cli: &Cli, hex: &Path, json: bool) -> Result<()> {
    let image = load(hex)?;
    let summary = image.validate().map_err(|e| rejection(hex, &e))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary_json(&summary))?);
        return Ok(());
    }

    if cli.quiet {
        return Ok(());
    }

    eprintln!(
        "{} {} is valid",
        style("✓").green(),
        style(hex.display()).yellow()
    );
    eprintln!(
        "    {} {} records, {} data records, {} data bytes",
        style("•").dim(),
        summary.records,
        summary.data_records,
        summary.data_bytes
    );
    if let Some((lo, hi)) = summary.address_range {
        eprintln!(
            "    {} address range 0x{lo:08X}..=0x{hi:08X}",
            style("•").dim()
        );
    }
    if !summary.has_eof {
        eprintln!(
            "{} no end-of-file record; the bootloader may keep waiting after the last line",
            style("⚠").yellow()
        );
    }

    Ok(())
}

/// Print the frame of every record as a C initializer, one per line.
pub(crate) fn cmd_encode(hex: &Path) -> Result<()> {
    let image = load(hex)?;
    let frames = encode_frames(&image).map_err(|e| rejection(hex, &e))?;
    for frame in &frames {
        println!("{}", frame.to_c_array());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATA_LINE: &str = ":10000000214501368C1245F0000108100000000067";
    const EOF_LINE: &str = ":00000001FF";

    #[test]
    fn test_summary_json_shape() {
        let image = HexFile::from_lines([DATA_LINE, EOF_LINE]);
        let value = summary_json(&image.validate().unwrap());
        assert_eq!(value["ok"], true);
        assert_eq!(value["data"]["records"], 2);
        assert_eq!(value["data"]["data_bytes"], 16);
        assert_eq!(value["data"]["address_range"]["start"], 0);
        assert_eq!(value["data"]["address_range"]["end"], 15);
        assert_eq!(value["data"]["has_eof"], true);
    }

    #[test]
    fn test_summary_json_without_data() {
        let image = HexFile::from_lines([EOF_LINE]);
        let value = summary_json(&image.validate().unwrap());
        assert!(value["data"]["address_range"].is_null());
    }

    #[test]
    fn test_encode_frames_in_order() {
        let image = HexFile::from_lines([DATA_LINE, EOF_LINE]);
        let frames = encode_frames(&image).unwrap();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].to_c_array().starts_with("{ 0x10, 0x00, 0x00, 0x00, 0x21"));
        assert!(frames[1].to_c_array().starts_with("{ 0x00, 0x00, 0x00, 0x01, 0xff, 0x00"));
    }

    #[test]
    fn test_encode_frames_reports_bad_record() {
        let image = HexFile::from_lines([EOF_LINE, ":00000001FE"]);
        let err = encode_frames(&image).unwrap_err();
        assert_eq!(err.line_index(), Some(1));

        let message = rejection(Path::new("app.hex"), &err).to_string();
        assert!(message.contains("record 2"));
        assert!(message.contains("app.hex"));
    }

    #[test]
    fn test_load_empty_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.hex");
        std::fs::write(&path, "\n\n").unwrap();
        let err = load(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Failed(_))
        ));
    }
}
