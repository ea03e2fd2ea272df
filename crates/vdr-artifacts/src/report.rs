//! Print and status report files.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;
use vdr_reconcile::{PrintReport, StatusMap};

use crate::error::ArtifactError;

pub const PRINT_REPORT_JSON: &str = "print_report.json";
pub const PRINT_REPORT_CSV: &str = "print_report.csv";

fn csv_err(path: &Path) -> impl Fn(csv::Error) -> ArtifactError + '_ {
    move |source| ArtifactError::Csv {
        path: path.display().to_string(),
        source,
    }
}

pub fn write_print_report_json(dir: &Path, report: &PrintReport) -> Result<PathBuf, ArtifactError> {
    fs::create_dir_all(dir).map_err(|e| ArtifactError::io(dir, e))?;
    let path = dir.join(PRINT_REPORT_JSON);
    let json = serde_json::to_string_pretty(report).map_err(|source| ArtifactError::Json {
        path: path.display().to_string(),
        source,
    })?;
    fs::write(&path, format!("{json}\n")).map_err(|e| ArtifactError::io(&path, e))?;
    Ok(path)
}

/// One line per document with its page counts per format, then a totals
/// line.
pub fn write_print_report_csv(dir: &Path, report: &PrintReport) -> Result<PathBuf, ArtifactError> {
    fs::create_dir_all(dir).map_err(|e| ArtifactError::io(dir, e))?;
    let path = dir.join(PRINT_REPORT_CSV);
    let err = csv_err(&path);

    let formats: BTreeSet<&String> = report
        .entries
        .iter()
        .flat_map(|e| e.pages.keys())
        .collect();

    let mut w = csv::Writer::from_path(&path).map_err(&err)?;
    let mut header = vec![
        "document".to_string(),
        "status".to_string(),
        "transmittal".to_string(),
        "bytes".to_string(),
    ];
    header.extend(formats.iter().map(|f| f.to_string()));
    w.write_record(&header).map_err(&err)?;

    for e in &report.entries {
        let mut rec = vec![
            e.key.to_string(),
            e.status.to_string(),
            e.transmittal.clone().unwrap_or_default(),
            e.bytes.to_string(),
        ];
        rec.extend(
            formats
                .iter()
                .map(|f| e.pages.get(*f).copied().unwrap_or(0).to_string()),
        );
        w.write_record(&rec).map_err(&err)?;
    }

    let mut total = vec![
        "TOTAL".to_string(),
        String::new(),
        String::new(),
        report.required_bytes.to_string(),
    ];
    total.extend(
        formats
            .iter()
            .map(|f| report.format_totals.get(*f).copied().unwrap_or(0).to_string()),
    );
    w.write_record(&total).map_err(&err)?;
    w.flush().map_err(|e| ArtifactError::io(&path, e))?;

    info!(path = %path.display(), documents = report.entries.len(), "print report written");
    drop(err);
    Ok(path)
}

/// `document,status,frontier,transmittal,remark` for every scanned row.
pub fn write_status_csv(path: &Path, statuses: &StatusMap) -> Result<(), ArtifactError> {
    let err = csv_err(path);
    let mut w = csv::Writer::from_path(path).map_err(&err)?;
    w.write_record(["document", "status", "frontier", "transmittal", "remark"])
        .map_err(&err)?;
    for (key, s) in statuses {
        let f = s.frontier.as_ref();
        w.write_record([
            key.as_str(),
            s.status.name(),
            f.map(|f| f.label.as_str()).unwrap_or(""),
            f.map(|f| f.reference.as_str()).unwrap_or(""),
            f.and_then(|f| f.remark.as_deref()).unwrap_or(""),
        ])
        .map_err(&err)?;
    }
    w.flush().map_err(|e| ArtifactError::io(path, e))?;
    Ok(())
}
