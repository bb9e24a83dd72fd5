//! Shells out to poppler (`pdfinfo`, `pdftoppm`) to rasterize PDF pages, the way
//! the page-extraction path always has in this codebase.

use std::path::Path;
use std::process::Command;

use crate::error::JobError;

/// Total page count of a PDF, via `pdfinfo`.
pub fn page_count(pdf_path: &Path) -> Result<u32, JobError> {
    let output = Command::new("pdfinfo")
        .arg(pdf_path)
        .output()
        .map_err(|e| JobError::Storage(crate::error::StorageError::Backend(e.to_string())))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|rest| rest.trim().parse::<u32>().ok())
        .ok_or_else(|| {
            JobError::Storage(crate::error::StorageError::Backend(
                "pdfinfo did not report a page count".to_string(),
            ))
        })
}

/// One `pdftoppm` invocation's output range and the file-name prefix it used.
pub struct RenderBatch {
    pub first: u32,
    pub last: u32,
    pub prefix: std::path::PathBuf,
}

impl RenderBatch {
    pub fn covers(&self, page: u32) -> bool {
        page >= self.first && page <= self.last
    }

    pub fn find_page(&self, page: u32) -> Option<std::path::PathBuf> {
        for width in [2usize, 3, 4, 6] {
            let candidate = self
                .prefix
                .with_file_name(format!(
                    "{}-{:0width$}.png",
                    self.prefix.file_name()?.to_string_lossy(),
                    page,
                    width = width
                ));
            if candidate.exists() {
                return Some(candidate);
            }
        }
        None
    }
}

/// Renders pages `[start_page, end_page]` (1-indexed, inclusive) at `dpi` to PNG
/// files under `out_dir`, using two concurrent `pdftoppm` invocations splitting
/// the range in half — the "two rendering threads" of spec §4.5.
pub async fn render_pages(
    pdf_path: std::path::PathBuf,
    out_dir: std::path::PathBuf,
    start_page: u32,
    end_page: u32,
    dpi: u32,
) -> Result<Vec<RenderBatch>, JobError> {
    let mid = start_page + (end_page - start_page) / 2;
    let halves = if mid >= end_page {
        vec![(start_page, end_page)]
    } else {
        vec![(start_page, mid), (mid + 1, end_page)]
    };

    let mut handles = Vec::new();
    for (lo, hi) in halves {
        let pdf_path = pdf_path.clone();
        let out_dir = out_dir.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            render_range_blocking(&pdf_path, &out_dir, lo, hi, dpi).map(|prefix| RenderBatch {
                first: lo,
                last: hi,
                prefix,
            })
        }));
    }

    let mut batches = Vec::with_capacity(handles.len());
    for handle in handles {
        let batch = handle
            .await
            .map_err(|e| JobError::Storage(crate::error::StorageError::Backend(e.to_string())))??;
        batches.push(batch);
    }
    Ok(batches)
}

fn render_range_blocking(
    pdf_path: &Path,
    out_dir: &Path,
    first: u32,
    last: u32,
    dpi: u32,
) -> Result<std::path::PathBuf, JobError> {
    let prefix = out_dir.join(format!("batch-{first}-{last}"));
    let status = Command::new("pdftoppm")
        .arg("-png")
        .arg("-r")
        .arg(dpi.to_string())
        .arg("-f")
        .arg(first.to_string())
        .arg("-l")
        .arg(last.to_string())
        .arg(pdf_path)
        .arg(&prefix)
        .status()
        .map_err(|e| JobError::Storage(crate::error::StorageError::Backend(e.to_string())))?;

    if !status.success() {
        return Err(JobError::Storage(crate::error::StorageError::Backend(
            format!("pdftoppm exited with {status}"),
        )));
    }
    Ok(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covers_checks_inclusive_range() {
        let batch = RenderBatch {
            first: 3,
            last: 7,
            prefix: std::path::PathBuf::from("/tmp/batch-3-7"),
        };
        assert!(batch.covers(3));
        assert!(batch.covers(7));
        assert!(!batch.covers(2));
        assert!(!batch.covers(8));
    }

    #[test]
    fn find_page_matches_pdftoppms_zero_padded_width() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("batch-1-12");
        std::fs::write(prefix.with_file_name("batch-1-12-03.png"), b"x").unwrap();

        let batch = RenderBatch {
            first: 1,
            last: 12,
            prefix,
        };
        assert_eq!(
            batch.find_page(3),
            Some(dir.path().join("batch-1-12-03.png"))
        );
        assert_eq!(batch.find_page(99), None);
    }
}
