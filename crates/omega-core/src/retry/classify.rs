//! Classify downloader output lines into retry-relevant kinds.

use regex::Regex;
use std::sync::OnceLock;

/// Substring the downloader prints when the CDN rejects the request.
pub const HTTP_403_MARKER: &str = "HTTP Error 403";
/// Substring the downloader prints when a format yields no data; fixed by
/// forcing a different format.
pub const NO_DATA_BLOCKS_MARKER: &str = "Did not get any data blocks";

/// Classification of one line of downloader output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    /// Periodic `[download]  42.0% of ...` line; kept out of transcripts.
    Progress,
    /// Forbidden response, usually throttling; worth one delayed retry.
    Retryable403,
    /// Missing data blocks; worth one retry with a format override.
    RetryableNoDataBlocks,
    /// Anything else worth keeping in the transcript.
    Other,
    /// Blank line.
    None,
}

impl LineClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, LineClass::Retryable403 | LineClass::RetryableNoDataBlocks)
    }
}

fn progress_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\[download\]\s+\d{1,3}(?:\.\d+)?%").expect("progress regex is valid")
    })
}

/// Classify a single line of stdout or stderr.
pub fn classify(line: &str) -> LineClass {
    if line.contains(HTTP_403_MARKER) {
        return LineClass::Retryable403;
    }
    if line.contains(NO_DATA_BLOCKS_MARKER) {
        return LineClass::RetryableNoDataBlocks;
    }
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LineClass::None;
    }
    if progress_regex().is_match(trimmed) {
        return LineClass::Progress;
    }
    LineClass::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_403_lines_are_retryable() {
        for line in [
            "ERROR: unable to download video data: HTTP Error 403: Forbidden",
            "WARNING: HTTP Error 403: Forbidden while fetching fragment",
            "HTTP Error 403",
        ] {
            assert_eq!(classify(line), LineClass::Retryable403, "{line}");
        }
    }

    #[test]
    fn no_data_blocks_lines_are_retryable() {
        assert_eq!(
            classify("ERROR: Did not get any data blocks"),
            LineClass::RetryableNoDataBlocks
        );
        assert!(classify("ERROR: Did not get any data blocks").is_retryable());
    }

    #[test]
    fn progress_lines() {
        for line in [
            "[download]   0.0% of 10.00MiB at 120.00KiB/s ETA 01:25",
            "[download]  42.3% of 12.34MiB at  1.23MiB/s ETA 00:05",
            "[download] 100% of 12.34MiB in 00:10",
            "\r[download]  99.9% of ~3.10GiB at 5.00MiB/s ETA 00:01",
        ] {
            assert_eq!(classify(line), LineClass::Progress, "{line}");
        }
    }

    #[test]
    fn non_progress_download_lines_are_other() {
        for line in [
            "[download] Destination: Some Video-QpQY8uXW3JY.mp4",
            "[youtube] QpQY8uXW3JY: Downloading webpage",
            "[download] Some Video-QpQY8uXW3JY.mp4 has already been downloaded",
            "ERROR: Video unavailable",
        ] {
            assert_eq!(classify(line), LineClass::Other, "{line}");
            assert!(!classify(line).is_retryable());
        }
    }

    #[test]
    fn blank_lines_are_none() {
        assert_eq!(classify(""), LineClass::None);
        assert_eq!(classify("   \t"), LineClass::None);
    }

    #[test]
    fn retryable_markers_win_over_progress_shape() {
        assert_eq!(
            classify("[download]  10.0% HTTP Error 403: Forbidden"),
            LineClass::Retryable403
        );
    }
}
