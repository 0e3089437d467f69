// Tesseract command-line adapter
//
// One `tesseract <png> stdout -l <lang> [--psm N]` process per attempt. The
// image is handed over through a temporary PNG that is removed on drop.

use image::{GrayImage, ImageFormat};
use std::ffi::OsString;
use std::io::Write;
use std::path::Path;
use std::process::Command;
use tracing::{debug, trace};

use super::TextRecognizer;
use crate::core::errors::{OcrError, OcrResult};
use crate::core::types::LayoutMode;

/// Runs the `tesseract` executable
#[derive(Debug, Clone)]
pub struct TesseractCli {
    binary: String,
}

impl TesseractCli {
    /// Check that `binary` can be started and report its version
    pub fn new(binary: impl Into<String>) -> OcrResult<Self> {
        let binary = binary.into();
        let output = Command::new(&binary)
            .arg("--version")
            .output()
            .map_err(|source| OcrError::EngineUnavailable {
                binary: binary.clone(),
                source,
            })?;

        // Older releases print the version on stderr
        let banner = if output.stdout.is_empty() {
            String::from_utf8_lossy(&output.stderr).into_owned()
        } else {
            String::from_utf8_lossy(&output.stdout).into_owned()
        };
        debug!(
            "✓ OCR engine: {}",
            banner.lines().next().unwrap_or("tesseract (unknown version)")
        );

        Ok(Self { binary })
    }
}

/// Command-line arguments for one recognition attempt
pub fn build_args(image_path: &Path, language: &str, mode: LayoutMode) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        image_path.as_os_str().to_owned(),
        "stdout".into(),
        "-l".into(),
        language.into(),
    ];
    if let Some(psm) = mode.psm() {
        args.push("--psm".into());
        args.push(psm.to_string().into());
    }
    args
}

/// Map a failed run to an error, recognizing a missing language pack
pub fn classify_failure(status: Option<i32>, stderr: &str, language: &str) -> OcrError {
    if stderr.contains("Failed loading language") || stderr.contains("couldn't load any languages") {
        return OcrError::LanguageUnavailable {
            language: language.to_string(),
        };
    }
    OcrError::EngineFailed {
        status: status.unwrap_or(-1),
        stderr: stderr.trim().to_string(),
    }
}

impl TextRecognizer for TesseractCli {
    fn recognize(&self, image: &GrayImage, language: &str, mode: LayoutMode) -> OcrResult<String> {
        let mut tmp = tempfile::Builder::new()
            .prefix("bubble_ocr_")
            .suffix(".png")
            .tempfile()?;
        image.write_to(&mut tmp, ImageFormat::Png)?;
        tmp.flush()?;

        let args = build_args(tmp.path(), language, mode);
        trace!("Running {} {:?}", self.binary, args);

        let output = Command::new(&self.binary)
            .args(&args)
            .output()
            .map_err(|source| OcrError::EngineUnavailable {
                binary: self.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(output.status.code(), &stderr, language));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mode_has_no_psm() {
        let args = build_args(Path::new("/tmp/crop.png"), "jpn", LayoutMode::Default);
        assert_eq!(args, vec!["/tmp/crop.png", "stdout", "-l", "jpn"]);
    }

    #[test]
    fn test_fallback_modes_pass_psm() {
        let args = build_args(Path::new("crop.png"), "kor", LayoutMode::SingleColumn);
        assert_eq!(args, vec!["crop.png", "stdout", "-l", "kor", "--psm", "4"]);

        let args = build_args(Path::new("crop.png"), "chi_sim", LayoutMode::SingleBlock);
        assert_eq!(&args[4..], ["--psm", "6"]);
    }

    #[test]
    fn test_missing_language_pack_is_recognized() {
        let stderr = "Error opening data file /usr/share/tessdata/kor.traineddata\n\
                      Failed loading language 'kor'\n\
                      Tesseract couldn't load any languages!";
        match classify_failure(Some(1), stderr, "kor") {
            OcrError::LanguageUnavailable { language } => assert_eq!(language, "kor"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_other_failures_keep_status_and_stderr() {
        match classify_failure(None, "  Segmentation fault \n", "jpn") {
            OcrError::EngineFailed { status, stderr } => {
                assert_eq!(status, -1);
                assert_eq!(stderr, "Segmentation fault");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_binary_is_engine_unavailable() {
        let err = TesseractCli::new("definitely-not-a-tesseract-binary").unwrap_err();
        assert!(matches!(err, OcrError::EngineUnavailable { .. }));
    }
}
