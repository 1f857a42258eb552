//! Review screenshot verification.
//!
//! The user proves their review by sending a screenshot containing
//! their warranty code (or console id). The image is preprocessed for
//! contrast and run through Tesseract with a restricted character set;
//! a failed recognition is a normal `Ok(false)`, not an error, and the
//! user is asked to retry with a cropped screenshot.

use image::GrayImage;
use leptess::{LepTess, Variable};
use log::info;

/// Which characters Tesseract is allowed to recognize. Warranty codes
/// are uppercase letters; a narrow allowlist on a thresholded image
/// beats full-page recognition for short codes.
pub const CODE_ALLOWLIST: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Verification pipeline failures. Inconclusive OCR output is not a
/// failure.
#[derive(Debug, Clone)]
pub enum VerifyError {
    /// The payload is not a decodable image
    Decode(String),
    /// Temp file I/O around the OCR call
    Io(String),
    /// OCR engine initialization
    Initialization(String),
    /// Text extraction
    Extraction(String),
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyError::Decode(msg) => write!(f, "Image decode error: {msg}"),
            VerifyError::Io(msg) => write!(f, "I/O error: {msg}"),
            VerifyError::Initialization(msg) => write!(f, "OCR initialization error: {msg}"),
            VerifyError::Extraction(msg) => write!(f, "Text extraction error: {msg}"),
        }
    }
}

impl std::error::Error for VerifyError {}

/// Binarization threshold on the blurred grayscale image.
const THRESHOLD: u8 = 100;

/// Decode and flatten a screenshot: grayscale, light blur, hard binary
/// threshold.
pub fn preprocess(image_bytes: &[u8]) -> Result<GrayImage, VerifyError> {
    let decoded = image::load_from_memory(image_bytes)
        .map_err(|e| VerifyError::Decode(e.to_string()))?;
    let gray = decoded.to_luma8();
    let mut blurred = image::imageops::blur(&gray, 1.0);
    for pixel in blurred.pixels_mut() {
        pixel.0[0] = if pixel.0[0] > THRESHOLD { 255 } else { 0 };
    }
    Ok(blurred)
}

/// Whether `code` occurs in the recognized text, ignoring case and any
/// whitespace the recognizer introduced between fragments.
pub fn text_contains_code(recognized: &str, code: &str) -> bool {
    let haystack: String = recognized
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase();
    let needle: String = code
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase();
    !needle.is_empty() && haystack.contains(&needle)
}

fn extract_text(image: &GrayImage) -> Result<String, VerifyError> {
    let temp = tempfile::Builder::new()
        .suffix(".png")
        .tempfile()
        .map_err(|e| VerifyError::Io(e.to_string()))?;
    image
        .save_with_format(temp.path(), image::ImageFormat::Png)
        .map_err(|e| VerifyError::Io(e.to_string()))?;

    let mut tess =
        LepTess::new(None, "eng").map_err(|e| VerifyError::Initialization(e.to_string()))?;
    tess.set_variable(Variable::TesseditCharWhitelist, CODE_ALLOWLIST)
        .map_err(|e| VerifyError::Initialization(e.to_string()))?;
    tess.set_image(temp.path())
        .map_err(|e| VerifyError::Extraction(e.to_string()))?;
    tess.get_utf8_text()
        .map_err(|e| VerifyError::Extraction(e.to_string()))
}

/// Check whether `expected_code` is visible in the screenshot.
pub fn code_present(image_bytes: &[u8], expected_code: &str) -> Result<bool, VerifyError> {
    let processed = preprocess(image_bytes)?;
    let recognized = extract_text(&processed)?;
    let found = text_contains_code(&recognized, expected_code);
    info!(
        "OCR recognized {} characters, code {}",
        recognized.len(),
        if found { "found" } else { "not found" }
    );
    Ok(found)
}
