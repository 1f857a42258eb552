use image::{GrayImage, Luma, RgbImage};

use chrono::NaiveDate;
use rusqlite::Connection;

use consolecare::verify::{preprocess, text_contains_code, VerifyError, CODE_ALLOWLIST};
use consolecare::warranty_store;

/// The OCR allowlist must cover every character a generated warranty
/// code can contain, or no screenshot could ever verify.
#[test]
fn test_allowlist_covers_generated_codes() -> anyhow::Result<()> {
    assert_eq!(CODE_ALLOWLIST.len(), 26);
    assert!(CODE_ALLOWLIST.chars().all(|c| c.is_ascii_uppercase()));

    let conn = Connection::open_in_memory()?;
    warranty_store::init_schema(&conn)?;
    warranty_store::add_console(&conn, "GH-001", None)?;
    warranty_store::sell_console(
        &conn,
        "GH-001",
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
    )?;
    warranty_store::bind_console(&conn, "GH-001", 42)?;

    let code = warranty_store::get_console(&conn, "GH-001")?
        .unwrap()
        .warranty_code
        .unwrap();
    assert!(code.chars().all(|c| CODE_ALLOWLIST.contains(c)));
    Ok(())
}

#[test]
fn test_match_predicate() {
    // OCR tends to split codes across fragments and lines.
    assert!(text_contains_code("QWER\nTYUI", "QWERTYUI"));
    assert!(text_contains_code("order 123 qwertyui rated 5", "QWERTYUI"));
    assert!(!text_contains_code("QWFRTYUI", "QWERTYUI"));
    assert!(!text_contains_code("some text", ""));
}

#[test]
fn test_preprocess_output_is_binary() {
    let mut img = RgbImage::new(4, 4);
    for (x, y, pixel) in img.enumerate_pixels_mut() {
        let v = (x * 60 + y * 10) as u8;
        pixel.0 = [v, v, v];
    }
    let mut png = std::io::Cursor::new(Vec::new());
    img.write_to(&mut png, image::ImageFormat::Png).unwrap();

    let processed: GrayImage = preprocess(png.get_ref()).unwrap();
    assert_eq!(processed.dimensions(), (4, 4));
    assert!(processed.pixels().all(|Luma([v])| *v == 0 || *v == 255));
}

#[test]
fn test_preprocess_rejects_non_image_payload() {
    let err = preprocess(b"definitely not a png").unwrap_err();
    assert!(matches!(err, VerifyError::Decode(_)));
    assert!(err.to_string().contains("decode"));
}
