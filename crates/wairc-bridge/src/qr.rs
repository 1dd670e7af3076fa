//! Login code to PNG, ready to hand to the file host.

use image::{codecs::png::PngEncoder, ExtendedColorType, GrayImage, ImageEncoder, Luma};
use qrcode::{Color, EcLevel, QrCode};
use wairc_core::error::WaircError;

/// Modules of white border around the symbol, as the QR standard asks.
const MARGIN: usize = 4;

/// Smallest edge in pixels; phone cameras struggle with tiny codes.
const MIN_EDGE: usize = 256;

const DARK: Luma<u8> = Luma([0]);
const LIGHT: Luma<u8> = Luma([255]);

/// Render a WhatsApp login code as PNG bytes.
///
/// Every module is scaled to a whole number of pixels so the image is at
/// least [`MIN_EDGE`] wide.
pub fn generate_qr_image(login_code: &str) -> Result<Vec<u8>, WaircError> {
    let code = QrCode::with_error_correction_level(login_code.as_bytes(), EcLevel::L)
        .map_err(|e| WaircError::Bridge(format!("login code does not fit a QR code: {e}")))?;

    let width = code.width();
    let span = width + 2 * MARGIN;
    let scale = MIN_EDGE.div_ceil(span).max(1);
    let edge = (span * scale) as u32;

    let mut img = GrayImage::from_pixel(edge, edge, LIGHT);
    for (i, color) in code.to_colors().into_iter().enumerate() {
        if color != Color::Dark {
            continue;
        }
        let (row, col) = (i / width + MARGIN, i % width + MARGIN);
        for dy in 0..scale {
            for dx in 0..scale {
                img.put_pixel((col * scale + dx) as u32, (row * scale + dy) as u32, DARK);
            }
        }
    }

    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(img.as_raw(), edge, edge, ExtendedColorType::L8)
        .map_err(|e| WaircError::Bridge(format!("encoding login QR as PNG failed: {e}")))?;
    Ok(png)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_qr_is_png_with_white_margin() {
        let png = generate_qr_image("2@abcdef,ghijkl,mnopqr==").unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");

        let img = image::load_from_memory(&png).unwrap().to_luma8();
        assert_eq!(img.width(), img.height());
        assert!(img.width() >= MIN_EDGE as u32);
        assert_eq!(*img.get_pixel(0, 0), LIGHT);
        assert_eq!(*img.get_pixel(img.width() - 1, img.height() - 1), LIGHT);
        assert!(img.pixels().any(|p| *p == DARK), "symbol must be drawn");
    }

    #[test]
    fn test_oversized_login_code_is_an_error() {
        let err = generate_qr_image(&"x".repeat(5000)).unwrap_err();
        assert!(matches!(err, WaircError::Bridge(_)));
    }
}
