//! QR codes for the public tracking link.

use anyhow::anyhow;
use qrcode_generator::QrCodeEcc;

use crate::errors::OmsError;

/// Edge length of the downloadable PNG, in pixels.
pub const PNG_SIZE: usize = 250;

/// Light modules kept around the symbol so scanners can find it.
const QUIET_ZONE: usize = 4;

/// One byte per module, 0 for dark and 255 for light, row by row.
#[derive(Debug, Clone, PartialEq)]
pub struct GrayImage {
    pub width: usize,
    pub pixels: Vec<u8>,
}

pub fn png(text: &str, size: usize) -> Result<Vec<u8>, OmsError> {
    qrcode_generator::to_png_to_vec(text, QrCodeEcc::Medium, size)
        .map_err(|e| OmsError::Other(anyhow!("failed to render QR code: {}", e)))
}

/// The symbol as a square grayscale bitmap, quiet zone included.
pub fn gray_image(text: &str) -> Result<GrayImage, OmsError> {
    let matrix = qrcode_generator::to_matrix(text, QrCodeEcc::Medium)
        .map_err(|e| OmsError::Other(anyhow!("failed to build QR code: {}", e)))?;
    let width = matrix.len() + 2 * QUIET_ZONE;
    let mut pixels = vec![255u8; width * width];
    for (row, modules) in matrix.iter().enumerate() {
        for (col, dark) in modules.iter().enumerate() {
            if *dark {
                pixels[(row + QUIET_ZONE) * width + col + QUIET_ZONE] = 0;
            }
        }
    }
    Ok(GrayImage { width, pixels })
}
