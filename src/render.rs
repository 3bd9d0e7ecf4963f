//! QR rendering for pairing challenges.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use image::{ImageFormat, Luma};
use qrcode::render::unicode;
use qrcode::QrCode;
use qrlink_core::error::PairError;
use std::io::Cursor;

fn encode(data: &str) -> Result<QrCode, PairError> {
    QrCode::new(data.as_bytes()).map_err(|e| PairError::Render(format!("QR encode failed: {e}")))
}

/// Render `data` as a PNG QR code at least `size` pixels wide.
pub fn generate_qr_image(data: &str, size: u32) -> Result<Vec<u8>, PairError> {
    let image = encode(data)?
        .render::<Luma<u8>>()
        .min_dimensions(size, size)
        .build();
    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| PairError::Render(format!("PNG encode failed: {e}")))?;
    Ok(png)
}

/// Render a challenge token as a `data:` URI for an `<img>` tag.
pub fn render_challenge(token: &str, size: u32) -> Result<String, PairError> {
    let png = generate_qr_image(token, size)?;
    Ok(format!("data:image/png;base64,{}", BASE64.encode(png)))
}

/// Render a challenge token with unicode half blocks for a terminal.
pub fn generate_qr_terminal(token: &str) -> Result<String, PairError> {
    Ok(encode(token)?
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}
