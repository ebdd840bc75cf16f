//! Page image encoding for vision requests.
//!
//! PNG keeps digits and decimal commas crisp; JPEG artefacts turn "0,85"
//! into "0.65" often enough to matter for lab values. `detail: "high"` asks
//! the model for full-resolution tiles so small reference ranges stay legible.

use crate::error::IngestError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rendered page as a base64 PNG attachment.
pub fn encode_page(page_num: usize, img: &DynamicImage) -> Result<ImageData, IngestError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| IngestError::Analysis(format!("cannot encode page {page_num}: {e}")))?;

    let b64 = STANDARD.encode(&buf);
    debug!(page = page_num, bytes = b64.len(), "page encoded");

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}
