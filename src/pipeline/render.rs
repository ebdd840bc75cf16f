//! PDF rasterisation for vision mode.
//!
//! pdfium is CPU-bound and not async-safe, so rendering runs on
//! `spawn_blocking`. Pages are rendered at the configured DPI, with both
//! edges capped by `max_rendered_pixels`.

use crate::error::IngestError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use tracing::{debug, info};

/// Rasterise every page of an in-memory PDF, in page order.
pub async fn render_pages(
    pdf: &[u8],
    password: Option<&str>,
    dpi: u32,
    max_pixels: u32,
) -> Result<Vec<DynamicImage>, IngestError> {
    let bytes = pdf.to_vec();
    let password = password.map(str::to_string);

    tokio::task::spawn_blocking(move || render_blocking(&bytes, password.as_deref(), dpi, max_pixels))
        .await
        .map_err(|e| IngestError::Internal(format!("render task panicked: {e}")))?
}

fn render_blocking(
    pdf: &[u8],
    password: Option<&str>,
    dpi: u32,
    max_pixels: u32,
) -> Result<Vec<DynamicImage>, IngestError> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| IngestError::Analysis(format!("pdfium library unavailable: {e:?}")))?;
    let pdfium = Pdfium::new(bindings);
    let document = pdfium
        .load_pdf_from_byte_slice(pdf, password)
        .map_err(|e| open_error(&format!("{e:?}"), password.is_some()))?;

    let pages = document.pages();
    info!(pages = pages.len(), "PDF loaded for rendering");

    let mut images = Vec::with_capacity(pages.len() as usize);
    for (idx, page) in pages.iter().enumerate() {
        let width = target_width(page.width().to_inches(), dpi, max_pixels);
        let render_config = PdfRenderConfig::new()
            .set_target_width(width)
            .set_maximum_height(max_pixels as i32);
        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            IngestError::Analysis(format!("cannot render page {}: {e:?}", idx + 1))
        })?;
        let image = bitmap.as_image();
        debug!(page = idx + 1, width = image.width(), height = image.height(), "page rendered");
        images.push(image);
    }
    Ok(images)
}

/// Pixel width for a page `width_in` inches wide, never above `max_pixels`.
fn target_width(width_in: f32, dpi: u32, max_pixels: u32) -> i32 {
    let px = (width_in * dpi as f32).round() as u32;
    px.clamp(1, max_pixels) as i32
}

/// Map a pdfium open failure onto the pipeline taxonomy.
fn open_error(detail: &str, had_password: bool) -> IngestError {
    if detail.to_lowercase().contains("password") {
        if had_password {
            IngestError::Decryption(format!("pdfium rejected the password: {detail}"))
        } else {
            IngestError::PasswordRequired
        }
    } else {
        IngestError::Analysis(format!("cannot open PDF: {detail}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_errors_split_on_whether_one_was_given() {
        let detail = "PdfiumLibraryInternalError(PasswordError)";
        assert!(open_error(detail, false).is_password_required());
        assert!(matches!(open_error(detail, true), IngestError::Decryption(_)));
    }

    #[test]
    fn width_follows_dpi_up_to_the_cap() {
        // US Letter is 8.5 inches wide.
        assert_eq!(target_width(8.5, 150, 2000), 1275);
        assert_eq!(target_width(8.5, 400, 2000), 2000);
        assert_eq!(target_width(0.0, 150, 2000), 1);
    }

    #[test]
    fn other_open_errors_are_analysis_failures() {
        let err = open_error("PdfiumLibraryInternalError(FormatError)", false);
        assert!(matches!(err, IngestError::Analysis(_)));
    }
}
