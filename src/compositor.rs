//! Signature compositing
//!
//! Turns a hand-drawn signature bitmap into the image stored for a signer:
//!
//! ```text
//! +---------------------------+
//! | Alice Martin,             |   caption header, top-left
//! | Fait le 15/03/2024        |
//! |      ~~~~~~~~~~~~~~       |   trimmed signature, bottom-centered
//! |     ~~~~ signature ~~     |
//! +---------------------------+
//! ```
//!
//! Canvas is `max(header_w, signature_w) x (header_h + signature_h)`,
//! transparent everywhere nothing is drawn, encoded as PNG.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, Utc};
use image::{imageops, ImageFormat, Rgba, RgbaImage};
use rusttype::{point, Font, Scale};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{EngineError, Result};

/// Caption layout parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionStyle {
    /// Font size in pixels
    #[serde(default = "default_font_size")]
    pub font_size: f32,

    /// Distance between two baselines in pixels
    #[serde(default = "default_line_height")]
    pub line_height: u32,

    /// Transparent border around the text in pixels
    #[serde(default = "default_margin")]
    pub margin: u32,

    /// chrono format string for the signing date
    #[serde(default = "default_date_format")]
    pub date_format: String,
}

fn default_font_size() -> f32 { 24.0 }
fn default_line_height() -> u32 { 30 }
fn default_margin() -> u32 { 5 }
fn default_date_format() -> String { "%d/%m/%Y".to_string() }

impl Default for CaptionStyle {
    fn default() -> Self {
        Self {
            font_size: default_font_size(),
            line_height: default_line_height(),
            margin: default_margin(),
            date_format: default_date_format(),
        }
    }
}

/// The two caption lines for a signer and a signing day
pub fn caption_lines(display_name: &str, signed_on: NaiveDate, date_format: &str) -> Vec<String> {
    vec![
        format!("{},", display_name),
        format!("Fait le {}", signed_on.format(date_format)),
    ]
}

/// Renders caption lines to a transparent image exactly as wide as the text.
pub trait CaptionRenderer: Send + Sync {
    fn render(&self, lines: &[String]) -> Result<RgbaImage>;
}

/// Caption renderer backed by a TrueType/OpenType font
pub struct FontCaptionRenderer {
    font: Font<'static>,
    style: CaptionStyle,
}

const TEXT_COLOR: [u8; 3] = [0, 0, 0];

impl FontCaptionRenderer {
    pub fn from_bytes(bytes: Vec<u8>, style: CaptionStyle) -> Result<Self> {
        let font = Font::try_from_vec(bytes)
            .ok_or_else(|| EngineError::Config("font data is not a valid TrueType/OpenType font".into()))?;
        Ok(Self { font, style })
    }

    pub fn from_file(path: &Path, style: CaptionStyle) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| EngineError::Config(format!("cannot read font {}: {}", path.display(), e)))?;
        Self::from_bytes(bytes, style)
    }

    fn scale(&self) -> Scale {
        Scale::uniform(self.style.font_size)
    }

    /// Advance width of one line in pixels
    fn line_width(&self, line: &str) -> f32 {
        let scale = self.scale();
        self.font
            .layout(line, scale, point(0.0, 0.0))
            .map(|g| g.position().x + g.unpositioned().h_metrics().advance_width)
            .fold(0.0, f32::max)
    }

    /// Header size for the given lines: text width plus margins, one line height per line
    pub fn measure(&self, lines: &[String]) -> (u32, u32) {
        let text_width = lines.iter().map(|l| self.line_width(l)).fold(0.0, f32::max);
        let margin = self.style.margin;
        let width = text_width.ceil() as u32 + 2 * margin;
        let height = self.style.line_height * lines.len() as u32 + 2 * margin;
        (width.max(1), height.max(1))
    }
}

impl CaptionRenderer for FontCaptionRenderer {
    fn render(&self, lines: &[String]) -> Result<RgbaImage> {
        let (width, height) = self.measure(lines);
        let mut header = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]));

        let scale = self.scale();
        let v_metrics = self.font.v_metrics(scale);
        let margin = self.style.margin as f32;
        // Center the glyph box vertically inside each line
        let leading = (self.style.line_height as f32 - (v_metrics.ascent - v_metrics.descent)) / 2.0;

        for (i, line) in lines.iter().enumerate() {
            let baseline = margin + i as f32 * self.style.line_height as f32 + leading + v_metrics.ascent;
            for glyph in self.font.layout(line, scale, point(margin, baseline)) {
                let Some(bb) = glyph.pixel_bounding_box() else {
                    continue;
                };
                glyph.draw(|gx, gy, coverage| {
                    let x = bb.min.x + gx as i32;
                    let y = bb.min.y + gy as i32;
                    if x < 0 || y < 0 || x >= width as i32 || y >= height as i32 {
                        return;
                    }
                    let alpha = (coverage.clamp(0.0, 1.0) * 255.0).round() as u8;
                    let px = header.get_pixel_mut(x as u32, y as u32);
                    if alpha > px[3] {
                        *px = Rgba([TEXT_COLOR[0], TEXT_COLOR[1], TEXT_COLOR[2], alpha]);
                    }
                });
            }
        }

        Ok(header)
    }
}

/// Stateless compositor; safe to share between requests.
pub struct SignatureCompositor {
    renderer: Arc<dyn CaptionRenderer>,
    date_format: String,
}

impl SignatureCompositor {
    pub fn new(renderer: Arc<dyn CaptionRenderer>, date_format: impl Into<String>) -> Self {
        Self {
            renderer,
            date_format: date_format.into(),
        }
    }

    /// Composite header and signature into a PNG.
    ///
    /// `signed_date` is shown as a calendar date in the server's local timezone.
    pub fn compose(
        &self,
        signature_bitmap: &[u8],
        display_name: &str,
        signed_date: DateTime<Utc>,
    ) -> Result<Vec<u8>> {
        let signed_on = signed_date.with_timezone(&Local).date_naive();
        self.compose_on(signature_bitmap, display_name, signed_on)
    }

    pub fn compose_on(
        &self,
        signature_bitmap: &[u8],
        display_name: &str,
        signed_on: NaiveDate,
    ) -> Result<Vec<u8>> {
        let signature = decode_signature(signature_bitmap)?;
        let signature = trim_border(&signature);

        let lines = caption_lines(display_name, signed_on, &self.date_format);
        let header = self.renderer.render(&lines)?;

        let merged = merge(&header, &signature);
        debug!(
            header = ?header.dimensions(),
            signature = ?signature.dimensions(),
            output = ?merged.dimensions(),
            "Composited signature"
        );
        encode_png(&merged)
    }
}

fn decode_signature(bytes: &[u8]) -> Result<RgbaImage> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgba8())
        .map_err(|e| {
            warn!(error = %e, len = bytes.len(), "Signature bitmap could not be decoded");
            EngineError::from(e)
        })
}

/// Stack header (top-left) over signature (bottom, horizontally centered)
/// on a transparent canvas.
pub fn merge(header: &RgbaImage, signature: &RgbaImage) -> RgbaImage {
    let (hw, hh) = header.dimensions();
    let (sw, sh) = signature.dimensions();
    let width = hw.max(sw);
    let height = hh + sh;

    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]));
    imageops::overlay(&mut canvas, header, 0, 0);
    let x = (width - sw) / 2;
    let y = height - sh;
    imageops::overlay(&mut canvas, signature, x as i64, y as i64);
    canvas
}

/// Crop the uniform border whose colour is the top-left pixel.
///
/// An image made of that colour only is returned unchanged.
pub fn trim_border(img: &RgbaImage) -> RgbaImage {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return img.clone();
    }
    let background = *img.get_pixel(0, 0);
    let is_background = |p: &Rgba<u8>| {
        // Fully transparent pixels match each other whatever their colour
        if background[3] == 0 {
            p[3] == 0
        } else {
            *p == background
        }
    };

    let mut min_x = width;
    let mut min_y = height;
    let mut max_x = 0;
    let mut max_y = 0;
    for (x, y, p) in img.enumerate_pixels() {
        if !is_background(p) {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }

    if min_x > max_x || min_y > max_y {
        return img.clone();
    }
    imageops::crop_imm(img, min_x, min_y, max_x - min_x + 1, max_y - min_y + 1).to_image()
}

pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Renders a solid block of a fixed size so geometry can be checked without a font
    struct BlockRenderer {
        width: u32,
        height: u32,
    }

    impl CaptionRenderer for BlockRenderer {
        fn render(&self, _lines: &[String]) -> Result<RgbaImage> {
            Ok(RgbaImage::from_pixel(self.width, self.height, Rgba([0, 0, 0, 255])))
        }
    }

    fn png_of(width: u32, height: u32, color: Rgba<u8>) -> Vec<u8> {
        encode_png(&RgbaImage::from_pixel(width, height, color)).unwrap()
    }

    fn compositor(width: u32, height: u32) -> SignatureCompositor {
        SignatureCompositor::new(Arc::new(BlockRenderer { width, height }), "%d/%m/%Y")
    }

    #[test]
    fn test_caption_lines() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(
            caption_lines("Alice Martin", day, "%d/%m/%Y"),
            vec!["Alice Martin,".to_string(), "Fait le 05/03/2024".to_string()]
        );
    }

    #[test]
    fn test_merge_geometry_wide_signature() {
        let header = RgbaImage::from_pixel(40, 20, Rgba([0, 0, 0, 255]));
        let signature = RgbaImage::from_pixel(100, 30, Rgba([0, 0, 255, 255]));
        let out = merge(&header, &signature);

        assert_eq!(out.dimensions(), (100, 50));
        assert_eq!(out.get_pixel(0, 0)[3], 255);
        // right of the header, above the signature
        assert_eq!(out.get_pixel(60, 10)[3], 0);
        assert_eq!(*out.get_pixel(50, 40), Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn test_merge_geometry_centers_narrow_signature() {
        let header = RgbaImage::from_pixel(100, 20, Rgba([0, 0, 0, 255]));
        let signature = RgbaImage::from_pixel(40, 10, Rgba([255, 0, 0, 255]));
        let out = merge(&header, &signature);

        assert_eq!(out.dimensions(), (100, 30));
        // signature spans x in [30, 70) on the bottom rows
        assert_eq!(out.get_pixel(29, 25)[3], 0);
        assert_eq!(*out.get_pixel(30, 25), Rgba([255, 0, 0, 255]));
        assert_eq!(*out.get_pixel(69, 29), Rgba([255, 0, 0, 255]));
        assert_eq!(out.get_pixel(70, 25)[3], 0);
    }

    #[test]
    fn test_trim_border_crops_uniform_margin() {
        let mut img = RgbaImage::from_pixel(20, 10, Rgba([255, 255, 255, 255]));
        img.put_pixel(5, 3, Rgba([0, 0, 0, 255]));
        img.put_pixel(12, 6, Rgba([0, 0, 0, 255]));
        let trimmed = trim_border(&img);
        assert_eq!(trimmed.dimensions(), (8, 4));

        let blank = RgbaImage::from_pixel(7, 7, Rgba([0, 0, 0, 0]));
        assert_eq!(trim_border(&blank).dimensions(), (7, 7));
    }

    #[test]
    fn test_compose_outputs_png_with_expected_size() {
        let mut sig = RgbaImage::from_pixel(60, 30, Rgba([0, 0, 0, 0]));
        for x in 10..50 {
            sig.put_pixel(x, 15, Rgba([0, 0, 200, 255]));
        }
        let bytes = encode_png(&sig).unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();

        let png = compositor(30, 12).compose_on(&bytes, "Alice", day).unwrap();
        let out = image::load_from_memory(&png).unwrap().to_rgba8();

        // trimmed signature is 40x1
        assert_eq!(out.dimensions(), (40, 13));
        assert_eq!(out.get_pixel(35, 5)[3], 0);
    }

    #[test]
    fn test_compose_rejects_garbage() {
        let err = compositor(10, 10)
            .compose(b"definitely not an image", "Alice", Utc::now())
            .unwrap_err();
        assert!(matches!(err, EngineError::ImageProcessing(_)));
    }

    #[test]
    fn test_transparency_outside_composited_regions() {
        let png = compositor(10, 10)
            .compose_on(&png_of(30, 5, Rgba([9, 9, 9, 255])), "A", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
            .unwrap();
        let out = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(out.dimensions(), (30, 15));
        for (x, y, p) in out.enumerate_pixels() {
            let in_header = x < 10 && y < 10;
            let in_signature = y >= 10;
            if !in_header && !in_signature {
                assert_eq!(p[3], 0, "pixel ({}, {}) should be transparent", x, y);
            }
        }
    }

    #[test]
    fn test_invalid_font_bytes() {
        assert!(matches!(
            FontCaptionRenderer::from_bytes(vec![0, 1, 2, 3], CaptionStyle::default()),
            Err(EngineError::Config(_))
        ));
    }

    const DEJAVU: &[u8] = include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data/DejaVuSans.ttf"));

    fn dejavu() -> FontCaptionRenderer {
        FontCaptionRenderer::from_bytes(DEJAVU.to_vec(), CaptionStyle::default()).unwrap()
    }

    fn two_lines() -> Vec<String> {
        caption_lines("Alice Martin", NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(), "%d/%m/%Y")
    }

    /// Sum of kerned advances, glyph by glyph
    fn advance_sum(font: &Font<'static>, size: f32, text: &str) -> f32 {
        let scale = Scale::uniform(size);
        let mut caret = 0.0f32;
        let mut last = None;
        for c in text.chars() {
            let glyph = font.glyph(c).scaled(scale);
            if let Some(prev) = last {
                caret += font.pair_kerning(scale, prev, glyph.id());
            }
            caret += glyph.h_metrics().advance_width;
            last = Some(glyph.id());
        }
        caret
    }

    #[test]
    fn test_measure_matches_glyph_advances() {
        let renderer = dejavu();
        let lines = two_lines();
        let font = Font::try_from_bytes(DEJAVU).unwrap();

        let widest = lines
            .iter()
            .map(|l| advance_sum(&font, 24.0, l))
            .fold(0.0, f32::max);
        assert!(widest > 100.0);

        let (width, height) = renderer.measure(&lines);
        assert_eq!(width, widest.ceil() as u32 + 2 * 5);
        assert_eq!(height, 2 * 30 + 2 * 5);

        let (_, one_line) = renderer.measure(&lines[..1]);
        assert_eq!(one_line, 30 + 2 * 5);
    }

    #[test]
    fn test_render_draws_black_text_inside_margins() {
        let renderer = dejavu();
        let lines = two_lines();
        let header = renderer.render(&lines).unwrap();
        assert_eq!(header.dimensions(), renderer.measure(&lines));

        let (w, h) = header.dimensions();
        for x in 0..w {
            assert_eq!(header.get_pixel(x, 0)[3], 0, "top margin at x={x}");
            assert_eq!(header.get_pixel(x, h - 1)[3], 0, "bottom margin at x={x}");
        }
        for y in 0..h {
            for x in 0..5 {
                assert_eq!(header.get_pixel(x, y)[3], 0, "left margin at ({x}, {y})");
            }
            assert_eq!(header.get_pixel(w - 1, y)[3], 0, "right margin at y={y}");
        }

        let inked: Vec<_> = header.pixels().filter(|p| p[3] > 0).collect();
        assert!(inked.len() > 100);
        assert!(inked.iter().all(|p| p[0] == 0 && p[1] == 0 && p[2] == 0));
        assert!(inked.iter().any(|p| p[3] > 200));

        // Both lines carry ink
        let row_has_ink = |y: u32| (0..w).any(|x| header.get_pixel(x, y)[3] > 0);
        assert!((5..35).any(row_has_ink));
        assert!((35..65).any(row_has_ink));
    }

    #[test]
    fn test_font_from_missing_file() {
        assert!(matches!(
            FontCaptionRenderer::from_file(Path::new("/nonexistent/font.ttf"), CaptionStyle::default()),
            Err(EngineError::Config(_))
        ));
    }
}
