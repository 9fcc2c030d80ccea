//! Product label generation.
//!
//! Two output paths share one Code 128 encoder:
//! - **Raster**: a PNG strip (barcode + human readable code + name/price)
//!   composed with the `image` crate. ASCII text uses the built-in 8×8
//!   bitmap font; Arabic product names are drawn with a TTF loaded through
//!   rusttype when a label font is configured, and are skipped with a
//!   warning otherwise.
//! - **ESC/POS**: thermal printers print the barcode natively via
//!   `EscPosBuilder::barcode_code128`; see the print worker.

use font8x8::UnicodeFonts;
use image::{GrayImage, Luma};
use rusttype::{point, Font, Scale};
use serde_json::Value;
use tracing::warn;

/// Modules of quiet zone on each side of the barcode.
const QUIET_ZONE_MODULES: u32 = 10;

/// Code 128 bar/space width patterns, indexed by symbol value 0–105.
/// Each entry is six widths alternating bar, space, bar, space, bar, space.
const CODE128_PATTERNS: [&str; 106] = [
    "212222", "222122", "222221", "121223", "121322", "131222", "122213", "122312", "132212",
    "221213", "221312", "231212", "112232", "122132", "122231", "113222", "123122", "123221",
    "223211", "221132", "221231", "213212", "223112", "312131", "311222", "321122", "321221",
    "312212", "322112", "322211", "212123", "212321", "232121", "111323", "131123", "131321",
    "112313", "132113", "132311", "211313", "231113", "231311", "112133", "112331", "132131",
    "113123", "113321", "133121", "313121", "211331", "231131", "213113", "213311", "213131",
    "311123", "311321", "331121", "312113", "312311", "332111", "314111", "221411", "431111",
    "111224", "111422", "121124", "121421", "141122", "141221", "112214", "112412", "122114",
    "122411", "142112", "142211", "241211", "221114", "413111", "241112", "134111", "111242",
    "121142", "121241", "114212", "124112", "124211", "411212", "421112", "421211", "212141",
    "214121", "412121", "111143", "111341", "131141", "114113", "114311", "411113", "411311",
    "113141", "114131", "311141", "411131", "211412", "211214", "211232",
];

/// Stop pattern (13 modules: bar widths 2,3,3,1,1,1,2).
const CODE128_STOP: &str = "2331112";

const START_B: usize = 104;

// ---------------------------------------------------------------------------
// Code 128 encoding
// ---------------------------------------------------------------------------

/// Code set B symbol values for the data characters.
fn code_b_values(data: &str) -> Result<Vec<usize>, String> {
    data.chars()
        .map(|c| {
            if (' '..='~').contains(&c) {
                Ok(c as usize - 32)
            } else {
                Err(format!("Code 128 data must be printable ASCII, got {c:?}"))
            }
        })
        .collect()
}

/// Modulo-103 check symbol for a code set B message.
pub fn code128_checksum(data: &str) -> Result<usize, String> {
    let values = code_b_values(data)?;
    let mut sum = START_B;
    for (i, v) in values.iter().enumerate() {
        sum += v * (i + 1);
    }
    Ok(sum % 103)
}

/// Encode data as a Code 128 (set B) module sequence.
///
/// Returns one bool per module, `true` for bar. The caller owns quiet zones
/// and scaling.
pub fn code128_modules(data: &str) -> Result<Vec<bool>, String> {
    if data.is_empty() {
        return Err("Barcode data is empty".into());
    }
    if data.len() > 48 {
        return Err("Barcode data is too long for a label".into());
    }

    let values = code_b_values(data)?;
    let checksum = code128_checksum(data)?;

    let mut modules = Vec::with_capacity((values.len() + 2) * 11 + 13);
    let mut push_pattern = |pattern: &str| {
        let mut bar = true;
        for w in pattern.chars() {
            let width = w.to_digit(10).unwrap_or(0);
            for _ in 0..width {
                modules.push(bar);
            }
            bar = !bar;
        }
    };

    push_pattern(CODE128_PATTERNS[START_B]);
    for v in &values {
        push_pattern(CODE128_PATTERNS[*v]);
    }
    push_pattern(CODE128_PATTERNS[checksum]);
    push_pattern(CODE128_STOP);

    Ok(modules)
}

// ---------------------------------------------------------------------------
// Label documents
// ---------------------------------------------------------------------------

/// What kind of label to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelKind {
    /// Barcode with code and name.
    Barcode,
    /// Large price with name; no barcode.
    Price,
    /// Shelf strip: name, code, price.
    Shelf,
}

impl LabelKind {
    pub fn from_str(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "price" => LabelKind::Price,
            "shelf" => LabelKind::Shelf,
            _ => LabelKind::Barcode,
        }
    }
}

/// One label to render, lifted out of a product row or an ad-hoc payload.
#[derive(Debug, Clone)]
pub struct LabelDoc {
    pub name: String,
    pub code: String,
    pub price: f64,
    pub currency: String,
    pub kind: LabelKind,
}

impl LabelDoc {
    /// Build from a loosely-typed payload. The code falls back from barcode
    /// to Shamel No; with neither present the label cannot be produced.
    pub fn from_payload(payload: &Value, kind: LabelKind) -> Result<Self, String> {
        let name = payload
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        let code = payload
            .get("barcode")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or_else(|| {
                payload
                    .get("shamelNo")
                    .or_else(|| payload.get("shamel_no"))
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
            })
            .unwrap_or_default()
            .to_string();
        if kind != LabelKind::Price && code.is_empty() {
            return Err("Product has neither barcode nor Shamel No".into());
        }
        let price = payload
            .get("salePrice")
            .or_else(|| payload.get("sale_price"))
            .or_else(|| payload.get("price"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let currency = payload
            .get("currency")
            .and_then(Value::as_str)
            .unwrap_or("JOD")
            .to_string();

        Ok(Self {
            name,
            code,
            price,
            currency,
            kind,
        })
    }
}

/// Render options shared by a batch.
#[derive(Debug, Clone)]
pub struct LabelRenderOptions {
    /// Pixel width of one barcode module.
    pub module_px: u32,
    /// Barcode height in pixels.
    pub barcode_height_px: u32,
    /// Optional TTF for non-ASCII names, loaded once per batch.
    pub font_path: Option<std::path::PathBuf>,
}

impl Default for LabelRenderOptions {
    fn default() -> Self {
        Self {
            module_px: 3,
            barcode_height_px: 90,
            font_path: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Raster rendering
// ---------------------------------------------------------------------------

const GLYPH_W: u32 = 8;

fn draw_glyph8(img: &mut GrayImage, glyph: &[u8; 8], x0: u32, y0: u32, scale: u32) {
    for (row, bits) in glyph.iter().enumerate() {
        for col in 0..8u32 {
            if bits & (1 << col) != 0 {
                for dy in 0..scale {
                    for dx in 0..scale {
                        let x = x0 + col * scale + dx;
                        let y = y0 + row as u32 * scale + dy;
                        if x < img.width() && y < img.height() {
                            img.put_pixel(x, y, Luma([0u8]));
                        }
                    }
                }
            }
        }
    }
}

/// Draw ASCII text with the 8×8 bitmap font. Non-ASCII characters are
/// skipped (the TTF path handles those).
fn draw_ascii_text(img: &mut GrayImage, text: &str, x0: u32, y0: u32, scale: u32) {
    let mut x = x0;
    for ch in text.chars() {
        if let Some(glyph) = font8x8::BASIC_FONTS.get(ch) {
            draw_glyph8(img, &glyph, x, y0, scale);
        }
        x += GLYPH_W * scale;
    }
}

fn ascii_text_width(text: &str, scale: u32) -> u32 {
    text.chars().count() as u32 * GLYPH_W * scale
}

/// Draw a line of text with a TTF font, anchored at the baseline.
fn draw_ttf_text(img: &mut GrayImage, font: &Font<'_>, text: &str, x0: u32, baseline: u32, px: f32) {
    let scale = Scale::uniform(px);
    let glyphs: Vec<_> = font
        .layout(text, scale, point(x0 as f32, baseline as f32))
        .collect();
    for glyph in glyphs {
        if let Some(bb) = glyph.pixel_bounding_box() {
            glyph.draw(|gx, gy, coverage| {
                if coverage > 0.5 {
                    let x = bb.min.x + gx as i32;
                    let y = bb.min.y + gy as i32;
                    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
                        img.put_pixel(x as u32, y as u32, Luma([0u8]));
                    }
                }
            });
        }
    }
}

fn load_label_font(opts: &LabelRenderOptions) -> Option<Font<'static>> {
    let path = opts.font_path.as_ref()?;
    match std::fs::read(path) {
        Ok(bytes) => {
            let font = Font::try_from_vec(bytes);
            if font.is_none() {
                warn!(path = %path.display(), "Label font could not be parsed");
            }
            font
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Label font not readable");
            None
        }
    }
}

/// Render one label to a grayscale PNG.
///
/// Layout (barcode kind): name line, bars, human-readable code, price line.
pub fn render_label_png(doc: &LabelDoc, opts: &LabelRenderOptions) -> Result<Vec<u8>, String> {
    let font = load_label_font(opts);
    let name_is_ascii = doc.name.is_ascii();

    let modules = if doc.kind == LabelKind::Price {
        Vec::new()
    } else {
        code128_modules(&doc.code)?
    };

    let barcode_w = modules.len() as u32 * opts.module_px;
    let quiet = QUIET_ZONE_MODULES * opts.module_px;
    let price_text = format!("{:.2} {}", doc.price, doc.currency);

    let text_scale = 2u32;
    let name_w = if name_is_ascii {
        ascii_text_width(&doc.name, text_scale)
    } else {
        // TTF names get roughly half an em per glyph; sized generously
        (doc.name.chars().count() as u32) * 14
    };
    let width = (barcode_w + quiet * 2)
        .max(name_w + 16)
        .max(ascii_text_width(&price_text, text_scale) + 16)
        .max(160);

    let name_band = 28u32;
    let code_band = if doc.kind == LabelKind::Price { 0 } else { 22 };
    let price_band = 28u32;
    let bars_band = if doc.kind == LabelKind::Price {
        0
    } else {
        opts.barcode_height_px
    };
    let height = name_band + bars_band + code_band + price_band + 12;

    let mut img = GrayImage::from_pixel(width, height, Luma([255u8]));

    // Name
    if !doc.name.is_empty() {
        if name_is_ascii {
            let x0 = (width.saturating_sub(ascii_text_width(&doc.name, text_scale))) / 2;
            draw_ascii_text(&mut img, &doc.name, x0, 6, text_scale);
        } else if let Some(ref font) = font {
            draw_ttf_text(&mut img, font, &doc.name, 8, 24, 22.0);
        } else {
            warn!(name = %doc.name, "No label font configured; skipping non-ASCII name");
        }
    }

    // Bars
    if !modules.is_empty() {
        let x0 = (width - barcode_w) / 2;
        let y0 = name_band;
        for (i, is_bar) in modules.iter().enumerate() {
            if *is_bar {
                for dx in 0..opts.module_px {
                    let x = x0 + i as u32 * opts.module_px + dx;
                    for y in y0..y0 + bars_band {
                        img.put_pixel(x, y, Luma([0u8]));
                    }
                }
            }
        }

        // Human readable code under the bars
        let code_scale = 1u32;
        let cx = (width.saturating_sub(ascii_text_width(&doc.code, code_scale + 1))) / 2;
        draw_ascii_text(&mut img, &doc.code, cx, y0 + bars_band + 4, code_scale + 1);
    }

    // Price
    if doc.kind != LabelKind::Barcode || doc.price > 0.0 {
        let py = height - price_band;
        let px0 = (width.saturating_sub(ascii_text_width(&price_text, text_scale))) / 2;
        draw_ascii_text(&mut img, &price_text, px0, py, text_scale);
    }

    let mut png = Vec::new();
    image::DynamicImage::ImageLuma8(img)
        .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|e| format!("encode label png: {e}"))?;
    Ok(png)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_matches_reference() {
        // Start B (104) + A(33)*1 + B(34)*2 + C(35)*3 = 310; 310 mod 103 = 1
        assert_eq!(code128_checksum("ABC").unwrap(), 1);
    }

    #[test]
    fn module_count_is_deterministic() {
        // (start + 3 data + check) * 11 + stop 13
        let modules = code128_modules("ABC").unwrap();
        assert_eq!(modules.len(), 5 * 11 + 13);
        // Starts with a 2-module bar (Start B pattern 211214)
        assert!(modules[0] && modules[1] && !modules[2]);
        // Ends with a 2-module bar (stop pattern tail ...112)
        let n = modules.len();
        assert!(modules[n - 1] && modules[n - 2] && !modules[n - 3]);
    }

    #[test]
    fn rejects_empty_and_non_ascii() {
        assert!(code128_modules("").is_err());
        assert!(code128_modules("كود").is_err());
    }

    #[test]
    fn each_symbol_is_eleven_modules() {
        for pattern in CODE128_PATTERNS {
            let total: u32 = pattern.chars().map(|c| c.to_digit(10).unwrap()).sum();
            assert_eq!(total, 11, "bad pattern {pattern}");
        }
        let stop: u32 = CODE128_STOP.chars().map(|c| c.to_digit(10).unwrap()).sum();
        assert_eq!(stop, 13);
    }

    #[test]
    fn doc_from_payload_falls_back_to_shamel_no() {
        let doc = LabelDoc::from_payload(
            &serde_json::json!({ "name": "Cable", "shamelNo": "SH-77", "salePrice": 3.25 }),
            LabelKind::Barcode,
        )
        .expect("doc");
        assert_eq!(doc.code, "SH-77");
        assert_eq!(doc.price, 3.25);
    }

    #[test]
    fn doc_without_any_code_is_rejected() {
        let err = LabelDoc::from_payload(
            &serde_json::json!({ "name": "Loose item", "salePrice": 1.0 }),
            LabelKind::Barcode,
        )
        .expect_err("must fail");
        assert!(err.contains("barcode"));
    }

    #[test]
    fn price_labels_need_no_code() {
        let doc = LabelDoc::from_payload(
            &serde_json::json!({ "name": "Loose item", "salePrice": 1.0 }),
            LabelKind::Price,
        )
        .expect("price label without code");
        assert_eq!(doc.kind, LabelKind::Price);
    }

    #[test]
    fn renders_decodable_png() {
        let doc = LabelDoc {
            name: "USB Cable".into(),
            code: "6291001234567".into(),
            price: 3.5,
            currency: "JOD".into(),
            kind: LabelKind::Barcode,
        };
        let png = render_label_png(&doc, &LabelRenderOptions::default()).expect("render");
        let decoded = image::load_from_memory(&png).expect("valid png");
        assert!(decoded.width() >= 160);
        assert!(decoded.height() > 100);
    }

    #[test]
    fn non_ascii_name_without_font_still_renders_barcode() {
        let doc = LabelDoc {
            name: "كابل شحن".into(),
            code: "SH-100".into(),
            price: 2.0,
            currency: "JOD".into(),
            kind: LabelKind::Barcode,
        };
        let png = render_label_png(&doc, &LabelRenderOptions::default()).expect("render");
        assert!(image::load_from_memory(&png).is_ok());
    }
}
