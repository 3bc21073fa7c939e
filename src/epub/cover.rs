//! Generated cover art: a PNG with the title and author in a built-in 5×7 bitmap font.

use std::io::Cursor;

use image::{ImageFormat, Rgb, RgbImage};

use super::EpubError;

pub const DEFAULT_WIDTH: u32 = 600;
pub const DEFAULT_HEIGHT: u32 = 900;
const MIN_SIDE: u32 = 64;

const BACKGROUND: Rgb<u8> = Rgb([0x1a, 0x1a, 0x2e]);
const BAND: Rgb<u8> = Rgb([0x16, 0x21, 0x3e]);
const ACCENT: Rgb<u8> = Rgb([0xe9, 0x45, 0x60]);
const TITLE: Rgb<u8> = Rgb([0xff, 0xff, 0xff]);
const AUTHOR: Rgb<u8> = Rgb([0xaa, 0xaa, 0xaa]);

const GLYPH_W: u32 = 5;
const GLYPH_H: u32 = 7;
/// Advance per character and per line, in font pixels.
const CELL_W: u32 = GLYPH_W + 1;
const LINE_H: u32 = GLYPH_H + 3;

/// Render a cover and return the PNG bytes. Pure: no network or disk.
pub fn generate_cover(title: &str, author: &str, width: u32, height: u32) -> Result<Vec<u8>, EpubError> {
    if width < MIN_SIDE || height < MIN_SIDE {
        return Err(EpubError::CoverSize { width, height });
    }
    let mut img = RgbImage::from_pixel(width, height, BACKGROUND);

    let margin = (width / 15).max(4);
    let band_top = height / 3;
    let band_bottom = height * 2 / 3;
    fill_rect(&mut img, 0, band_top, width, band_bottom - band_top, BAND);

    let line = (height / 150).max(2);
    let accent_w = width - 2 * margin;
    fill_rect(&mut img, margin, band_top.saturating_sub(line), accent_w, line, ACCENT);
    fill_rect(&mut img, margin, band_bottom, accent_w, line, ACCENT);

    let title_scale = (width / 150).max(1);
    let max_chars = (accent_w / (CELL_W * title_scale)).max(1) as usize;
    let max_lines = ((band_bottom - band_top) / (LINE_H * title_scale)).max(1) as usize;
    let lines = fit_lines(wrap(&title.to_uppercase(), max_chars), max_lines, max_chars);
    let block_h = lines.len() as u32 * LINE_H * title_scale;
    let mut y = band_top + (band_bottom - band_top).saturating_sub(block_h) / 2;
    for text in &lines {
        draw_centered(&mut img, text, y, title_scale, TITLE);
        y += LINE_H * title_scale;
    }

    let author = author.trim();
    if !author.is_empty() {
        let scale = (width / 240).max(1);
        let max_chars = (accent_w / (CELL_W * scale)).max(1) as usize;
        let byline = truncate(&format!("BY {}", author.to_uppercase()), max_chars);
        draw_centered(&mut img, &byline, band_bottom + line + margin, scale, AUTHOR);
    }

    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(png)
}

/// Greedy word wrap; words longer than a line are split.
fn wrap(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let chars: Vec<char> = word.chars().collect();
        for piece in chars.chunks(max_chars) {
            let piece: String = piece.iter().collect();
            let needed = if current.is_empty() {
                piece.chars().count()
            } else {
                current.chars().count() + 1 + piece.chars().count()
            };
            if needed > max_chars && !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&piece);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn fit_lines(mut lines: Vec<String>, max_lines: usize, max_chars: usize) -> Vec<String> {
    if lines.len() > max_lines {
        lines.truncate(max_lines);
        if let Some(last) = lines.last_mut() {
            let kept: String = last.chars().take(max_chars.saturating_sub(3)).collect();
            *last = format!("{}...", kept.trim_end());
        }
    }
    lines
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", kept.trim_end())
}

fn fill_rect(img: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    let x_end = (x + w).min(img.width());
    let y_end = (y + h).min(img.height());
    for py in y..y_end {
        for px in x..x_end {
            img.put_pixel(px, py, color);
        }
    }
}

fn draw_centered(img: &mut RgbImage, text: &str, y: u32, scale: u32, color: Rgb<u8>) {
    let text_w = (text.chars().count() as u32 * CELL_W).saturating_sub(1) * scale;
    let x = img.width().saturating_sub(text_w) / 2;
    for (i, c) in text.chars().enumerate() {
        let gx = x + i as u32 * CELL_W * scale;
        for (row, &bits) in glyph(c).iter().enumerate() {
            for col in 0..GLYPH_W {
                if bits >> (GLYPH_W - 1 - col) & 1 == 1 {
                    fill_rect(img, gx + col * scale, y + row as u32 * scale, scale, scale, color);
                }
            }
        }
    }
}

/// Rows top to bottom, most significant of the low five bits is the leftmost column.
fn glyph(c: char) -> [u8; 7] {
    match c {
        ' ' => [0; 7],
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '.' => [0, 0, 0, 0, 0, 0b01100, 0b01100],
        ',' => [0, 0, 0, 0, 0b01100, 0b00100, 0b01000],
        '!' => [0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0, 0b00100],
        '?' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0, 0b00100],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        ':' => [0, 0b01100, 0b01100, 0, 0b01100, 0b01100, 0],
        '\'' | '\u{2019}' => [0b00100, 0b00100, 0b01000, 0, 0, 0, 0],
        '"' => [0b01010, 0b01010, 0, 0, 0, 0, 0],
        '&' => [0b01100, 0b10010, 0b10100, 0b01000, 0b10101, 0b10010, 0b01101],
        '(' => [0b00010, 0b00100, 0b01000, 0b01000, 0b01000, 0b00100, 0b00010],
        ')' => [0b01000, 0b00100, 0b00010, 0b00010, 0b00010, 0b00100, 0b01000],
        '/' => [0, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0],
        _ => [0b11111, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11111],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_png_of_requested_size() -> Result<(), EpubError> {
        let png = generate_cover("Mother of Learning", "nobody103", DEFAULT_WIDTH, DEFAULT_HEIGHT)?;
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
        let img = image::load_from_memory(&png)?.to_rgb8();
        assert_eq!(img.dimensions(), (DEFAULT_WIDTH, DEFAULT_HEIGHT));
        assert_eq!(*img.get_pixel(0, 0), BACKGROUND);
        assert_eq!(*img.get_pixel(0, DEFAULT_HEIGHT / 2), BAND);
        assert_eq!(*img.get_pixel(DEFAULT_WIDTH / 2, DEFAULT_HEIGHT * 2 / 3), ACCENT);
        assert!(img.pixels().any(|p| *p == TITLE));
        assert!(img.pixels().any(|p| *p == AUTHOR));
        Ok(())
    }

    #[test]
    fn rejects_degenerate_sizes() {
        assert!(matches!(
            generate_cover("T", "A", 10, 900),
            Err(EpubError::CoverSize { width: 10, height: 900 })
        ));
    }

    #[test]
    fn wraps_on_words_and_splits_long_ones() {
        assert_eq!(wrap("THE WANDERING INN", 10), vec!["THE", "WANDERING", "INN"]);
        assert_eq!(wrap("A B C", 10), vec!["A B C"]);
        assert_eq!(wrap("ABCDEFGHIJKL", 5), vec!["ABCDE", "FGHIJ", "KL"]);
    }

    #[test]
    fn overflowing_titles_are_ellipsised() {
        let lines = fit_lines(wrap("ONE TWO THREE FOUR", 5), 2, 5);
        assert_eq!(lines, vec!["ONE", "TW..."]);
        assert_eq!(truncate("BY SOMEBODY", 6), "BY...");
    }
}
