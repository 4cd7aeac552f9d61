//! Small helpers shared by the tiny-skia based layers.

use image::{Rgba, RgbaImage};
use tiny_skia::{Color, Pixmap};

use crate::palette::hsl_to_rgb;

/// CSS-style `hsla(h, s%, l%, a)` with `s`, `l`, `a` given as fractions.
pub fn hsla(hue: f32, saturation: f32, lightness: f32, alpha: f32) -> Color {
    let [r, g, b] = hsl_to_rgb(hue, saturation.clamp(0.0, 1.0), lightness.clamp(0.0, 1.0))
        .map(|channel| channel.clamp(0.0, 1.0));
    Color::from_rgba(r, g, b, alpha.clamp(0.0, 1.0)).unwrap_or(Color::TRANSPARENT)
}

/// `#rrggbb` plus an alpha fraction.
pub fn hex(rgb: u32, alpha: f32) -> Color {
    let [_, r, g, b] = rgb.to_be_bytes();
    let mut color = Color::from_rgba8(r, g, b, 255);
    color.set_alpha(alpha.clamp(0.0, 1.0));
    color
}

/// Un-premultiplied copy of a pixmap.
pub fn to_image(pixmap: &Pixmap) -> RgbaImage {
    let width = pixmap.width();
    RgbaImage::from_fn(pixmap.width(), pixmap.height(), |x, y| {
        let px = pixmap.pixels()[(y * width + x) as usize].demultiply();
        Rgba([px.red(), px.green(), px.blue(), px.alpha()])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hsla_matches_primary_hues() {
        let red = hsla(0.0, 1.0, 0.5, 1.0);
        assert!((red.red() - 1.0).abs() < 1e-5);
        assert!(red.green().abs() < 1e-5);

        let cyan = hsla(180.0, 1.0, 0.5, 0.25);
        assert!((cyan.blue() - 1.0).abs() < 1e-5);
        assert!((cyan.alpha() - 0.25).abs() < 1e-5);
    }

    #[test]
    fn hsla_never_drops_saturated_colours() {
        for step in 0..720 {
            let hue = step as f32 * 0.5;
            for lightness in [0.45, 0.5, 0.55, 0.6, 0.7] {
                let color = hsla(hue, 1.0, lightness, 0.5);
                assert!((color.alpha() - 0.5).abs() < 1e-5, "hue {hue} lightness {lightness}");
            }
        }
    }

    #[test]
    fn hex_unpacks_channels() {
        let color = hex(0x00d1ff, 0.5);
        assert_eq!(color.to_color_u8().green(), 0xd1);
        assert!((color.alpha() - 0.5).abs() < 1e-5);
    }

    #[test]
    fn image_copy_demultiplies_alpha() {
        let mut pixmap = Pixmap::new(2, 1).unwrap();
        pixmap.fill(Color::from_rgba8(200, 100, 50, 128));
        let image = to_image(&pixmap);
        let px = image.get_pixel(1, 0).0;
        assert_eq!(px[3], 128);
        assert!((px[0] as i32 - 200).abs() <= 2);
    }
}
