//! Software [`Surface`] that composites a page and its overlays into one
//! RGBA buffer sized to the terminal viewport.

use texview_core::{Clip, PointF, RectF, RenderImage, SizeF, Surface};

const BACKGROUND: [u8; 4] = [64, 64, 64, 255];

#[derive(Clone, Copy)]
struct PixelRect {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

/// A window onto page-image space. Page pixel `(x, y)` lands on canvas pixel
/// `(x - origin.x, y - origin.y)`; anything outside is dropped.
pub struct Canvas {
    origin: PointF,
    image: RenderImage,
}

impl Canvas {
    pub fn new(size: SizeF, origin: PointF) -> Self {
        let width = size.width.round().max(1.0) as u32;
        let height = size.height.round().max(1.0) as u32;
        Self {
            origin,
            image: RenderImage::filled(width, height, BACKGROUND),
        }
    }

    pub fn origin(&self) -> PointF {
        self.origin
    }

    pub fn image(&self) -> &RenderImage {
        &self.image
    }

    pub fn into_image(self) -> RenderImage {
        self.image
    }

    fn to_pixels(&self, rect: RectF) -> Option<PixelRect> {
        let max_x = self.image.width as f64;
        let max_y = self.image.height as f64;
        let x0 = (rect.x - self.origin.x).floor().clamp(0.0, max_x);
        let y0 = (rect.y - self.origin.y).floor().clamp(0.0, max_y);
        let x1 = (rect.right() - self.origin.x).ceil().clamp(0.0, max_x);
        let y1 = (rect.bottom() - self.origin.y).ceil().clamp(0.0, max_y);
        if x1 - x0 <= 0.0 || y1 - y0 <= 0.0 {
            return None;
        }
        Some(PixelRect {
            x0: x0 as u32,
            y0: y0 as u32,
            x1: x1 as u32,
            y1: y1 as u32,
        })
    }

    fn fill_pixels(&mut self, rect: PixelRect, color: [u8; 3], alpha: f32) {
        let width = self.image.width as usize;
        for y in rect.y0..rect.y1 {
            let row_start = (y as usize) * width * 4;
            for x in rect.x0..rect.x1 {
                let idx = row_start + (x as usize) * 4;
                blend_pixel(&mut self.image.pixels[idx..idx + 4], color, alpha);
            }
        }
    }
}

impl Surface for Canvas {
    fn draw_image(&mut self, origin: PointF, image: &RenderImage, clip: Clip) {
        if image.width == 0 || image.height == 0 {
            return;
        }
        let bounds = RectF::new(origin.x, origin.y, image.width as f64, image.height as f64);
        let Some(target) = self.to_pixels(bounds) else {
            return;
        };
        // Offset of canvas pixel 0 inside the source image.
        let shift_x = (self.origin.x - origin.x).round() as i64;
        let shift_y = (self.origin.y - origin.y).round() as i64;
        let half_w = image.width as f64 / 2.0;
        let half_h = image.height as f64 / 2.0;
        let src_stride = image.width as usize * 4;
        let dst_stride = self.image.width as usize * 4;

        for y in target.y0..target.y1 {
            let src_y = y as i64 + shift_y;
            if src_y < 0 || src_y >= image.height as i64 {
                continue;
            }
            for x in target.x0..target.x1 {
                let src_x = x as i64 + shift_x;
                if src_x < 0 || src_x >= image.width as i64 {
                    continue;
                }
                if clip == Clip::Ellipse {
                    let dx = (src_x as f64 + 0.5 - half_w) / half_w;
                    let dy = (src_y as f64 + 0.5 - half_h) / half_h;
                    if dx * dx + dy * dy > 1.0 {
                        continue;
                    }
                }
                let src = src_y as usize * src_stride + src_x as usize * 4;
                let dst = y as usize * dst_stride + x as usize * 4;
                let alpha = image.pixels[src + 3];
                if alpha == u8::MAX {
                    self.image.pixels[dst..dst + 4].copy_from_slice(&image.pixels[src..src + 4]);
                } else {
                    let color = [
                        image.pixels[src],
                        image.pixels[src + 1],
                        image.pixels[src + 2],
                    ];
                    blend_pixel(
                        &mut self.image.pixels[dst..dst + 4],
                        color,
                        alpha as f32 / 255.0,
                    );
                }
            }
        }
    }

    fn fill_rect(&mut self, rect: RectF, color: [u8; 3], alpha: f32) {
        if let Some(pixels) = self.to_pixels(rect) {
            self.fill_pixels(pixels, color, alpha);
        }
    }

    fn stroke_rect(&mut self, rect: RectF, color: [u8; 3]) {
        let edges = [
            RectF::new(rect.x, rect.y, rect.width, 1.0),
            RectF::new(rect.x, rect.bottom() - 1.0, rect.width, 1.0),
            RectF::new(rect.x, rect.y, 1.0, rect.height),
            RectF::new(rect.right() - 1.0, rect.y, 1.0, rect.height),
        ];
        for edge in edges {
            self.fill_rect(edge, color, 1.0);
        }
    }
}

fn blend_pixel(pixel: &mut [u8], color: [u8; 3], alpha: f32) {
    let alpha = alpha.clamp(0.0, 1.0);
    let inv = 1.0 - alpha;
    for (channel, value) in pixel.iter_mut().zip(color) {
        *channel = ((*channel as f32 * inv) + (value as f32 * alpha))
            .round()
            .clamp(0.0, 255.0) as u8;
    }
}
