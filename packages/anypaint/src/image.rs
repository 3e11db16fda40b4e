//! CPU-side images exchanged with the engine.

use kurbo::Rect;
use peniko::Color;

/// 32-bit premultiplied BGRA image, tightly packed (`stride == width * 4`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BgraImage {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl BgraImage {
    /// Fully transparent image.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    /// Wraps premultiplied BGRA bytes with the given row pitch, dropping any
    /// row padding.
    pub fn from_bgra_premultiplied(width: u32, height: u32, pitch: usize, bytes: &[u8]) -> Option<Self> {
        let row = width as usize * 4;
        if pitch < row || bytes.len() < pitch * height.saturating_sub(1) as usize + row {
            return None;
        }
        let mut data = Vec::with_capacity(row * height as usize);
        for y in 0..height as usize {
            data.extend_from_slice(&bytes[y * pitch..y * pitch + row]);
        }
        Some(Self { width, height, data })
    }

    /// Converts straight-alpha RGBA (any `image` source) to premultiplied BGRA.
    pub fn from_image(image: &image::DynamicImage) -> Self {
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        let mut data = rgba.into_raw();
        for px in data.chunks_exact_mut(4) {
            let a = px[3] as u16;
            let (r, g, b) = (px[0] as u16, px[1] as u16, px[2] as u16);
            px[0] = ((b * a + 127) / 255) as u8;
            px[1] = ((g * a + 127) / 255) as u8;
            px[2] = ((r * a + 127) / 255) as u8;
        }
        Self { width, height, data }
    }

    /// Straight-alpha RGBA copy.
    pub fn to_rgba_image(&self) -> image::RgbaImage {
        let mut out = Vec::with_capacity(self.data.len());
        for px in self.data.chunks_exact(4) {
            let [r, g, b, a] = unpremultiply([px[2], px[1], px[0], px[3]]);
            out.extend_from_slice(&[r, g, b, a]);
        }
        image::RgbaImage::from_raw(self.width, self.height, out)
            .unwrap_or_else(|| image::RgbaImage::new(0, 0))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pitch(&self) -> usize {
        self.width as usize * 4
    }

    pub fn is_null(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Premultiplied `[b, g, r, a]` at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        Some([self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]])
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, bgra: [u8; 4]) {
        if x < self.width && y < self.height {
            let i = (y as usize * self.width as usize + x as usize) * 4;
            self.data[i..i + 4].copy_from_slice(&bgra);
        }
    }

    /// Straight-alpha color at `(x, y)`.
    pub fn color_at(&self, x: u32, y: u32) -> Option<Color> {
        self.pixel(x, y).map(|[b, g, r, a]| {
            let [r, g, b, a] = unpremultiply([r, g, b, a]);
            Color::from_rgba8(r, g, b, a)
        })
    }

    /// Copy of the pixels inside `rect`, clamped to the image. An empty
    /// `rect` returns the whole image.
    pub fn sub_image(&self, rect: Rect) -> BgraImage {
        if rect.area() <= 0.0 {
            return self.clone();
        }
        let x0 = rect.x0.max(0.0).floor() as u32;
        let y0 = rect.y0.max(0.0).floor() as u32;
        let x1 = (rect.x1.ceil().max(0.0) as u32).min(self.width);
        let y1 = (rect.y1.ceil().max(0.0) as u32).min(self.height);
        if x1 <= x0 || y1 <= y0 {
            return BgraImage::default();
        }
        let (w, h) = (x1 - x0, y1 - y0);
        let mut out = BgraImage::new(w, h);
        let row = w as usize * 4;
        for y in 0..h as usize {
            let src = ((y0 as usize + y) * self.width as usize + x0 as usize) * 4;
            out.data[y * row..(y + 1) * row].copy_from_slice(&self.data[src..src + row]);
        }
        out
    }
}

/// 1-bit image used as a stencil: set bits take the foreground color.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonoImage {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl MonoImage {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bits: vec![false; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn set(&mut self, x: u32, y: u32, on: bool) {
        if x < self.width && y < self.height {
            self.bits[y as usize * self.width as usize + x as usize] = on;
        }
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height && self.bits[y as usize * self.width as usize + x as usize]
    }

    /// Expands to BGRA: foreground where set, transparent elsewhere.
    pub fn to_bgra(&self, foreground: Color) -> BgraImage {
        let fg = premultiplied_bgra(foreground);
        let mut out = BgraImage::new(self.width, self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                if self.get(x, y) {
                    out.set_pixel(x, y, fg);
                }
            }
        }
        out
    }
}

/// Color as premultiplied `[b, g, r, a]` bytes.
pub fn premultiplied_bgra(color: Color) -> [u8; 4] {
    let [r, g, b, a] = color.components;
    let a = a.clamp(0.0, 1.0);
    let q = |v: f32| (v.clamp(0.0, 1.0) * a * 255.0).round() as u8;
    [q(b), q(g), q(r), (a * 255.0).round() as u8]
}

pub(crate) fn unpremultiply([r, g, b, a]: [u8; 4]) -> [u8; 4] {
    if a == 0 {
        return [0, 0, 0, 0];
    }
    if a == 255 {
        return [r, g, b, a];
    }
    let a16 = a as u16;
    let un = |v: u8| (((v as u16) * 255 + a16 / 2) / a16).min(255) as u8;
    [un(r), un(g), un(b), a]
}
