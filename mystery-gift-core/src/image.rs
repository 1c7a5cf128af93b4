/// RGBA color; alpha 0 is transparent.
pub type Rgba = [u8; 4];

/// Paletted image: one palette index per pixel, row-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexedImage {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
    pub palette: Vec<Rgba>,
}

impl IndexedImage {
    pub fn new(width: usize, height: usize, palette: Vec<Rgba>) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width * height],
            palette,
        }
    }

    pub fn index_at(&self, x: usize, y: usize) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get(y * self.width + x).copied()
    }

    pub fn set_index(&mut self, x: usize, y: usize, index: u8) {
        if x < self.width && y < self.height {
            self.pixels[y * self.width + x] = index;
        }
    }

    /// Color of a pixel; indices past the palette read as transparent black.
    pub fn color_at(&self, x: usize, y: usize) -> Option<Rgba> {
        let idx = self.index_at(x, y)?;
        Some(self.palette.get(idx as usize).copied().unwrap_or([0, 0, 0, 0]))
    }

    /// Expands the image to packed RGBA8 rows.
    pub fn to_rgba(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pixels.len() * 4);
        for &idx in &self.pixels {
            let c = self.palette.get(idx as usize).copied().unwrap_or([0, 0, 0, 0]);
            out.extend_from_slice(&c);
        }
        out
    }
}
