use nalgebra::Point2;

/// Borrowed 8-bit grayscale image, row-major.
#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // row-major, len = w*h
}

/// Owned 8-bit grayscale image, row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl GrayImage {
    /// Image of the given size filled with a constant value.
    pub fn filled(width: usize, height: usize, value: u8) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    pub fn view(&self) -> GrayImageView<'_> {
        GrayImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Option<u8> {
        (x < self.width && y < self.height).then(|| self.data[y * self.width + x])
    }

    #[inline]
    pub fn put(&mut self, x: usize, y: usize, value: u8) {
        if x < self.width && y < self.height {
            self.data[y * self.width + x] = value;
        }
    }

    /// Fill the axis-aligned rectangle `[x0, x1) x [y0, y1)`, clipped to the image.
    pub fn fill_rect(&mut self, x0: i64, y0: i64, x1: i64, y1: i64, value: u8) {
        let xa = x0.clamp(0, self.width as i64) as usize;
        let xb = x1.clamp(0, self.width as i64) as usize;
        let ya = y0.clamp(0, self.height as i64) as usize;
        let yb = y1.clamp(0, self.height as i64) as usize;
        for y in ya..yb {
            self.data[y * self.width + xa..y * self.width + xb].fill(value);
        }
    }

    /// Fill a convex quadrilateral given in either winding order.
    ///
    /// A pixel is painted when its center lies inside the quad.
    pub fn fill_convex_quad(&mut self, quad: &[Point2<f64>; 4], value: u8) {
        let min_x = quad.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
        let max_x = quad.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max);
        let min_y = quad.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
        let max_y = quad.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);

        let x0 = min_x.floor().max(0.0) as usize;
        let y0 = min_y.floor().max(0.0) as usize;
        let x1 = (max_x.ceil().max(0.0) as usize).min(self.width);
        let y1 = (max_y.ceil().max(0.0) as usize).min(self.height);

        for y in y0..y1 {
            for x in x0..x1 {
                let p = Point2::new(x as f64 + 0.5, y as f64 + 0.5);
                if point_in_convex_quad(quad, p) {
                    self.data[y * self.width + x] = value;
                }
            }
        }
    }
}

fn point_in_convex_quad(quad: &[Point2<f64>; 4], p: Point2<f64>) -> bool {
    let mut sign = 0.0f64;
    for i in 0..4 {
        let a = quad[i];
        let b = quad[(i + 1) % 4];
        let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
        if cross.abs() < 1e-12 {
            continue;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    true
}

#[inline]
fn get_gray(src: &GrayImageView<'_>, x: i32, y: i32) -> u8 {
    if x < 0 || y < 0 || x >= src.width as i32 || y >= src.height as i32 {
        return 0;
    }
    src.data[y as usize * src.width + x as usize]
}

#[inline]
pub fn sample_bilinear(src: &GrayImageView<'_>, x: f32, y: f32) -> f32 {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = get_gray(src, x0, y0) as f32;
    let p10 = get_gray(src, x0 + 1, y0) as f32;
    let p01 = get_gray(src, x0, y0 + 1) as f32;
    let p11 = get_gray(src, x0 + 1, y0 + 1) as f32;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

#[inline]
pub fn sample_bilinear_u8(src: &GrayImageView<'_>, x: f32, y: f32) -> u8 {
    sample_bilinear(src, x, y).clamp(0.0, 255.0) as u8
}
