//! 4-connected labelling of a binary mask.

/// One connected blob of `true` pixels.
#[derive(Clone, Debug)]
pub(crate) struct Component {
    /// Pixel coordinates `(x, y)` in scan order.
    pub pixels: Vec<(u32, u32)>,
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl Component {
    pub fn touches_border(&self, width: usize, height: usize) -> bool {
        self.min_x == 0
            || self.min_y == 0
            || self.max_x as usize + 1 >= width
            || self.max_y as usize + 1 >= height
    }

    pub fn centroid(&self) -> (f64, f64) {
        let n = self.pixels.len().max(1) as f64;
        let (sx, sy) = self
            .pixels
            .iter()
            .fold((0.0, 0.0), |(sx, sy), &(x, y)| (sx + x as f64, sy + y as f64));
        (sx / n + 0.5, sy / n + 0.5)
    }
}

/// Label 4-connected components of `mask` and keep those with at least `min_area` pixels.
pub(crate) fn label_components(
    mask: &[bool],
    width: usize,
    height: usize,
    min_area: usize,
) -> Vec<Component> {
    let mut visited = vec![false; mask.len()];
    let mut out = Vec::new();
    let mut stack = Vec::new();

    for start in 0..mask.len().min(width * height) {
        if !mask[start] || visited[start] {
            continue;
        }

        let mut comp = Component {
            pixels: Vec::new(),
            min_x: u32::MAX,
            min_y: u32::MAX,
            max_x: 0,
            max_y: 0,
        };
        visited[start] = true;
        stack.push(start);

        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % width, idx / width);
            comp.pixels.push((x as u32, y as u32));
            comp.min_x = comp.min_x.min(x as u32);
            comp.min_y = comp.min_y.min(y as u32);
            comp.max_x = comp.max_x.max(x as u32);
            comp.max_y = comp.max_y.max(y as u32);

            let mut visit = |n: usize| {
                if mask[n] && !visited[n] {
                    visited[n] = true;
                    stack.push(n);
                }
            };
            if x > 0 {
                visit(idx - 1);
            }
            if x + 1 < width {
                visit(idx + 1);
            }
            if y > 0 {
                visit(idx - width);
            }
            if y + 1 < height {
                visit(idx + width);
            }
        }

        if comp.pixels.len() >= min_area {
            out.push(comp);
        }
    }

    out
}

/// Pixels of `comp` that have a 4-neighbour outside the component.
pub(crate) fn boundary_pixels(
    comp: &Component,
    mask: &[bool],
    width: usize,
    height: usize,
) -> Vec<(u32, u32)> {
    comp.pixels
        .iter()
        .copied()
        .filter(|&(x, y)| {
            let (x, y) = (x as usize, y as usize);
            x == 0
                || y == 0
                || x + 1 >= width
                || y + 1 >= height
                || !mask[y * width + x - 1]
                || !mask[y * width + x + 1]
                || !mask[(y - 1) * width + x]
                || !mask[(y + 1) * width + x]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_from(rows: &[&str]) -> (Vec<bool>, usize, usize) {
        let w = rows[0].len();
        let mask = rows
            .iter()
            .flat_map(|r| r.chars().map(|c| c == '#'))
            .collect();
        (mask, w, rows.len())
    }

    #[test]
    fn diagonal_pixels_are_separate_components() {
        let (mask, w, h) = mask_from(&[
            "##....", //
            "##....", //
            "..##..", //
            "..##.#",
        ]);
        let comps = label_components(&mask, w, h, 1);
        assert_eq!(comps.len(), 3);
        assert_eq!(comps[0].pixels.len(), 4);
        assert_eq!((comps[1].min_x, comps[1].min_y), (2, 2));

        let big = label_components(&mask, w, h, 2);
        assert_eq!(big.len(), 2);
    }

    #[test]
    fn ring_boundary_and_bbox() {
        let (mask, w, h) = mask_from(&[
            ".....", //
            ".###.", //
            ".###.", //
            ".###.", //
            ".....",
        ]);
        let comps = label_components(&mask, w, h, 1);
        assert_eq!(comps.len(), 1);
        let c = &comps[0];
        assert_eq!((c.min_x, c.min_y, c.max_x, c.max_y), (1, 1, 3, 3));
        assert!(!c.touches_border(w, h));
        assert_eq!(c.centroid(), (2.5, 2.5));

        let boundary = boundary_pixels(c, &mask, w, h);
        assert_eq!(boundary.len(), 8);
        assert!(!boundary.contains(&(2, 2)));
    }
}
