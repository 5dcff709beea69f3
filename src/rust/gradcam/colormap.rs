//! The "jet" colormap as a 256-entry lookup table.
//!
//! Each channel is a piecewise linear function of `x ∈ [0, 1]` given by its
//! control points; entry `i` samples every channel at `i / 255`.

const RED: &[(f32, f32)] = &[(0.0, 0.0), (0.35, 0.0), (0.66, 1.0), (0.89, 1.0), (1.0, 0.5)];
const GREEN: &[(f32, f32)] = &[(0.0, 0.0), (0.125, 0.0), (0.375, 1.0), (0.64, 1.0), (0.91, 0.0), (1.0, 0.0)];
const BLUE: &[(f32, f32)] = &[(0.0, 0.5), (0.11, 1.0), (0.34, 1.0), (0.65, 0.0), (1.0, 0.0)];

pub const LUT_SIZE: usize = 256;

fn interpolate(points: &[(f32, f32)], x: f32) -> f32 {
    let x = x.clamp(0.0, 1.0);
    for pair in points.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        if x <= x1 {
            if x1 <= x0 {
                return y1;
            }
            return y0 + (x - x0) / (x1 - x0) * (y1 - y0);
        }
    }
    points.last().map(|&(_, y)| y).unwrap_or(0.0)
}

/// RGB colour in `[0, 1]` for a position `x` in `[0, 1]`.
pub fn jet(x: f32) -> [f32; 3] {
    [interpolate(RED, x), interpolate(GREEN, x), interpolate(BLUE, x)]
}

pub fn jet_lut() -> [[f32; 3]; LUT_SIZE] {
    let mut lut = [[0.0; 3]; LUT_SIZE];
    for (i, entry) in lut.iter_mut().enumerate() {
        *entry = jet(i as f32 / (LUT_SIZE - 1) as f32);
    }
    lut
}
