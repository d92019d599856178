//! Face alignment via a 4-DOF similarity transform.
//!
//! Five detected landmarks are mapped onto the ArcFace reference template by
//! least squares, then the face is resampled into a 112×112 crop.

use image::{GrayImage, Luma};

pub const ALIGNED_SIZE: u32 = 112;

/// ArcFace reference landmarks for a 112×112 crop.
const ARCFACE_TEMPLATE: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

/// `dst = [a -b; b a] * src + [tx; ty]`
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    const IDENTITY: Self = Self { a: 1.0, b: 0.0, tx: 0.0, ty: 0.0 };

    /// Least-squares estimate from point correspondences.
    ///
    /// Each pair contributes two rows of the normal equations for the unknowns
    /// `[a, b, tx, ty]`:
    /// ```text
    /// sx*a - sy*b + tx = dx
    /// sy*a + sx*b + ty = dy
    /// ```
    fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        let mut ata = [[0.0f32; 4]; 4];
        let mut atb = [0.0f32; 4];

        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            for (row, rhs) in [([sx, -sy, 1.0, 0.0], dx), ([sy, sx, 0.0, 1.0], dy)] {
                for j in 0..4 {
                    for k in 0..4 {
                        ata[j][k] += row[j] * row[k];
                    }
                    atb[j] += row[j] * rhs;
                }
            }
        }

        match solve4(ata, atb) {
            Some([a, b, tx, ty]) => Self { a, b, tx, ty },
            None => Self::IDENTITY,
        }
    }

    /// Inverse mapping from crop coordinates back to the source frame.
    fn invert_point(&self, x: f32, y: f32) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det.abs() < 1e-12 {
            return None;
        }
        let (dx, dy) = (x - self.tx, y - self.ty);
        Some((
            (self.a * dx + self.b * dy) / det,
            (-self.b * dx + self.a * dy) / det,
        ))
    }
}

/// Gaussian elimination with partial pivoting. `None` when singular.
fn solve4(mut m: [[f32; 4]; 4], mut rhs: [f32; 4]) -> Option<[f32; 4]> {
    for col in 0..4 {
        let pivot_row = (col..4).max_by(|&i, &j| m[i][col].abs().total_cmp(&m[j][col].abs()))?;
        m.swap(col, pivot_row);
        rhs.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return None;
        }
        for row in col + 1..4 {
            let factor = m[row][col] / pivot;
            for k in col..4 {
                m[row][k] -= factor * m[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        let tail: f32 = (i + 1..4).map(|j| m[i][j] * x[j]).sum();
        x[i] = (rhs[i] - tail) / m[i][i];
    }
    Some(x)
}

/// Bilinear sample; outside the frame reads as black.
fn sample(frame: &GrayImage, x: f32, y: f32) -> f32 {
    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);
    let pixel = |px: f32, py: f32| -> f32 {
        if px < 0.0 || py < 0.0 || px >= frame.width() as f32 || py >= frame.height() as f32 {
            0.0
        } else {
            frame.get_pixel(px as u32, py as u32).0[0] as f32
        }
    };

    pixel(x0, y0) * (1.0 - fx) * (1.0 - fy)
        + pixel(x0 + 1.0, y0) * fx * (1.0 - fy)
        + pixel(x0, y0 + 1.0) * (1.0 - fx) * fy
        + pixel(x0 + 1.0, y0 + 1.0) * fx * fy
}

/// Warp the face described by `landmarks` into a canonical 112×112 crop.
pub fn align_face(frame: &GrayImage, landmarks: &[(f32, f32); 5]) -> GrayImage {
    let transform = Similarity::estimate(landmarks, &ARCFACE_TEMPLATE);

    GrayImage::from_fn(ALIGNED_SIZE, ALIGNED_SIZE, |ox, oy| {
        let value = transform
            .invert_point(ox as f32, oy as f32)
            .map(|(sx, sy)| sample(frame, sx, sy))
            .unwrap_or(0.0);
        Luma([value.round().clamp(0.0, 255.0) as u8])
    })
}
