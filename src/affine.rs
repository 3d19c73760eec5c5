use nalgebra::{Matrix2, Vector2};

use crate::error::{Error, Result};

/// Fewest control points an affine fit accepts.
pub const MIN_GCPS: usize = 3;

/// Affine pixel → world transform in GDAL geotransform order:
/// `x = c0 + col * c1 + row * c2`, `y = c3 + col * c4 + row * c5`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    /// Least-squares fit through `(pixel, world)` pairs, with pixels given
    /// as `(col, row)`.
    pub fn from_gcps(gcps: &[((f64, f64), (f64, f64))]) -> Result<Self> {
        if gcps.len() < MIN_GCPS {
            return Err(Error::TooFewGcps {
                needed: MIN_GCPS,
                got: gcps.len(),
            });
        }

        // centred normal equations, world coordinates are large
        let n = gcps.len() as f64;
        let mean = gcps.iter().fold([0.0; 4], |m, &((c, r), (x, y))| {
            [m[0] + c / n, m[1] + r / n, m[2] + x / n, m[3] + y / n]
        });

        let mut ata = Matrix2::<f64>::zeros();
        let mut atx = Vector2::<f64>::zeros();
        let mut aty = Vector2::<f64>::zeros();

        for &((col, row), (x, y)) in gcps {
            let a = Vector2::new(col - mean[0], row - mean[1]);
            ata += a * a.transpose();
            atx += a * (x - mean[2]);
            aty += a * (y - mean[3]);
        }

        let lu = ata.lu();
        let (cx, cy) = match (lu.solve(&atx), lu.solve(&aty)) {
            (Some(cx), Some(cy)) => (cx, cy),
            // all pixels collinear
            _ => return Err(Error::MissingGcps),
        };

        let x0 = mean[2] - cx[0] * mean[0] - cx[1] * mean[1];
        let y0 = mean[3] - cy[0] * mean[0] - cy[1] * mean[1];

        Ok(GeoTransform([x0, cx[0], cx[1], y0, cy[0], cy[1]]))
    }

    /// World coordinate of a pixel position.
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        let c = &self.0;
        (
            c[0] + col * c[1] + row * c[2],
            c[3] + col * c[4] + row * c[5],
        )
    }

    /// World coordinate of the centre of pixel `(row, col)`.
    pub fn xy(&self, row: f64, col: f64) -> (f64, f64) {
        self.apply(col + 0.5, row + 0.5)
    }

    /// Pixel `(col, row)` of a world coordinate.
    pub fn invert(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let c = &self.0;
        let m = Matrix2::new(c[1], c[2], c[4], c[5]).try_inverse()?;
        let p = m * Vector2::new(x - c[0], y - c[3]);
        Some((p[0], p[1]))
    }
}

/// Estimates the separate horizontal and vertical ground resolution of an
/// image whose pixels map to projected coordinates through `transform`.
///
/// Image corners are pushed through the transform and the squared
/// per-axis deltas of the top and left edges are related to the image
/// width and height by a 2×2 linear system. Scans with an arbitrary
/// rotation make this system singular, in which case
/// [`Error::UnsolvableResolution`] is returned.
pub fn estimate_resolution(transform: &GeoTransform, width: u32, height: u32) -> Result<(f64, f64)> {
    let (w, h) = (width as f64, height as f64);

    let ul = transform.xy(0.0, 0.0);
    let ur = transform.xy(0.0, w);
    let ll = transform.xy(h, 0.0);

    let a1 = (ul.0 - ur.0).powi(2);
    let b1 = (ul.1 - ur.1).powi(2);
    let a2 = (ul.0 - ll.0).powi(2);
    let b2 = (ul.1 - ll.1).powi(2);

    // x_res_sq * a1 + y_res_sq * b1 = w^2
    // x_res_sq * a2 + y_res_sq * b2 = h^2
    let det = a1 * b2 - b1 * a2;
    let scale = (a1 * b2).abs() + (b1 * a2).abs();
    if !det.is_finite() || det.abs() <= scale * 1e-9 {
        return Err(Error::UnsolvableResolution(det));
    }

    let system = Matrix2::new(a1, b1, a2, b2);
    let solution = system
        .lu()
        .solve(&Vector2::new(w * w, h * h))
        .ok_or(Error::UnsolvableResolution(det))?;
    let (x_res_sq, y_res_sq) = (solution[0], solution[1]);

    if !(x_res_sq > 0.0 && y_res_sq > 0.0) {
        return Err(Error::UnsolvableResolution(det));
    }

    Ok((1.0 / x_res_sq.sqrt(), 1.0 / y_res_sq.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6 * b.abs().max(1.0)
    }

    #[test]
    fn fits_exact_affine() {
        let truth = GeoTransform([500_000.0, 2.0, 0.1, 6_000_000.0, -0.05, -3.0]);
        let gcps: Vec<_> = [(0.0, 0.0), (4000.0, 0.0), (4000.0, 3000.0), (0.0, 3000.0)]
            .iter()
            .map(|&(c, r)| ((c, r), truth.apply(c, r)))
            .collect();

        let fitted = GeoTransform::from_gcps(&gcps).unwrap();
        for (a, b) in fitted.0.iter().zip(truth.0.iter()) {
            assert!(close(*a, *b), "{} != {}", a, b);
        }

        let world = fitted.apply(1234.0, 567.0);
        let (col, row) = fitted.invert(world.0, world.1).unwrap();
        assert!(close(col, 1234.0) && close(row, 567.0));
    }

    #[test]
    fn needs_three_gcps() {
        let gcps = [((0.0, 0.0), (0.0, 0.0)), ((1.0, 0.0), (1.0, 0.0))];
        assert!(matches!(
            GeoTransform::from_gcps(&gcps),
            Err(Error::TooFewGcps { needed: 3, got: 2 })
        ));
    }

    #[test]
    fn axis_aligned_resolution() {
        let t = GeoTransform([500_000.0, 2.0, 0.0, 6_000_000.0, 0.0, -3.0]);
        let (rx, ry) = estimate_resolution(&t, 4000, 3000).unwrap();
        assert!(close(rx, 2.0), "{}", rx);
        assert!(close(ry, 3.0), "{}", ry);
    }

    #[test]
    fn slightly_skewed_resolution() {
        let t = GeoTransform([500_000.0, 2.0, 0.02, 6_000_000.0, -0.03, -2.0]);
        let (rx, ry) = estimate_resolution(&t, 5000, 5000).unwrap();
        assert!((rx - 2.0).abs() < 0.01, "{}", rx);
        assert!((ry - 2.0).abs() < 0.01, "{}", ry);
    }

    #[test]
    fn rotation_by_45_degrees_is_unsolvable() {
        let s = std::f64::consts::FRAC_1_SQRT_2;
        let t = GeoTransform([0.0, s, s, 0.0, s, -s]);
        assert!(matches!(
            estimate_resolution(&t, 1000, 1000),
            Err(Error::UnsolvableResolution(_))
        ));
    }
}
