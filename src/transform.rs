//! Projective transformation between two quadrilaterals
//!
//! This module implements the general 2D projective transform (homography)
//! that maps four source points onto four destination points. The solver
//! maps the unit basis onto each quad and chains one mapping with the
//! adjugate of the other, so it handles skewed, rotated and
//! perspective-distorted quads alike.

use nalgebra::{Matrix3, Vector3};

use crate::error::{MapError, Result};
use crate::geo::PlanarPoint;

/// Minimum |sin| of the angle spanned by any three quad points
const COLLINEAR_EPS: f64 = 1e-9;

/// Projective transformation matrix (3x3 homography, defined up to scale)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    matrix: Matrix3<f64>,
}

impl Homography {
    pub fn from_matrix(matrix: Matrix3<f64>) -> Self {
        Self { matrix }
    }

    /// Compute the homography taking `src[i]` to `dst[i]` for i in 0..4.
    ///
    /// Both quads are conditioned (centroid at the origin, mean radius
    /// sqrt 2) before solving; projected web-mercator coordinates are in the
    /// millions while the quad itself may span only a few hundred meters.
    pub fn from_quads(src: [PlanarPoint; 4], dst: [PlanarPoint; 4]) -> Result<Self> {
        ensure_non_degenerate(&src, "source")?;
        ensure_non_degenerate(&dst, "destination")?;

        let (src_n, t_src, _) = condition(&src);
        let (dst_n, _, t_dst_inv) = condition(&dst);

        let hs = basis_to_points(&src_n)?;
        let hd = basis_to_points(&dst_n)?;
        let m = t_dst_inv * hd * adjugate(&hs) * t_src;

        let norm = m.norm();
        if !norm.is_finite() || norm == 0.0 {
            return Err(MapError::calibration("homography is singular"));
        }
        Ok(Self::from_matrix(m / norm))
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    /// Apply to a point, dividing by the homogeneous w component
    #[inline]
    pub fn project(&self, p: PlanarPoint) -> PlanarPoint {
        let v = self.matrix * Vector3::new(p.x, p.y, 1.0);
        PlanarPoint::new(v[0] / v[2], v[1] / v[2])
    }

    /// The reverse mapping (adjugate, equal to the inverse up to scale)
    pub fn inverse(&self) -> Self {
        Self::from_matrix(adjugate(&self.matrix))
    }
}

/// Classical adjoint: transpose of the cofactor matrix
pub fn adjugate(m: &Matrix3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        m[(1, 1)] * m[(2, 2)] - m[(1, 2)] * m[(2, 1)],
        m[(0, 2)] * m[(2, 1)] - m[(0, 1)] * m[(2, 2)],
        m[(0, 1)] * m[(1, 2)] - m[(0, 2)] * m[(1, 1)],
        m[(1, 2)] * m[(2, 0)] - m[(1, 0)] * m[(2, 2)],
        m[(0, 0)] * m[(2, 2)] - m[(0, 2)] * m[(2, 0)],
        m[(0, 2)] * m[(1, 0)] - m[(0, 0)] * m[(1, 2)],
        m[(1, 0)] * m[(2, 1)] - m[(1, 1)] * m[(2, 0)],
        m[(0, 1)] * m[(2, 0)] - m[(0, 0)] * m[(2, 1)],
        m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)],
    )
}

/// Matrix taking the projective basis (e1, e2, e3, 1-1-1) onto the quad
fn basis_to_points(p: &[PlanarPoint; 4]) -> Result<Matrix3<f64>> {
    let b = Matrix3::new(
        p[0].x, p[1].x, p[2].x, //
        p[0].y, p[1].y, p[2].y, //
        1.0, 1.0, 1.0,
    );
    let w = adjugate(&b) * Vector3::new(p[3].x, p[3].y, 1.0);
    if w.iter().any(|v| v.abs() < COLLINEAR_EPS || !v.is_finite()) {
        return Err(MapError::calibration("basis matrix is singular"));
    }
    Ok(b * Matrix3::from_diagonal(&w))
}

/// Reject quads where any three points are collinear or coincident
fn ensure_non_degenerate(quad: &[PlanarPoint; 4], label: &str) -> Result<()> {
    if quad.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return Err(MapError::calibration(format!("{} quad is not finite", label)));
    }
    const TRIPLES: [(usize, usize, usize); 4] = [(0, 1, 2), (0, 1, 3), (0, 2, 3), (1, 2, 3)];
    for (i, j, k) in TRIPLES {
        let (a, b, c) = (quad[i], quad[j], quad[k]);
        let (ux, uy) = (b.x - a.x, b.y - a.y);
        let (vx, vy) = (c.x - a.x, c.y - a.y);
        let scale = (ux * ux + uy * uy).sqrt() * (vx * vx + vy * vy).sqrt();
        let cross = ux * vy - uy * vx;
        if scale == 0.0 || cross.abs() <= COLLINEAR_EPS * scale {
            return Err(MapError::calibration(format!(
                "{} quad points {}, {}, {} are collinear or coincident",
                label, i, j, k
            )));
        }
    }
    Ok(())
}

/// Translate the quad to its centroid and scale to mean radius sqrt 2.
/// Returns the conditioned points, the conditioning matrix and its inverse.
fn condition(quad: &[PlanarPoint; 4]) -> ([PlanarPoint; 4], Matrix3<f64>, Matrix3<f64>) {
    let cx = quad.iter().map(|p| p.x).sum::<f64>() / 4.0;
    let cy = quad.iter().map(|p| p.y).sum::<f64>() / 4.0;
    let mean_dist = quad
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / 4.0;
    let s = if mean_dist > 1e-12 {
        2f64.sqrt() / mean_dist
    } else {
        1.0
    };

    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let t_inv = Matrix3::new(1.0 / s, 0.0, cx, 0.0, 1.0 / s, cy, 0.0, 0.0, 1.0);
    let points = quad.map(|p| PlanarPoint::new(s * (p.x - cx), s * (p.y - cy)));
    (points, t, t_inv)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(raw: [(f64, f64); 4]) -> [PlanarPoint; 4] {
        raw.map(|(x, y)| PlanarPoint::new(x, y))
    }

    fn assert_close(p: PlanarPoint, x: f64, y: f64, tol: f64) {
        assert!(
            (p.x - x).abs() < tol && (p.y - y).abs() < tol,
            "expected ({}, {}), got ({}, {})",
            x,
            y,
            p.x,
            p.y
        );
    }

    #[test]
    fn test_identity_transform() {
        let src = pts([(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)]);
        let h = Homography::from_quads(src, src).unwrap();
        assert_close(h.project(PlanarPoint::new(50.0, 50.0)), 50.0, 50.0, 1e-9);
        assert_close(h.project(PlanarPoint::new(-20.0, 340.0)), -20.0, 340.0, 1e-9);
    }

    #[test]
    fn test_simple_transform() {
        let src = pts([(10.0, 10.0), (90.0, 10.0), (90.0, 90.0), (10.0, 90.0)]);
        let dst = pts([(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)]);
        let h = Homography::from_quads(src, dst).unwrap();

        for (s, d) in src.iter().zip(dst.iter()) {
            assert_close(h.project(*s), d.x, d.y, 1e-9);
        }
        assert_close(h.project(PlanarPoint::new(50.0, 50.0)), 50.0, 50.0, 1e-9);
    }

    #[test]
    fn test_perspective_quad_corners_are_exact() {
        let src = pts([(0.0, 0.0), (640.0, 0.0), (640.0, 480.0), (0.0, 480.0)]);
        let dst = pts([(35.0, 20.0), (610.0, 60.0), (580.0, 470.0), (10.0, 400.0)]);
        let h = Homography::from_quads(src, dst).unwrap();
        for (s, d) in src.iter().zip(dst.iter()) {
            assert_close(h.project(*s), d.x, d.y, 1e-8);
        }

        // A perspective map is not affine: the image of the center is not
        // the average of the destination corners.
        let c = h.project(PlanarPoint::new(320.0, 240.0));
        let avg_x = dst.iter().map(|p| p.x).sum::<f64>() / 4.0;
        assert!((c.x - avg_x).abs() > 1e-3);
    }

    #[test]
    fn test_large_offsets_are_well_conditioned() {
        let src = pts([(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)]);
        let base = (11_131_949.0, 5_621_521.0);
        let dst = pts([
            (base.0, base.1 + 1113.0),
            (base.0 + 1113.0, base.1 + 1113.0),
            (base.0 + 1113.0, base.1),
            (base.0, base.1),
        ]);
        let h = Homography::from_quads(src, dst).unwrap();
        let inv = h.inverse();
        let p = PlanarPoint::new(37.5, 81.25);
        let back = inv.project(h.project(p));
        assert_close(back, p.x, p.y, 1e-7);
    }

    #[test]
    fn test_collinear_points_fail() {
        let src = pts([(0.0, 0.0), (50.0, 0.0), (100.0, 0.0), (0.0, 100.0)]);
        let dst = pts([(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)]);
        let err = Homography::from_quads(src, dst).unwrap_err();
        assert!(matches!(err, MapError::InvalidCalibration(_)));
    }

    #[test]
    fn test_coincident_points_fail() {
        let src = pts([(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)]);
        let dst = pts([(5.0, 5.0), (5.0, 5.0), (100.0, 100.0), (0.0, 100.0)]);
        assert!(Homography::from_quads(src, dst).is_err());
    }

    #[test]
    fn test_adjugate_identity() {
        let m = Matrix3::new(2.0, 1.0, 0.5, -1.0, 3.0, 2.0, 0.25, 0.0, 1.0);
        let prod = m * adjugate(&m);
        let det = m.determinant();
        assert!((prod - Matrix3::identity() * det).norm() < 1e-12);
    }
}
