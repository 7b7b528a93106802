use nalgebra::{DMatrix, Matrix3, Vector3};

const EPS: f64 = 1e-12;

/// Similarity transform moving points to zero mean and mean distance sqrt(2).
fn normalization(points: &[(f64, f64)]) -> Matrix3<f64> {
    let n = points.len() as f64;
    let (sx, sy) = points.iter().fold((0.0, 0.0), |(ax, ay), p| (ax + p.0, ay + p.1));
    let (cx, cy) = (sx / n, sy / n);
    let mean_dist = points
        .iter()
        .map(|p| ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    let s = if mean_dist > EPS {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0)
}

/// Normalized DLT estimate of `H` with `dst ~ H * src`. Needs 4 or more
/// correspondences.
pub fn estimate_homography(src: &[(f64, f64)], dst: &[(f64, f64)]) -> Option<Matrix3<f64>> {
    if src.len() < 4 || src.len() != dst.len() {
        return None;
    }

    let ts = normalization(src);
    let td = normalization(dst);
    // at least nine rows so that V^T carries the null vector
    let rows = (2 * src.len()).max(9);
    let mut a = DMatrix::<f64>::zeros(rows, 9);

    for (i, (s, d)) in src.iter().zip(dst).enumerate() {
        let p = ts * Vector3::new(s.0, s.1, 1.0);
        let q = td * Vector3::new(d.0, d.1, 1.0);
        let (x, y) = (p.x / p.z, p.y / p.z);
        let (u, v) = (q.x / q.z, q.y / q.z);

        let r0 = 2 * i;
        let r1 = r0 + 1;
        a[(r0, 0)] = -x;
        a[(r0, 1)] = -y;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = u * x;
        a[(r0, 7)] = u * y;
        a[(r0, 8)] = u;

        a[(r1, 3)] = -x;
        a[(r1, 4)] = -y;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = v * x;
        a[(r1, 7)] = v * y;
        a[(r1, 8)] = v;
    }

    let svd = a.svd(false, true);
    let vt = svd.v_t?;
    let (min_row, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let h = vt.row(min_row);
    let hn = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let h = td.try_inverse()? * hn * ts;
    if h[(2, 2)].abs() < EPS {
        return None;
    }
    let h = h / h[(2, 2)];
    h.iter().all(|v| v.is_finite()).then_some(h)
}

/// Apply `h` to a point; `None` at the line at infinity.
pub fn apply_homography(h: &Matrix3<f64>, p: (f64, f64)) -> Option<(f64, f64)> {
    let v = h * Vector3::new(p.0, p.1, 1.0);
    if !v[2].is_finite() || v[2].abs() <= EPS {
        return None;
    }
    Some((v[0] / v[2], v[1] / v[2]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovers_known_homography() {
        let truth = Matrix3::new(1.05, 0.02, 12.0, -0.01, 0.98, -7.0, 1e-5, -2e-5, 1.0);
        let src: Vec<(f64, f64)> = vec![
            (0.0, 0.0),
            (100.0, 5.0),
            (20.0, 150.0),
            (200.0, 180.0),
            (75.0, 60.0),
            (160.0, 20.0),
        ];
        let dst: Vec<(f64, f64)> = src.iter().map(|&p| apply_homography(&truth, p).unwrap()).collect();
        let h = estimate_homography(&src, &dst).unwrap();
        for (s, d) in src.iter().zip(&dst) {
            let p = apply_homography(&h, *s).unwrap();
            assert!((p.0 - d.0).abs() < 1e-6 && (p.1 - d.1).abs() < 1e-6);
        }
    }

    #[test]
    fn test_minimal_sample_and_degenerate_input() {
        let src = vec![(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)];
        let dst = vec![(2.0, 3.0), (3.0, 3.0), (2.0, 4.0), (3.0, 4.0)];
        let h = estimate_homography(&src, &dst).unwrap();
        let p = apply_homography(&h, (0.5, 0.5)).unwrap();
        assert!((p.0 - 2.5).abs() < 1e-9 && (p.1 - 3.5).abs() < 1e-9);

        assert!(estimate_homography(&src[..3], &dst[..3]).is_none());
    }
}
