//! Canonical face alignment for embedding extraction.
//!
//! Maps detected five-point landmarks onto the ArcFace reference layout with
//! a similarity transform (scale + rotation + translation), then warps the
//! face region into a 112×112 grayscale crop.

/// ArcFace reference landmark positions for a 112×112 crop.
const CANONICAL_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

/// Side length of the aligned output crop.
pub const ALIGNED_SIZE: usize = 112;

/// 2×3 row-major similarity transform: [a, -b, tx, b, a, ty].
type Similarity = [f32; 6];

/// Least-squares similarity transform taking `src` landmarks onto `dst`.
///
/// Uses the closed-form solution on centered point sets:
/// with u = src - src_mean and v = dst - dst_mean,
///   a = Σ(ux·vx + uy·vy) / Σ|u|²
///   b = Σ(ux·vy − uy·vx) / Σ|u|²
/// and the translation re-centers the means.
fn fit_similarity(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Similarity {
    let n = src.len() as f32;
    let (mut sx, mut sy, mut dx, mut dy) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);
    for i in 0..src.len() {
        sx += src[i].0;
        sy += src[i].1;
        dx += dst[i].0;
        dy += dst[i].1;
    }
    let src_mean = (sx / n, sy / n);
    let dst_mean = (dx / n, dy / n);

    let mut dot = 0.0f32;
    let mut cross = 0.0f32;
    let mut norm = 0.0f32;
    for i in 0..src.len() {
        let ux = src[i].0 - src_mean.0;
        let uy = src[i].1 - src_mean.1;
        let vx = dst[i].0 - dst_mean.0;
        let vy = dst[i].1 - dst_mean.1;
        dot += ux * vx + uy * vy;
        cross += ux * vy - uy * vx;
        norm += ux * ux + uy * uy;
    }

    if norm < 1e-12 {
        // Degenerate landmark cluster; fall back to pure translation.
        return [1.0, 0.0, dst_mean.0 - src_mean.0, 0.0, 1.0, dst_mean.1 - src_mean.1];
    }

    let a = dot / norm;
    let b = cross / norm;
    let tx = dst_mean.0 - (a * src_mean.0 - b * src_mean.1);
    let ty = dst_mean.1 - (b * src_mean.0 + a * src_mean.1);

    [a, -b, tx, b, a, ty]
}

/// Warp a grayscale frame through the inverse of `m` into a square crop.
///
/// Each output pixel is mapped back into the source frame and sampled with
/// bilinear interpolation; out-of-frame samples read as black.
fn warp_into_crop(
    frame: &[u8],
    width: usize,
    height: usize,
    m: &Similarity,
    out_size: usize,
) -> Vec<u8> {
    let (a, b) = (m[0], m[3]);
    let (tx, ty) = (m[2], m[5]);

    // The inverse of a similarity is a similarity: scale by 1/(a²+b²).
    let det = a * a + b * b;
    if det < 1e-12 {
        return vec![0u8; out_size * out_size];
    }
    let ia = a / det;
    let ib = b / det;

    let sample = |x: f32, y: f32| -> f32 {
        let x0 = x.floor() as i64;
        let y0 = y.floor() as i64;
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;

        let at = |px: i64, py: i64| -> f32 {
            if px >= 0 && (px as usize) < width && py >= 0 && (py as usize) < height {
                frame[py as usize * width + px as usize] as f32
            } else {
                0.0
            }
        };

        at(x0, y0) * (1.0 - fx) * (1.0 - fy)
            + at(x0 + 1, y0) * fx * (1.0 - fy)
            + at(x0, y0 + 1) * (1.0 - fx) * fy
            + at(x0 + 1, y0 + 1) * fx * fy
    };

    let mut out = vec![0u8; out_size * out_size];
    for oy in 0..out_size {
        for ox in 0..out_size {
            let rx = ox as f32 - tx;
            let ry = oy as f32 - ty;
            let src_x = ia * rx + ib * ry;
            let src_y = -ib * rx + ia * ry;
            out[oy * out_size + ox] = sample(src_x, src_y).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Align a detected face to the canonical 112×112 crop used by the embedder.
pub fn align_face(
    frame: &[u8],
    width: u32,
    height: u32,
    landmarks: &[(f32, f32); 5],
) -> Vec<u8> {
    let m = fit_similarity(landmarks, &CANONICAL_LANDMARKS);
    warp_into_crop(frame, width as usize, height as usize, &m, ALIGNED_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_identity() {
        let m = fit_similarity(&CANONICAL_LANDMARKS, &CANONICAL_LANDMARKS);
        assert!((m[0] - 1.0).abs() < 1e-4, "a = {}", m[0]);
        assert!(m[1].abs() < 1e-4);
        assert!(m[2].abs() < 1e-3);
        assert!(m[3].abs() < 1e-4);
        assert!((m[4] - 1.0).abs() < 1e-4);
        assert!(m[5].abs() < 1e-3);
    }

    #[test]
    fn test_fit_halves_doubled_landmarks() {
        let doubled: [(f32, f32); 5] =
            std::array::from_fn(|i| (CANONICAL_LANDMARKS[i].0 * 2.0, CANONICAL_LANDMARKS[i].1 * 2.0));
        let m = fit_similarity(&doubled, &CANONICAL_LANDMARKS);
        assert!((m[0] - 0.5).abs() < 1e-3, "scale = {}", m[0]);
        assert!(m[3].abs() < 1e-3, "rotation = {}", m[3]);
    }

    #[test]
    fn test_fit_pure_translation() {
        let shifted: [(f32, f32); 5] =
            std::array::from_fn(|i| (CANONICAL_LANDMARKS[i].0 + 30.0, CANONICAL_LANDMARKS[i].1 - 10.0));
        let m = fit_similarity(&shifted, &CANONICAL_LANDMARKS);
        assert!((m[0] - 1.0).abs() < 1e-3);
        assert!((m[2] + 30.0).abs() < 1e-2, "tx = {}", m[2]);
        assert!((m[5] - 10.0).abs() < 1e-2, "ty = {}", m[5]);
    }

    #[test]
    fn test_warp_output_dimensions() {
        let frame = vec![200u8; 640 * 480];
        let identity = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let out = warp_into_crop(&frame, 640, 480, &identity, ALIGNED_SIZE);
        assert_eq!(out.len(), ALIGNED_SIZE * ALIGNED_SIZE);
        assert_eq!(out[0], 200);
    }

    #[test]
    fn test_warp_out_of_bounds_is_black() {
        let frame = vec![255u8; 10 * 10];
        // Translate the 10x10 source entirely off the output crop.
        let m = [1.0, 0.0, 60.0, 0.0, 1.0, 60.0];
        let out = warp_into_crop(&frame, 10, 10, &m, ALIGNED_SIZE);
        assert_eq!(out[0], 0);
    }

    #[test]
    fn test_align_moves_landmark_to_reference() {
        // A bright patch at the source left-eye landmark should end up near
        // the canonical left-eye position after alignment.
        let (w, h) = (200usize, 200usize);
        let mut frame = vec![0u8; w * h];
        let src: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        for dy in 0..5usize {
            for dx in 0..5usize {
                let px = src[0].0 as usize - 2 + dx;
                let py = src[0].1 as usize - 2 + dy;
                frame[py * w + px] = 255;
            }
        }

        let aligned = align_face(&frame, w as u32, h as u32, &src);

        let ref_x = CANONICAL_LANDMARKS[0].0.round() as usize;
        let ref_y = CANONICAL_LANDMARKS[0].1.round() as usize;
        let mut brightest = 0u8;
        for dy in 0..3usize {
            for dx in 0..3usize {
                let x = ref_x - 1 + dx;
                let y = ref_y - 1 + dy;
                brightest = brightest.max(aligned[y * ALIGNED_SIZE + x]);
            }
        }
        assert!(brightest > 100, "expected bright patch at canonical eye, max={brightest}");
    }
}
