//! Delta decoding against the anchor grid.
//!
//! The network regresses offsets relative to each anchor rather than absolute
//! coordinates. Both decoders here are whole-batch transforms over flat
//! slices; positional alignment with the anchor enumeration is the caller's
//! contract.

use crate::anchors::Anchor;

/// A scored detection box in corner form, as consumed by suppression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    /// Face-class score carried through suppression.
    pub score: f32,
}

impl DecodedBox {
    pub const fn new(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> Self {
        Self { x1, y1, x2, y2, score }
    }
}

/// Decode location deltas into normalized corner-form boxes.
///
/// For each anchor, the center moves by `delta * variance.0 * anchor_size`
/// and the size scales by `exp(delta * variance.1)`; the result is converted
/// to corner form. Outputs stay in normalized coordinates; multiply by
/// `(W, H, W, H)` for pixels. The deltas must hold four values per anchor in
/// anchor order.
pub fn decode_boxes(loc: &[f32], anchors: &[Anchor], variances: (f32, f32)) -> Vec<[f32; 4]> {
    debug_assert_eq!(loc.len(), anchors.len() * 4, "four deltas per anchor");
    let (var_center, var_size) = variances;
    loc.chunks_exact(4)
        .zip(anchors)
        .map(|(delta, anchor)| {
            let cx = delta[0].mul_add(var_center * anchor.w, anchor.cx);
            let cy = delta[1].mul_add(var_center * anchor.h, anchor.cy);
            let w = anchor.w * (delta[2] * var_size).exp();
            let h = anchor.h * (delta[3] * var_size).exp();
            let x1 = (-0.5f32).mul_add(w, cx);
            let y1 = (-0.5f32).mul_add(h, cy);
            [x1, y1, x1 + w, y1 + h]
        })
        .collect()
}

/// Decode landmark deltas into normalized `(x, y)` pairs, five per anchor.
///
/// Every point is an independent center-style offset from the anchor center;
/// only the center variance applies. The deltas must hold ten values per
/// anchor in anchor order.
pub fn decode_landmarks(deltas: &[f32], anchors: &[Anchor], variances: (f32, f32)) -> Vec<[f32; 10]> {
    debug_assert_eq!(deltas.len(), anchors.len() * 10, "ten deltas per anchor");
    let var_center = variances.0;
    deltas
        .chunks_exact(10)
        .zip(anchors)
        .map(|(delta, anchor)| {
            let mut points = [0f32; 10];
            for point in 0..5 {
                points[2 * point] = delta[2 * point].mul_add(var_center * anchor.w, anchor.cx);
                points[2 * point + 1] =
                    delta[2 * point + 1].mul_add(var_center * anchor.h, anchor.cy);
            }
            points
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARIANCES: (f32, f32) = (0.1, 0.2);

    fn anchor() -> Anchor {
        Anchor {
            cx: 0.5,
            cy: 0.5,
            w: 0.2,
            h: 0.2,
        }
    }

    #[test]
    fn zero_deltas_reproduce_the_anchor() {
        let boxes = decode_boxes(&[0.0; 4], &[anchor()], VARIANCES);
        let [x1, y1, x2, y2] = boxes[0];
        assert!((x1 - 0.4).abs() < 1e-6);
        assert!((y1 - 0.4).abs() < 1e-6);
        assert!((x2 - 0.6).abs() < 1e-6);
        assert!((y2 - 0.6).abs() < 1e-6);
    }

    #[test]
    fn center_deltas_shift_by_variance_times_anchor_size() {
        // cx moves by 1.0 * 0.1 * 0.2 = 0.02; the box width is unchanged.
        let boxes = decode_boxes(&[1.0, 0.0, 0.0, 0.0], &[anchor()], VARIANCES);
        let [x1, _, x2, _] = boxes[0];
        assert!((x1 - 0.42).abs() < 1e-6);
        assert!((x2 - 0.62).abs() < 1e-6);
    }

    #[test]
    fn size_deltas_scale_exponentially() {
        let boxes = decode_boxes(&[0.0, 0.0, 1.0, -1.0], &[anchor()], VARIANCES);
        let [x1, y1, x2, y2] = boxes[0];
        let expected_w = 0.2 * (0.2f32).exp();
        let expected_h = 0.2 * (-0.2f32).exp();
        assert!((x2 - x1 - expected_w).abs() < 1e-6);
        assert!((y2 - y1 - expected_h).abs() < 1e-6);
        // Center stays put.
        assert!(((x1 + x2) / 2.0 - 0.5).abs() < 1e-6);
        assert!(((y1 + y2) / 2.0 - 0.5).abs() < 1e-6);
    }

    #[test]
    fn landmark_deltas_offset_each_point_from_the_center() {
        let mut deltas = [0f32; 10];
        deltas[0] = 1.0; // first point x
        deltas[3] = -2.0; // second point y
        let points = decode_landmarks(&deltas, &[anchor()], VARIANCES);
        assert!((points[0][0] - 0.52).abs() < 1e-6);
        assert!((points[0][1] - 0.5).abs() < 1e-6);
        assert!((points[0][2] - 0.5).abs() < 1e-6);
        assert!((points[0][3] - 0.46).abs() < 1e-6);
    }

    #[test]
    fn decoding_processes_each_anchor_independently() {
        let anchors = [
            anchor(),
            Anchor {
                cx: 0.25,
                cy: 0.75,
                w: 0.1,
                h: 0.4,
            },
        ];
        let mut loc = vec![0.0; 8];
        loc[4] = 1.0; // second anchor cx delta
        let boxes = decode_boxes(&loc, &anchors, VARIANCES);
        assert_eq!(boxes.len(), 2);
        assert!((boxes[0][0] - 0.4).abs() < 1e-6);
        // Second anchor: cx = 0.25 + 1.0 * 0.1 * 0.1 = 0.26, x1 = 0.26 - 0.05.
        assert!((boxes[1][0] - 0.21).abs() < 1e-6);

        let landmarks = decode_landmarks(&vec![0.0; 20], &anchors, VARIANCES);
        assert_eq!(landmarks.len(), 2);
        assert!((landmarks[1][4] - 0.25).abs() < 1e-6);
        assert!((landmarks[1][5] - 0.75).abs() < 1e-6);
    }
}
