//! Greedy non-maximum suppression over scored corner-form boxes.

use std::cmp::Ordering;

use crate::decode::DecodedBox;

/// Suppress overlapping boxes, keeping the highest-scoring one per cluster.
///
/// Returns indices into `boxes` for the survivors, ordered by descending
/// score. The sort is stable, so equal scores keep their original relative
/// order. Overlap strictly greater than `iou_threshold` suppresses; exact
/// equality keeps both boxes.
///
/// Areas and intersections use the pixel-inclusive convention
/// `(x2 - x1 + 1) * (y2 - y1 + 1)`; detector thresholds are tuned against it,
/// so switching to the continuous convention would change which boxes
/// survive.
pub fn non_max_suppression(boxes: &[DecodedBox], iou_threshold: f32) -> Vec<usize> {
    let mut order: Vec<usize> = (0..boxes.len()).collect();
    order.sort_by(|&a, &b| {
        boxes[b]
            .score
            .partial_cmp(&boxes[a].score)
            .unwrap_or(Ordering::Equal)
    });

    let areas: Vec<f32> = boxes.iter().map(pixel_area).collect();
    let mut suppressed = vec![false; boxes.len()];
    let mut keep = Vec::new();

    for (rank, &index) in order.iter().enumerate() {
        if suppressed[index] {
            continue;
        }
        keep.push(index);
        let kept = &boxes[index];
        for &other in &order[rank + 1..] {
            if suppressed[other] {
                continue;
            }
            let candidate = &boxes[other];
            let overlap_w = (kept.x2.min(candidate.x2) - kept.x1.max(candidate.x1) + 1.0).max(0.0);
            let overlap_h = (kept.y2.min(candidate.y2) - kept.y1.max(candidate.y1) + 1.0).max(0.0);
            let intersection = overlap_w * overlap_h;
            let iou = intersection / (areas[index] + areas[other] - intersection);
            if iou > iou_threshold {
                suppressed[other] = true;
            }
        }
    }
    keep
}

fn pixel_area(b: &DecodedBox) -> f32 {
    (b.x2 - b.x1 + 1.0) * (b.y2 - b.y1 + 1.0)
}
