use munkres::{solve_assignment, Position, WeightMatrix};
use tracing::warn;

/// Padding cost for the square expansion of a rectangular problem; any real
/// pairing costs at most 1.
const PAD_COST: f64 = 100_000.0;

/// Three-way partition of an association round. Every track row and every
/// detection column lands in exactly one of the sets.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Association {
    pub matched: Vec<(usize, usize)>,
    pub unmatched_tracks: Vec<usize>,
    pub unmatched_detections: Vec<usize>,
}

/// Minimum-cost one-to-one association over a `trk_num x det_num` cost
/// matrix with entries `1 - IOU`. Pairs whose IOU does not exceed
/// `iou_threshold` are reclassified as unmatched on both sides.
///
/// A solver failure degrades to "nothing matched" rather than aborting the
/// frame.
pub fn associate(cost: &[Vec<f64>], det_num: usize, iou_threshold: f64) -> Association {
    let trk_num = cost.len();
    let mut out = Association::default();

    if trk_num == 0 {
        out.unmatched_detections = (0..det_num).collect();
        return out;
    }
    if det_num == 0 {
        out.unmatched_tracks = (0..trk_num).collect();
        return out;
    }

    let n = trk_num.max(det_num);
    let mut mat = WeightMatrix::from_fn(n, |(r, c)| {
        if r < trk_num && c < det_num {
            cost[r][c]
        } else {
            PAD_COST
        }
    });

    // per-row assignment; padded columns count as unassigned
    let assignment: Vec<Option<usize>> = match solve_assignment(&mut mat) {
        Ok(positions) => {
            let mut rows = vec![None; trk_num];
            for Position { row, column } in positions {
                if row < trk_num && column < det_num {
                    rows[row] = Some(column);
                }
            }
            rows
        }
        Err(err) => {
            warn!(?err, "assignment could not be solved");
            vec![None; trk_num]
        }
    };

    let mut det_used = vec![false; det_num];
    for col in assignment.iter().flatten() {
        det_used[*col] = true;
    }

    for (row, assigned) in assignment.iter().enumerate() {
        match assigned {
            Some(col) if 1.0 - cost[row][*col] <= iou_threshold => {
                out.unmatched_tracks.push(row);
                out.unmatched_detections.push(*col);
            }
            Some(col) => out.matched.push((row, *col)),
            None => out.unmatched_tracks.push(row),
        }
    }

    for (col, used) in det_used.iter().enumerate() {
        if !used {
            out.unmatched_detections.push(col);
        }
    }
    out.unmatched_detections.sort_unstable();

    out
}
