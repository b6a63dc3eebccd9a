use ndarray::{Array1, ArrayView1, ArrayView2};
use num_traits::Float;

/// Closest curve segment for a query point, with the position of the
/// orthogonal projection inside that segment.
#[derive(Clone, Copy, Debug)]
pub struct SegmentProjection<T> {
    pub segment: usize,
    pub distance: T,
    pub fraction: T,
}

pub fn euclidean_distance<T>(a: ArrayView1<T>, b: ArrayView1<T>) -> T
where
    T: Float,
{
    let mut squared = T::zero();
    for i in 0..a.len() {
        let diff = a[i] - b[i];
        squared = squared + diff * diff;
    }
    squared.sqrt()
}

/// Euclidean lengths of the segments between consecutive polyline vertices.
pub fn segment_lengths<T>(points: ArrayView2<T>) -> Array1<T>
where
    T: Float,
{
    let m = points.nrows();
    if m < 2 {
        return Array1::zeros(0);
    }
    Array1::from_iter((0..m - 1).map(|i| euclidean_distance(points.row(i), points.row(i + 1))))
}

/// Cumulative arc length per vertex, starting at zero for the first vertex.
pub fn cumulative_lengths<T>(points: ArrayView2<T>) -> Array1<T>
where
    T: Float,
{
    let lengths = segment_lengths(points);
    let mut cumulative = Array1::zeros(points.nrows());
    let mut total = T::zero();
    for (i, &len) in lengths.iter().enumerate() {
        total = total + len;
        cumulative[i + 1] = total;
    }
    cumulative
}

/// Locate the polyline segment closest to `point`.
///
/// The per-segment distance is the larger of the perpendicular residual norm
/// and the distance to the nearer of the two segment endpoints, which
/// approximates the true point-to-segment distance in a single pass. Ties
/// resolve to the lowest segment index. The reported fraction is the signed
/// projection position within the segment clamped to [0, 1], so points off
/// either end of the polyline land on the nearest endpoint.
pub fn nearest_segment<T>(point: ArrayView1<T>, vertices: ArrayView2<T>) -> SegmentProjection<T>
where
    T: Float,
{
    let m = vertices.nrows();
    let mut best = SegmentProjection {
        segment: 0,
        distance: T::infinity(),
        fraction: T::zero(),
    };

    for i in 0..m.saturating_sub(1) {
        let start = vertices.row(i);
        let end = vertices.row(i + 1);

        let mut dot_vs = T::zero();
        let mut seg_sq = T::zero();
        let mut start_sq = T::zero();
        let mut end_sq = T::zero();
        for j in 0..point.len() {
            let seg = end[j] - start[j];
            let v = point[j] - start[j];
            let e = point[j] - end[j];
            dot_vs = dot_vs + v * seg;
            seg_sq = seg_sq + seg * seg;
            start_sq = start_sq + v * v;
            end_sq = end_sq + e * e;
        }

        if seg_sq <= T::zero() {
            // zero-length segment, no usable projection
            continue;
        }

        let scale = dot_vs / seg_sq;
        let mut residual_sq = T::zero();
        for j in 0..point.len() {
            let seg = end[j] - start[j];
            let r = (point[j] - start[j]) - scale * seg;
            residual_sq = residual_sq + r * r;
        }

        let endpoint = start_sq.sqrt().min(end_sq.sqrt());
        let distance = residual_sq.sqrt().max(endpoint);

        if distance < best.distance {
            best = SegmentProjection {
                segment: i,
                distance,
                fraction: scale.max(T::zero()).min(T::one()),
            };
        }
    }

    best
}
