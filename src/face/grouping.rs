//! Clustering of raw cascade hits into face regions

/// Relative tolerance for two hits to count as the same face
pub(crate) const GROUP_EPS: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    fn similar(&self, other: &Rect, eps: f64) -> bool {
        let delta = eps
            * (self.width.min(other.width) + self.height.min(other.height)) as f64
            * 0.5;
        ((self.x - other.x).abs() as f64) <= delta
            && ((self.y - other.y).abs() as f64) <= delta
            && ((self.x + self.width - other.x - other.width).abs() as f64) <= delta
            && ((self.y + self.height - other.y - other.height).abs() as f64) <= delta
    }
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Cluster overlapping hits and keep the clusters with more than
/// `min_neighbors` members.
///
/// Each kept cluster is reported as its averaged rectangle together with its
/// member count. Clusters sitting inside a stronger cluster are dropped. With
/// `min_neighbors == 0` every hit is returned as-is.
pub(crate) fn group_rectangles(rects: &[Rect], min_neighbors: u32, eps: f64) -> Vec<(Rect, u32)> {
    if min_neighbors == 0 {
        return rects.iter().map(|r| (*r, 1)).collect();
    }

    let mut parent: Vec<usize> = (0..rects.len()).collect();
    for i in 0..rects.len() {
        for j in (i + 1)..rects.len() {
            if rects[i].similar(&rects[j], eps) {
                let (a, b) = (find(&mut parent, i), find(&mut parent, j));
                if a != b {
                    parent[b] = a;
                }
            }
        }
    }

    // Cluster ids in order of first appearance
    let mut cluster_of_root = vec![usize::MAX; rects.len()];
    let mut totals: Vec<([i64; 4], u32)> = Vec::new();
    for (i, rect) in rects.iter().enumerate() {
        let root = find(&mut parent, i);
        if cluster_of_root[root] == usize::MAX {
            cluster_of_root[root] = totals.len();
            totals.push(([0; 4], 0));
        }
        let (sum, count) = &mut totals[cluster_of_root[root]];
        sum[0] += rect.x as i64;
        sum[1] += rect.y as i64;
        sum[2] += rect.width as i64;
        sum[3] += rect.height as i64;
        *count += 1;
    }

    let clusters: Vec<(Rect, u32)> = totals
        .iter()
        .map(|(sum, count)| {
            let n = *count as f64;
            let avg = |v: i64| (v as f64 / n).round() as i32;
            (
                Rect {
                    x: avg(sum[0]),
                    y: avg(sum[1]),
                    width: avg(sum[2]),
                    height: avg(sum[3]),
                },
                *count,
            )
        })
        .collect();

    clusters
        .iter()
        .enumerate()
        .filter(|(i, (r1, n1))| {
            if *n1 <= min_neighbors {
                return false;
            }
            let nested = clusters.iter().enumerate().any(|(j, (r2, n2))| {
                if j == *i || *n2 <= min_neighbors {
                    return false;
                }
                let dx = (r2.width as f64 * eps).round() as i32;
                let dy = (r2.height as f64 * eps).round() as i32;
                r1.x >= r2.x - dx
                    && r1.y >= r2.y - dy
                    && r1.x + r1.width <= r2.x + r2.width + dx
                    && r1.y + r1.height <= r2.y + r2.height + dy
                    && (*n2 > (*n1).max(3) || *n1 < 3)
            });
            !nested
        })
        .map(|(_, cluster)| *cluster)
        .collect()
}
