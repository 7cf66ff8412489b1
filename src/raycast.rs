use bevy::prelude::Vec2;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RaycastTarget<K> {
    pub key: K,
    pub min: Vec2,
    pub max: Vec2,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RaycastHit<K> {
    pub key: K,
    pub point: Vec2,
    /// Position along the segment, 0 at the start and 1 at the end.
    pub fraction: f32,
}

pub fn ray_aabb_distance(
    origin: Vec2,
    dir_normalized: Vec2,
    max_distance: f32,
    min: Vec2,
    max: Vec2,
) -> Option<f32> {
    let mut tmin = 0.0f32;
    let mut tmax = max_distance.max(0.0);

    for axis in 0..2 {
        let (o, d, mn, mx) = if axis == 0 {
            (origin.x, dir_normalized.x, min.x, max.x)
        } else {
            (origin.y, dir_normalized.y, min.y, max.y)
        };
        if d.abs() < 1e-6 {
            if o < mn || o > mx {
                return None;
            }
            continue;
        }
        let inv = 1.0 / d;
        let (t1, t2) = {
            let a = (mn - o) * inv;
            let b = (mx - o) * inv;
            if a > b {
                (b, a)
            } else {
                (a, b)
            }
        };
        tmin = tmin.max(t1);
        tmax = tmax.min(t2);
        if tmin > tmax {
            return None;
        }
    }

    // Segments starting inside a box hit it at distance 0.
    (tmin <= max_distance).then_some(tmin)
}

/// Every target crossed by the segment `from -> to`, nearest first.
pub fn segment_hits<K: Copy>(
    from: Vec2,
    to: Vec2,
    targets: impl IntoIterator<Item = RaycastTarget<K>>,
) -> Vec<RaycastHit<K>> {
    let delta = to - from;
    let len = delta.length();
    if len <= 1e-6 {
        return targets
            .into_iter()
            .filter(|t| {
                from.x >= t.min.x && from.x <= t.max.x && from.y >= t.min.y && from.y <= t.max.y
            })
            .map(|t| RaycastHit {
                key: t.key,
                point: from,
                fraction: 0.0,
            })
            .collect();
    }
    let dir = delta / len;
    let mut hits: Vec<RaycastHit<K>> = targets
        .into_iter()
        .filter_map(|t| {
            ray_aabb_distance(from, dir, len, t.min, t.max).map(|d| RaycastHit {
                key: t.key,
                point: from + dir * d,
                fraction: d / len,
            })
        })
        .collect();
    hits.sort_by(|a, b| a.fraction.total_cmp(&b.fraction));
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_hits_are_sorted_and_bounded() {
        let hits = segment_hits(
            Vec2::new(0.0, 0.0),
            Vec2::new(25.0, 0.0),
            [
                RaycastTarget {
                    key: 2,
                    min: Vec2::new(20.0, -5.0),
                    max: Vec2::new(30.0, 5.0),
                },
                RaycastTarget {
                    key: 1,
                    min: Vec2::new(10.0, -5.0),
                    max: Vec2::new(15.0, 5.0),
                },
                RaycastTarget {
                    key: 3,
                    min: Vec2::new(40.0, -5.0),
                    max: Vec2::new(50.0, 5.0),
                },
            ],
        );
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].key, 1);
        assert_eq!(hits[1].key, 2);
        assert!((hits[0].fraction - 0.4).abs() < 1e-5);
        assert!((hits[1].point.x - 20.0).abs() < 1e-4);
    }

    #[test]
    fn segment_missing_box_reports_nothing() {
        let hits = segment_hits(
            Vec2::new(0.0, 10.0),
            Vec2::new(30.0, 10.0),
            [RaycastTarget {
                key: 'a',
                min: Vec2::new(10.0, -5.0),
                max: Vec2::new(15.0, 5.0),
            }],
        );
        assert!(hits.is_empty());
    }

    #[test]
    fn segment_starting_inside_hits_at_zero() {
        let hits = segment_hits(
            Vec2::new(12.0, 0.0),
            Vec2::new(30.0, 0.0),
            [RaycastTarget {
                key: 7u8,
                min: Vec2::new(10.0, -5.0),
                max: Vec2::new(15.0, 5.0),
            }],
        );
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].fraction, 0.0);
    }
}
