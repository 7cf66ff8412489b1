use super::TmxError;

/// Rectangular patch of tile ids with its own origin, as stored by infinite maps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    /// Row-major, `width * height` entries, 0 means empty.
    pub data: Vec<u32>,
}

impl Chunk {
    pub fn tile(&self, x: u32, y: u32) -> u32 {
        self.data[(y * self.width + x) as usize]
    }
}

/// Dense grid produced from one or more chunks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergedGrid {
    pub offset_x: i32,
    pub offset_y: i32,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u32>,
}

/// Parses comma separated, newline delimited tile ids in row-major order.
///
/// Blank lines and trailing commas are tolerated, any other token that is not a non-negative
/// integer fails the whole parse.
pub fn parse_csv(text: &str) -> Result<Vec<u32>, TmxError> {
    let mut out = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        for token in line.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let id = token.parse::<u32>().map_err(|_| TmxError::InvalidTile {
                token: token.to_string(),
            })?;
            out.push(id);
        }
    }
    Ok(out)
}

/// Merges chunks into a single zero-filled grid whose origin is the smallest chunk origin.
///
/// All chunks must share the size of the first one.
pub fn merge_chunks(chunks: &[Chunk]) -> Result<MergedGrid, TmxError> {
    let first = chunks.first().ok_or(TmxError::NoChunks)?;
    let (chunk_w, chunk_h) = (first.width, first.height);

    let mut x_min = first.x;
    let mut x_max = first.x;
    let mut y_min = first.y;
    let mut y_max = first.y;
    for c in chunks {
        if c.width != chunk_w || c.height != chunk_h {
            return Err(TmxError::ChunkSizeMismatch {
                x: c.x,
                y: c.y,
                width: c.width,
                height: c.height,
                expected_width: chunk_w,
                expected_height: chunk_h,
            });
        }
        let expected = (c.width * c.height) as usize;
        if c.data.len() != expected {
            return Err(TmxError::DataLength {
                expected,
                found: c.data.len(),
            });
        }
        x_min = x_min.min(c.x);
        x_max = x_max.max(c.x);
        y_min = y_min.min(c.y);
        y_max = y_max.max(c.y);
    }

    let width = (x_max - x_min) as u32 + chunk_w;
    let height = (y_max - y_min) as u32 + chunk_h;
    let mut data = vec![0u32; width as usize * height as usize];

    for c in chunks {
        let base_x = (c.x - x_min) as u32;
        let base_y = (c.y - y_min) as u32;
        for y in 0..chunk_h {
            let row = ((base_y + y) * width + base_x) as usize;
            let src = (y * chunk_w) as usize;
            data[row..row + chunk_w as usize]
                .copy_from_slice(&c.data[src..src + chunk_w as usize]);
        }
    }

    Ok(MergedGrid {
        offset_x: x_min,
        offset_y: y_min,
        width,
        height,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn chunk(x: i32, y: i32, w: u32, h: u32, set: &[(u32, u32, u32)]) -> Chunk {
        let mut data = vec![0; (w * h) as usize];
        for &(cx, cy, v) in set {
            data[(cy * w + cx) as usize] = v;
        }
        Chunk {
            x,
            y,
            width: w,
            height: h,
            data,
        }
    }

    #[test]
    fn two_side_by_side_chunks_with_negative_origin() {
        let a = chunk(0, -32, 16, 16, &[(14, 9, 7)]);
        let b = chunk(16, -32, 16, 16, &[(0, 11, 9)]);
        let merged = merge_chunks(&[a, b]).expect("merge");

        assert_eq!((merged.width, merged.height), (32, 16));
        assert_eq!((merged.offset_x, merged.offset_y), (0, -32));
        assert_eq!(merged.data[(9 * 32 + 14) as usize], 7);
        assert_eq!(merged.data[(11 * 32 + 16) as usize], 9);
        assert_eq!(merged.data.iter().filter(|v| **v != 0).count(), 2);
    }

    #[test]
    fn single_chunk_at_origin_is_identity() {
        let data: Vec<u32> = (0..12).collect();
        let c = Chunk {
            x: 0,
            y: 0,
            width: 4,
            height: 3,
            data: data.clone(),
        };
        let merged = merge_chunks(&[c]).expect("merge");
        assert_eq!(merged.data, data);
        assert_eq!((merged.offset_x, merged.offset_y), (0, 0));
        assert_eq!((merged.width, merged.height), (4, 3));
    }

    #[test]
    fn gaps_between_chunks_stay_empty() {
        let a = chunk(-8, -8, 4, 4, &[(0, 0, 1)]);
        let b = chunk(8, 8, 4, 4, &[(3, 3, 2)]);
        let merged = merge_chunks(&[a, b]).expect("merge");
        assert_eq!((merged.width, merged.height), (20, 20));
        assert_eq!(merged.data[0], 1);
        assert_eq!(merged.data[(19 * 20 + 19) as usize], 2);
        assert_eq!(merged.data.iter().filter(|v| **v != 0).count(), 2);
    }

    #[test]
    fn heterogeneous_chunk_sizes_are_rejected() {
        let a = chunk(0, 0, 16, 16, &[]);
        let b = chunk(16, 0, 8, 16, &[]);
        assert!(matches!(
            merge_chunks(&[a, b]),
            Err(TmxError::ChunkSizeMismatch { width: 8, .. })
        ));
    }

    #[test]
    fn empty_chunk_list_is_an_error() {
        assert!(matches!(merge_chunks(&[]), Err(TmxError::NoChunks)));
    }

    #[test]
    fn random_chunk_sets_keep_every_cell_in_place() {
        let mut rng = SmallRng::seed_from_u64(0x5eed);
        for _ in 0..64 {
            let w = rng.gen_range(1..6u32);
            let h = rng.gen_range(1..6u32);
            let count = rng.gen_range(1..6usize);
            let mut chunks: Vec<Chunk> = Vec::new();
            while chunks.len() < count {
                let x = rng.gen_range(-4..4) * w as i32;
                let y = rng.gen_range(-4..4) * h as i32;
                if chunks.iter().any(|c| c.x == x && c.y == y) {
                    continue;
                }
                let data = (0..w * h).map(|_| rng.gen_range(1..50u32)).collect();
                chunks.push(Chunk {
                    x,
                    y,
                    width: w,
                    height: h,
                    data,
                });
            }

            let merged = merge_chunks(&chunks).expect("merge");
            let min_x = chunks.iter().map(|c| c.x).min().unwrap_or(0);
            let max_x = chunks.iter().map(|c| c.x).max().unwrap_or(0);
            let min_y = chunks.iter().map(|c| c.y).min().unwrap_or(0);
            let max_y = chunks.iter().map(|c| c.y).max().unwrap_or(0);
            assert_eq!(merged.width, (max_x - min_x) as u32 + w);
            assert_eq!(merged.height, (max_y - min_y) as u32 + h);
            assert_eq!((merged.offset_x, merged.offset_y), (min_x, min_y));

            let mut covered = vec![false; merged.data.len()];
            for c in &chunks {
                for cy in 0..h {
                    for cx in 0..w {
                        let mx = (c.x - min_x) as u32 + cx;
                        let my = (c.y - min_y) as u32 + cy;
                        let idx = (my * merged.width + mx) as usize;
                        assert_eq!(merged.data[idx], c.tile(cx, cy));
                        covered[idx] = true;
                    }
                }
            }
            for (idx, value) in merged.data.iter().enumerate() {
                if !covered[idx] {
                    assert_eq!(*value, 0);
                }
            }
        }
    }

    #[test]
    fn csv_tolerates_trailing_commas_and_blank_lines() {
        let text = "\n1,2,3,\n\n4,5,6,\n  7, 8 ,9\n";
        assert_eq!(parse_csv(text).expect("csv"), vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn csv_rejects_non_integer_tokens() {
        assert!(matches!(
            parse_csv("1,2,x\n"),
            Err(TmxError::InvalidTile { token }) if token == "x"
        ));
        assert!(parse_csv("1,-2").is_err());
        assert!(parse_csv("1.5").is_err());
    }

    #[test]
    fn csv_values_reserialize_row_major() {
        let text = "0,0,1,\n2,0,0,\n0,3,0";
        let values = parse_csv(text).expect("csv");
        let joined = values
            .chunks(3)
            .map(|row| {
                row.iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .collect::<Vec<_>>()
            .join(",\n");
        let strip = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
        assert_eq!(strip(&joined), strip(text.trim_end_matches(',')));
    }
}
