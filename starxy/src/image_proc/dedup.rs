//! Minimum-separation filtering of refined sources.
//!
//! Sources are accepted greedily in their incoming order; a source closer
//! than `dlim` to anything already accepted is discarded. Accepted positions
//! are bucketed on a grid with cell size `dlim`, so every candidate only
//! checks the 3x3 block of cells around it.

use std::collections::HashMap;

use super::centroid::Source;

struct AcceptedGrid {
    cell: f64,
    cells: HashMap<(i64, i64), Vec<Source>>,
}

impl AcceptedGrid {
    fn new(cell: f64) -> Self {
        Self {
            cell,
            cells: HashMap::new(),
        }
    }

    fn key(&self, source: &Source) -> (i64, i64) {
        (
            (source.x / self.cell).floor() as i64,
            (source.y / self.cell).floor() as i64,
        )
    }

    fn has_neighbor_within(&self, source: &Source, dlim: f64) -> bool {
        let (cx, cy) = self.key(source);
        (-1..=1).any(|dy| {
            (-1..=1).any(|dx| {
                self.cells
                    .get(&(cx + dx, cy + dy))
                    .is_some_and(|bucket| bucket.iter().any(|s| s.distance(source) < dlim))
            })
        })
    }

    fn insert(&mut self, source: Source) {
        self.cells.entry(self.key(&source)).or_default().push(source);
    }
}

/// Drop sources within `dlim` of an earlier one and cap the total at
/// `maxnpeaks`.
///
/// Every pair in the result is at least `dlim` apart and the relative order of
/// survivors is unchanged.
pub fn deduplicate(sources: Vec<Source>, dlim: f64, maxnpeaks: usize) -> Vec<Source> {
    let mut grid = AcceptedGrid::new(dlim);
    let mut accepted = Vec::with_capacity(sources.len().min(maxnpeaks));
    let mut rejected = 0usize;

    for source in sources {
        if accepted.len() >= maxnpeaks {
            break;
        }
        if grid.has_neighbor_within(&source, dlim) {
            rejected += 1;
            continue;
        }
        grid.insert(source);
        accepted.push(source);
    }

    log::debug!(
        "Deduplication kept {} sources, {} closer than {:.2} px removed",
        accepted.len(),
        rejected,
        dlim
    );
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(x: f64, y: f64) -> Source {
        Source {
            x,
            y,
            flux: 1.0,
            background: 0.0,
        }
    }

    #[test]
    fn test_close_pair_keeps_first() {
        let kept = deduplicate(vec![source(10.0, 10.0), source(11.0, 10.5)], 2.0, 100);
        assert_eq!(kept, vec![source(10.0, 10.0)]);
    }

    #[test]
    fn test_exactly_dlim_apart_is_kept() {
        let kept = deduplicate(vec![source(0.0, 0.0), source(3.0, 4.0)], 5.0, 100);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_neighbours_across_cell_boundaries() {
        // 2.9 and 3.1 fall in different cells of size 3
        let kept = deduplicate(vec![source(2.9, 2.9), source(3.1, 3.1)], 3.0, 100);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_rejected_source_does_not_block_others() {
        // B is too close to A and dropped, C is close to B but not to A
        let kept = deduplicate(
            vec![source(0.0, 0.0), source(1.5, 0.0), source(3.0, 0.0)],
            2.0,
            100,
        );
        assert_eq!(kept, vec![source(0.0, 0.0), source(3.0, 0.0)]);
    }

    #[test]
    fn test_cap_applies_after_filtering() {
        let sources = vec![
            source(0.0, 0.0),
            source(0.5, 0.0),
            source(10.0, 0.0),
            source(20.0, 0.0),
        ];
        let kept = deduplicate(sources, 1.0, 2);
        assert_eq!(kept, vec![source(0.0, 0.0), source(10.0, 0.0)]);
    }

    #[test]
    fn test_pairwise_separation_holds() {
        let sources: Vec<Source> = (0..400)
            .map(|i| source((i * 37 % 101) as f64 * 0.7, (i * 53 % 97) as f64 * 0.6))
            .collect();
        let kept = deduplicate(sources, 4.0, usize::MAX);
        for (i, a) in kept.iter().enumerate() {
            for b in &kept[i + 1..] {
                assert!(a.distance(b) >= 4.0);
            }
        }
    }
}
