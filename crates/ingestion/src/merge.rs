//! Chronological merge of partitioned tick streams.
//!
//! Output order is `(ts_ns, instrument, partition)` ascending. Within a
//! partition, input order is preserved. Two paths produce the same sequence:
//! a streaming k-way heap merge and a concatenate-then-stable-sort used when
//! all partitions are already in memory and small.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use replay_core::Tick;

/// Merged ticks plus whether the row cap cut the merge short.
#[derive(Debug, Clone, Default)]
pub struct MergeOutput {
    pub ticks: Vec<Tick>,
    pub early_stop: bool,
}

struct HeapEntry {
    partition: usize,
    tick: Tick,
}

impl HeapEntry {
    #[inline]
    fn key(&self) -> (i64, &str, usize) {
        (self.tick.ts_ns, self.tick.instrument.as_str(), self.partition)
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// K-way merge over per-partition tick iterators.
///
/// Each partition contributes at most one heap entry at a time; popping an
/// entry pulls that partition's next tick.
pub struct TickMerger<I: Iterator<Item = Tick>> {
    sources: Vec<I>,
    heap: BinaryHeap<Reverse<HeapEntry>>,
    max_rows: Option<u64>,
    emitted: u64,
    early_stop: bool,
}

impl<I: Iterator<Item = Tick>> TickMerger<I> {
    /// Create a merger. Partition index is the position in `sources`.
    pub fn new(sources: Vec<I>, max_rows: Option<u64>) -> Self {
        let mut merger = Self {
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            max_rows,
            emitted: 0,
            early_stop: false,
        };
        for partition in 0..merger.sources.len() {
            merger.refill(partition);
        }
        merger
    }

    fn refill(&mut self, partition: usize) {
        if let Some(tick) = self.sources[partition].next() {
            self.heap.push(Reverse(HeapEntry { partition, tick }));
        }
    }

    /// Ticks emitted so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Whether the row cap stopped the merge while input remained.
    pub fn early_stopped(&self) -> bool {
        self.early_stop
    }
}

impl<I: Iterator<Item = Tick>> Iterator for TickMerger<I> {
    type Item = Tick;

    fn next(&mut self) -> Option<Tick> {
        if let Some(cap) = self.max_rows {
            if self.emitted >= cap {
                if !self.heap.is_empty() {
                    self.early_stop = true;
                }
                return None;
            }
        }
        let Reverse(HeapEntry { partition, tick }) = self.heap.pop()?;
        self.refill(partition);
        self.emitted += 1;
        Some(tick)
    }
}

/// Streaming merge of owned partitions.
pub fn kmerge(partitions: Vec<Vec<Tick>>, max_rows: Option<u64>) -> TickMerger<std::vec::IntoIter<Tick>> {
    TickMerger::new(partitions.into_iter().map(Vec::into_iter).collect(), max_rows)
}

/// Merge by concatenating every partition and stable-sorting.
pub fn merge_by_sort(partitions: Vec<Vec<Tick>>, max_rows: Option<u64>) -> MergeOutput {
    let total: usize = partitions.iter().map(Vec::len).sum();
    let mut tagged: Vec<(usize, Tick)> = Vec::with_capacity(total);
    for (partition, ticks) in partitions.into_iter().enumerate() {
        tagged.extend(ticks.into_iter().map(|t| (partition, t)));
    }
    tagged.sort_by(|(pa, a), (pb, b)| {
        (a.ts_ns, a.instrument.as_str(), *pa).cmp(&(b.ts_ns, b.instrument.as_str(), *pb))
    });

    let cap = max_rows.map(|n| n as usize).unwrap_or(usize::MAX);
    let early_stop = tagged.len() > cap;
    tagged.truncate(cap);
    MergeOutput {
        ticks: tagged.into_iter().map(|(_, t)| t).collect(),
        early_stop,
    }
}

/// Drain a streaming merge into a [`MergeOutput`].
pub fn merge_by_heap(partitions: Vec<Vec<Tick>>, max_rows: Option<u64>) -> MergeOutput {
    let mut merger = kmerge(partitions, max_rows);
    let ticks: Vec<Tick> = merger.by_ref().collect();
    MergeOutput {
        ticks,
        early_stop: merger.early_stopped(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(instrument: &str, ts_ns: i64, price: f64) -> Tick {
        Tick {
            instrument: instrument.to_string(),
            ts_ns,
            last_price: price,
            volume: 0.0,
            bid_px: price - 1.0,
            bid_sz: 1.0,
            ask_px: price + 1.0,
            ask_sz: 1.0,
        }
    }

    fn fixture() -> Vec<Vec<Tick>> {
        vec![
            vec![tick("rb2405", 1, 1.0), tick("rb2405", 3, 2.0), tick("rb2405", 5, 3.0)],
            vec![tick("ag2406", 1, 4.0), tick("rb2405", 3, 5.0), tick("zn2407", 3, 6.0)],
            vec![tick("cu2405", 2, 7.0), tick("rb2405", 3, 8.0), tick("cu2405", 9, 9.0)],
            vec![],
        ]
    }

    // Reconstruct origin partition from the unique prices in the fixture.
    fn origin(t: &Tick) -> usize {
        match t.last_price as i64 {
            1..=3 => 0,
            4..=6 => 1,
            _ => 2,
        }
    }

    #[test]
    fn test_heap_merge_ordering() {
        let out = merge_by_heap(fixture(), None);
        assert_eq!(out.ticks.len(), 9);
        assert!(!out.early_stop);
        for w in out.ticks.windows(2) {
            let (a, b) = (&w[0], &w[1]);
            assert!(a.ts_ns <= b.ts_ns);
            if a.ts_ns == b.ts_ns {
                assert!(a.instrument <= b.instrument);
                if a.instrument == b.instrument {
                    assert!(origin(a) <= origin(b));
                }
            }
        }
        let at_three: Vec<(String, f64)> = out
            .ticks
            .iter()
            .filter(|t| t.ts_ns == 3)
            .map(|t| (t.instrument.clone(), t.last_price))
            .collect();
        assert_eq!(
            at_three,
            vec![
                ("rb2405".to_string(), 2.0),
                ("rb2405".to_string(), 5.0),
                ("rb2405".to_string(), 8.0),
                ("zn2407".to_string(), 6.0),
            ]
        );
    }

    #[test]
    fn test_heap_and_sort_paths_agree() {
        for cap in [None, Some(1), Some(4), Some(9), Some(100)] {
            let heap = merge_by_heap(fixture(), cap);
            let sort = merge_by_sort(fixture(), cap);
            assert_eq!(heap.ticks, sort.ticks, "cap {cap:?}");
            assert_eq!(heap.early_stop, sort.early_stop, "cap {cap:?}");
        }
    }

    #[test]
    fn test_cap_reports_early_stop() {
        let mut merger = kmerge(fixture(), Some(4));
        let taken: Vec<Tick> = merger.by_ref().collect();
        assert_eq!(taken.len(), 4);
        assert_eq!(merger.emitted(), 4);
        assert!(merger.early_stopped());

        let mut exact = kmerge(fixture(), Some(9));
        assert_eq!(exact.by_ref().count(), 9);
        assert!(!exact.early_stopped());
    }

    #[test]
    fn test_empty_input() {
        let out = merge_by_heap(vec![], Some(10));
        assert!(out.ticks.is_empty());
        assert!(!out.early_stop);
    }
}
