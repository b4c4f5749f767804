//! Ratcliff/Obershelp sequence matching
//!
//! Recursive longest-matching-block alignment over character sequences,
//! with the same tie-breaking as CPython's `difflib.SequenceMatcher`:
//! the longest block starting earliest in the left sequence wins, then
//! earliest in the right. The similarity ratio is `2 * M / T` where `M`
//! is the total matched length and `T` the sum of both sequence lengths.

use std::collections::HashMap;

/// A maximal matching block: `a[a_start..a_start+len] == b[b_start..b_start+len]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchBlock {
    /// Start index in the left sequence
    pub a_start: usize,
    /// Start index in the right sequence
    pub b_start: usize,
    /// Length of the matched run (0 only for the terminal sentinel)
    pub len: usize,
}

/// Edit operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Both sides identical over the covered ranges
    Equal,
    /// Left range replaced by right range
    Replace,
    /// Left range absent from the right side
    Delete,
    /// Right range absent from the left side
    Insert,
}

/// One edit operation covering a pair of index ranges
///
/// Over a full opcode list, the left ranges partition `[0, len(a))` and the
/// right ranges partition `[0, len(b))` with no gaps or overlaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcode {
    pub kind: OpKind,
    pub a_start: usize,
    pub a_end: usize,
    pub b_start: usize,
    pub b_end: usize,
}

/// Character-level sequence matcher
pub struct SequenceMatcher {
    a: Vec<char>,
    b: Vec<char>,
    /// Positions of each character in `b`, ascending
    b_index: HashMap<char, Vec<usize>>,
}

impl SequenceMatcher {
    /// Create a matcher over the characters of two strings
    pub fn new(a: &str, b: &str) -> Self {
        let a: Vec<char> = a.chars().collect();
        let b: Vec<char> = b.chars().collect();

        let mut b_index: HashMap<char, Vec<usize>> = HashMap::new();
        for (j, &ch) in b.iter().enumerate() {
            b_index.entry(ch).or_default().push(j);
        }

        Self { a, b, b_index }
    }

    /// Length of the left character sequence
    pub fn a_len(&self) -> usize {
        self.a.len()
    }

    /// Length of the right character sequence
    pub fn b_len(&self) -> usize {
        self.b.len()
    }

    /// Find the longest matching block within `a[a_lo..a_hi]` and `b[b_lo..b_hi]`
    ///
    /// Among blocks of maximal length, returns the one starting earliest in
    /// `a`, breaking remaining ties by the earliest start in `b`.
    fn find_longest_match(&self, a_lo: usize, a_hi: usize, b_lo: usize, b_hi: usize) -> MatchBlock {
        let mut best = MatchBlock {
            a_start: a_lo,
            b_start: b_lo,
            len: 0,
        };

        // run_len[j] = length of the common run ending at a[i], b[j]
        let mut run_len: HashMap<usize, usize> = HashMap::new();

        for i in a_lo..a_hi {
            let mut new_run_len: HashMap<usize, usize> = HashMap::new();
            if let Some(positions) = self.b_index.get(&self.a[i]) {
                for &j in positions {
                    if j < b_lo {
                        continue;
                    }
                    if j >= b_hi {
                        break;
                    }
                    let k = if j > 0 {
                        run_len.get(&(j - 1)).copied().unwrap_or(0) + 1
                    } else {
                        1
                    };
                    new_run_len.insert(j, k);
                    if k > best.len {
                        best = MatchBlock {
                            a_start: i + 1 - k,
                            b_start: j + 1 - k,
                            len: k,
                        };
                    }
                }
            }
            run_len = new_run_len;
        }

        best
    }

    /// All maximal matching blocks in order, adjacent blocks coalesced,
    /// terminated by the zero-length sentinel at `(len(a), len(b))`
    pub fn matching_blocks(&self) -> Vec<MatchBlock> {
        let mut queue = vec![(0usize, self.a.len(), 0usize, self.b.len())];
        let mut blocks: Vec<MatchBlock> = Vec::new();

        while let Some((a_lo, a_hi, b_lo, b_hi)) = queue.pop() {
            let m = self.find_longest_match(a_lo, a_hi, b_lo, b_hi);
            if m.len > 0 {
                blocks.push(m);
                if a_lo < m.a_start && b_lo < m.b_start {
                    queue.push((a_lo, m.a_start, b_lo, m.b_start));
                }
                if m.a_start + m.len < a_hi && m.b_start + m.len < b_hi {
                    queue.push((m.a_start + m.len, a_hi, m.b_start + m.len, b_hi));
                }
            }
        }

        blocks.sort_by_key(|m| (m.a_start, m.b_start));

        // Coalesce runs that are adjacent on both sides
        let mut merged: Vec<MatchBlock> = Vec::new();
        let mut cur = MatchBlock {
            a_start: 0,
            b_start: 0,
            len: 0,
        };
        for m in blocks {
            if cur.a_start + cur.len == m.a_start && cur.b_start + cur.len == m.b_start {
                cur.len += m.len;
            } else {
                if cur.len > 0 {
                    merged.push(cur);
                }
                cur = m;
            }
        }
        if cur.len > 0 {
            merged.push(cur);
        }

        merged.push(MatchBlock {
            a_start: self.a.len(),
            b_start: self.b.len(),
            len: 0,
        });
        merged
    }

    /// Similarity ratio in [0, 1]: `2 * M / T`, 1.0 when both sequences are empty
    pub fn ratio(&self) -> f64 {
        let total = self.a.len() + self.b.len();
        if total == 0 {
            return 1.0;
        }
        let matched: usize = self.matching_blocks().iter().map(|m| m.len).sum();
        2.0 * matched as f64 / total as f64
    }

    /// Edit opcodes covering both sequences in full
    pub fn opcodes(&self) -> Vec<Opcode> {
        let mut result = Vec::new();
        let mut i = 0usize;
        let mut j = 0usize;

        for m in self.matching_blocks() {
            let kind = if i < m.a_start && j < m.b_start {
                Some(OpKind::Replace)
            } else if i < m.a_start {
                Some(OpKind::Delete)
            } else if j < m.b_start {
                Some(OpKind::Insert)
            } else {
                None
            };
            if let Some(kind) = kind {
                result.push(Opcode {
                    kind,
                    a_start: i,
                    a_end: m.a_start,
                    b_start: j,
                    b_end: m.b_start,
                });
            }
            i = m.a_start + m.len;
            j = m.b_start + m.len;
            if m.len > 0 {
                result.push(Opcode {
                    kind: OpKind::Equal,
                    a_start: m.a_start,
                    a_end: i,
                    b_start: m.b_start,
                    b_end: j,
                });
            }
        }

        result
    }

    /// Substring of the left sequence by char range
    pub fn a_slice(&self, start: usize, end: usize) -> String {
        self.a[start..end].iter().collect()
    }

    /// Substring of the right sequence by char range
    pub fn b_slice(&self, start: usize, end: usize) -> String {
        self.b[start..end].iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_ratio() {
        let m = SequenceMatcher::new("ABC123", "ABC123");
        assert_eq!(m.ratio(), 1.0);
    }

    #[test]
    fn test_both_empty_ratio_is_one() {
        let m = SequenceMatcher::new("", "");
        assert_eq!(m.ratio(), 1.0);
        assert!(m.opcodes().is_empty());
    }

    #[test]
    fn test_one_empty_ratio_is_zero() {
        let m = SequenceMatcher::new("", "abc");
        assert_eq!(m.ratio(), 0.0);

        let ops = m.opcodes();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, OpKind::Insert);
        assert_eq!((ops[0].b_start, ops[0].b_end), (0, 3));
    }

    #[test]
    fn test_known_ratio() {
        // Longest common block "bcd" (3 chars), T = 8
        let m = SequenceMatcher::new("abcd", "bcde");
        assert!((m.ratio() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_contiguity_bias() {
        // One contiguous run of 3 scores higher than 3 scattered singles
        let contiguous = SequenceMatcher::new("abcxxx", "abcyyy").ratio();
        let scattered = SequenceMatcher::new("axbxcx", "aybycy").ratio();
        assert!(contiguous >= scattered);
    }

    #[test]
    fn test_single_replace_opcodes() {
        let m = SequenceMatcher::new("NDL-2024-A7", "NDL-2024-B7");
        let ops = m.opcodes();

        let replaces: Vec<_> = ops.iter().filter(|o| o.kind == OpKind::Replace).collect();
        assert_eq!(replaces.len(), 1);
        assert_eq!((replaces[0].a_start, replaces[0].a_end), (9, 10));
        assert_eq!((replaces[0].b_start, replaces[0].b_end), (9, 10));
        assert_eq!(m.a_slice(9, 10), "A");
        assert_eq!(m.b_slice(9, 10), "B");
    }

    #[test]
    fn test_opcodes_partition_both_sides() {
        let cases = [
            ("NDL-2024-A7", "NDL-2024-B7"),
            ("abcdef", "azced"),
            ("", "xyz"),
            ("xyz", ""),
            ("same", "same"),
            ("导管 ABC", "导管 ABD"),
        ];
        for (a, b) in cases {
            let m = SequenceMatcher::new(a, b);
            let ops = m.opcodes();

            let mut i = 0;
            let mut j = 0;
            for op in &ops {
                assert_eq!(op.a_start, i, "gap on left side for {:?}", (a, b));
                assert_eq!(op.b_start, j, "gap on right side for {:?}", (a, b));
                i = op.a_end;
                j = op.b_end;
            }
            assert_eq!(i, m.a_len());
            assert_eq!(j, m.b_len());
        }
    }

    #[test]
    fn test_matching_blocks_sentinel() {
        let m = SequenceMatcher::new("abc", "abd");
        let blocks = m.matching_blocks();
        let last = blocks.last().unwrap();
        assert_eq!((last.a_start, last.b_start, last.len), (3, 3, 0));
    }

    #[test]
    fn test_adjacent_blocks_coalesced() {
        // Every non-sentinel block must be maximal: no two blocks adjacent
        // on both sides may remain separate.
        let m = SequenceMatcher::new("qabxcd", "abycdf");
        let blocks = m.matching_blocks();
        for pair in blocks.windows(2) {
            let adjacent = pair[0].a_start + pair[0].len == pair[1].a_start
                && pair[0].b_start + pair[0].len == pair[1].b_start;
            assert!(!adjacent || pair[1].len == 0);
        }
    }

    #[test]
    fn test_earliest_longest_block_wins() {
        // Two equally long candidates: the one starting earliest in `a` is chosen
        let m = SequenceMatcher::new("abab", "ab");
        let blocks = m.matching_blocks();
        assert_eq!((blocks[0].a_start, blocks[0].b_start, blocks[0].len), (0, 0, 2));
    }

    #[test]
    fn test_multibyte_chars_use_char_indices() {
        let m = SequenceMatcher::new("导管A", "导管B");
        let ops = m.opcodes();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].kind, OpKind::Equal);
        assert_eq!((ops[0].a_start, ops[0].a_end), (0, 2));
        assert_eq!(ops[1].kind, OpKind::Replace);
    }
}
