//! # Frame Bitmap
//!
//! One bit per frame: set means unavailable (allocated or reserved), clear
//! means free. Frame `pfn` lives in word `pfn / 64` at bit `pfn % 64`.
//!
//! ## Run Search
//!
//! [`Bitmap::find_run`] scans a frame range for `nr_pages` consecutive clear
//! bits, first fit. Each candidate start is tested by one of three paths:
//!
//! ```text
//!            word w                 word w+1               word w+2
//!   ┌──────────────────────┐┌──────────────────────┐┌──────────────────────┐
//!   │        [ mask ]      ││                      ││                      │  SingleWord
//!   │          [ low part ]││[ full words ...      ││ tail ]               │  CrossWord
//!   [ whole words ...      ││                      ││ tail ]               │  LargeBlock
//! ```
//!
//! * **LargeBlock**: the candidate is word-aligned and `nr_pages >= 64`. Whole
//!   words are compared against zero, then the tail bits. On failure the scan
//!   skips all whole words at once.
//! * **SingleWord**: the run fits in the rest of the current word. On failure
//!   the scan advances by `nr_pages` bits.
//! * **CrossWord**: the run starts inside a word and continues past it. On
//!   failure the scan advances to the next word boundary.
//!
//! The strides keep the scan linear in words but can step over a valid run
//! that starts at an irregular offset, so the result is not always the lowest
//! fitting frame.

use crate::frame::Pfn;
use core::fmt;
use core::ops::Range;

const WORD_BITS: usize = u64::BITS as usize;

/// Which test accepted a run.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SearchPath {
    LargeBlock,
    SingleWord,
    CrossWord,
}

/// Result of a successful [`Bitmap::find_run`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RunMatch {
    pub start: Pfn,
    pub path: SearchPath,
}

/// Availability bitmap over boot-carved storage.
pub struct Bitmap<'m> {
    words: &'m mut [u64],
    bits: usize,
}

impl<'m> Bitmap<'m> {
    /// Words needed to hold `bits` bits.
    #[must_use]
    pub const fn words_for(bits: usize) -> usize {
        bits.div_ceil(WORD_BITS)
    }

    /// Wrap `words` as a bitmap of `bits` frames, keeping its contents.
    ///
    /// # Panics
    /// Panics if `words` is too short for `bits`.
    #[must_use]
    pub fn new(words: &'m mut [u64], bits: usize) -> Self {
        assert!(
            words.len() >= Self::words_for(bits),
            "bitmap storage too small"
        );
        Self { words, bits }
    }

    /// Number of frames covered.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.bits
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bits == 0
    }

    #[must_use]
    pub fn words(&self) -> &[u64] {
        &self.words[..]
    }

    /// State of `pfn`; `None` past the end.
    #[must_use]
    pub fn get(&self, pfn: Pfn) -> Option<bool> {
        (pfn.index() < self.bits).then(|| self.words[pfn.word()] & (1 << pfn.bit()) != 0)
    }

    /// Whether `pfn` is unavailable. Frames past the end count as unavailable.
    #[must_use]
    pub fn is_set(&self, pfn: Pfn) -> bool {
        self.get(pfn).unwrap_or(true)
    }

    /// Mark `pfn` unavailable; returns whether it already was.
    ///
    /// # Panics
    /// Panics if `pfn` is past the end.
    pub fn set(&mut self, pfn: Pfn) -> bool {
        assert!(pfn.index() < self.bits, "{pfn} outside bitmap");
        let word = &mut self.words[pfn.word()];
        let mask = 1 << pfn.bit();
        let was_set = *word & mask != 0;
        *word |= mask;
        was_set
    }

    /// Mark `pfn` free; returns whether it was set before.
    ///
    /// # Panics
    /// Panics if `pfn` is past the end.
    pub fn clear(&mut self, pfn: Pfn) -> bool {
        assert!(pfn.index() < self.bits, "{pfn} outside bitmap");
        let word = &mut self.words[pfn.word()];
        let mask = 1 << pfn.bit();
        let was_set = *word & mask != 0;
        *word &= !mask;
        was_set
    }

    /// Clear bits in `range`, clamped to the bitmap.
    #[must_use]
    pub fn count_clear(&self, range: Range<Pfn>) -> usize {
        let end = range.end.index().min(self.bits);
        (range.start.index()..end)
            .filter(|&i| self.words[i / WORD_BITS] & (1 << (i % WORD_BITS)) == 0)
            .count()
    }

    /// First-fit search for `nr_pages` clear bits inside `range`.
    ///
    /// Nothing is modified. Returns `None` for `nr_pages == 0` and when the
    /// range (clamped to the bitmap) is shorter than the request.
    #[must_use]
    pub fn find_run(&self, range: Range<Pfn>, nr_pages: usize) -> Option<RunMatch> {
        let start = range.start.index();
        let end = range.end.index().min(self.bits);
        if nr_pages == 0 || end < start.checked_add(nr_pages)? {
            return None;
        }

        let last = end - nr_pages;
        let mut bit = start;
        while bit <= last {
            let word = bit / WORD_BITS;
            let offset = bit % WORD_BITS;

            if nr_pages >= WORD_BITS && offset == 0 {
                let whole = nr_pages / WORD_BITS;
                if self.clear_from_word(word, nr_pages) {
                    return Some(RunMatch {
                        start: Pfn::new(bit),
                        path: SearchPath::LargeBlock,
                    });
                }
                bit += whole * WORD_BITS;
                continue;
            }

            let remaining = WORD_BITS - offset;
            if remaining >= nr_pages {
                let mask = low_mask(nr_pages) << offset;
                if self.words[word] & mask == 0 {
                    return Some(RunMatch {
                        start: Pfn::new(bit),
                        path: SearchPath::SingleWord,
                    });
                }
                bit += nr_pages;
            } else {
                let low = low_mask(remaining) << offset;
                if self.words[word] & low == 0 && self.clear_from_word(word + 1, nr_pages - remaining)
                {
                    return Some(RunMatch {
                        start: Pfn::new(bit),
                        path: SearchPath::CrossWord,
                    });
                }
                bit += remaining;
            }
        }

        None
    }

    /// Whether `count` bits starting at bit 0 of `word` are all clear.
    fn clear_from_word(&self, word: usize, count: usize) -> bool {
        let whole = count / WORD_BITS;
        let tail = count % WORD_BITS;
        self.words[word..word + whole].iter().all(|&w| w == 0)
            && (tail == 0 || self.words[word + whole] & low_mask(tail) == 0)
    }
}

/// Mask of the lowest `n` bits, `1 <= n <= 64`.
const fn low_mask(n: usize) -> u64 {
    if n >= WORD_BITS {
        u64::MAX
    } else {
        (1 << n) - 1
    }
}

impl fmt::Debug for Bitmap<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("bits", &self.bits)
            .field("clear", &self.count_clear(Pfn::new(0)..Pfn::new(self.bits)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(range: Range<usize>) -> Range<Pfn> {
        Pfn::new(range.start)..Pfn::new(range.end)
    }

    #[test]
    fn set_and_clear_report_previous_state() {
        let mut words = [0u64; 2];
        let mut bitmap = Bitmap::new(&mut words, 100);
        assert!(!bitmap.set(Pfn::new(70)));
        assert!(bitmap.set(Pfn::new(70)));
        assert_eq!(bitmap.get(Pfn::new(70)), Some(true));
        assert_eq!(bitmap.words()[1], 1 << 6);
        assert!(bitmap.clear(Pfn::new(70)));
        assert!(!bitmap.clear(Pfn::new(70)));
        assert_eq!(bitmap.get(Pfn::new(100)), None);
        assert!(bitmap.is_set(Pfn::new(100)));
        assert_eq!(bitmap.count_clear(run(0..200)), 100);
    }

    #[test]
    #[should_panic(expected = "outside bitmap")]
    fn set_past_end_panics() {
        let mut words = [0u64; 1];
        let mut bitmap = Bitmap::new(&mut words, 10);
        bitmap.set(Pfn::new(10));
    }

    #[test]
    fn single_page_uses_single_word_path() {
        let mut words = [0u64; 2];
        words[0] = 0b1011;
        let bitmap = Bitmap::new(&mut words, 128);
        assert_eq!(
            bitmap.find_run(run(0..128), 1),
            Some(RunMatch {
                start: Pfn::new(2),
                path: SearchPath::SingleWord
            })
        );
    }

    #[test]
    fn run_at_frame_zero_is_found() {
        let mut words = [0u64; 1];
        let bitmap = Bitmap::new(&mut words, 16);
        assert_eq!(
            bitmap.find_run(run(0..16), 4).map(|m| m.start),
            Some(Pfn::new(0))
        );
    }

    #[test]
    fn large_block_is_word_aligned() {
        let mut words = [0u64; 4];
        words[0] = 1 << 63;
        let bitmap = Bitmap::new(&mut words, 256);
        let found = bitmap.find_run(run(0..256), 64).expect("run");
        assert_eq!(found.path, SearchPath::LargeBlock);
        assert_eq!(found.start, Pfn::new(64));
        assert_eq!(found.start.index() & 63, 0);
    }

    #[test]
    fn large_block_checks_tail_bits() {
        let mut words = [0u64; 3];
        // Frame 64 + 64 + 3 is inside the tail of a 70-page run at 64.
        words[2] = 1 << 3;
        let bitmap = Bitmap::new(&mut words, 192);
        assert_eq!(bitmap.find_run(run(64..192), 70), None);

        words[2] = 1 << 6;
        let bitmap = Bitmap::new(&mut words, 192);
        assert_eq!(
            bitmap.find_run(run(64..192), 70),
            Some(RunMatch {
                start: Pfn::new(64),
                path: SearchPath::LargeBlock
            })
        );
    }

    #[test]
    fn cross_word_run_of_two_words() {
        // Zone [32, 160): a 128-page request has exactly one candidate.
        let mut words = [0u64; 3];
        let bitmap = Bitmap::new(&mut words, 192);
        assert_eq!(
            bitmap.find_run(run(32..160), 128),
            Some(RunMatch {
                start: Pfn::new(32),
                path: SearchPath::CrossWord
            })
        );

        for blocked in [40, 63, 64, 127, 150, 159] {
            let mut words = [0u64; 3];
            let mut bitmap = Bitmap::new(&mut words, 192);
            bitmap.set(Pfn::new(blocked));
            assert_eq!(bitmap.find_run(run(32..160), 128), None, "blocked {blocked}");
        }
    }

    #[test]
    fn cross_word_small_run() {
        let mut words = [0u64; 2];
        words[0] = !(1 << 63);
        let bitmap = Bitmap::new(&mut words, 128);
        // Candidates at 0, 3, ..., 60 fail inside word 0; the one at 63 spans
        // into word 1.
        assert_eq!(
            bitmap.find_run(run(0..128), 3),
            Some(RunMatch {
                start: Pfn::new(63),
                path: SearchPath::CrossWord
            })
        );
    }

    #[test]
    fn search_stays_inside_range() {
        let mut words = [0u64; 1];
        let bitmap = Bitmap::new(&mut words, 16);
        assert_eq!(bitmap.find_run(run(8..16), 9), None);
        assert_eq!(bitmap.find_run(run(8..16), 0), None);
        assert_eq!(bitmap.find_run(run(8..40), 8).map(|m| m.start), Some(Pfn::new(8)));
        assert_eq!(bitmap.find_run(run(10..40), 8), None);
    }

    #[test]
    fn failed_single_word_candidate_strides_by_request() {
        // Bits 0..=1 set. A 4-page candidate at 0 fails, the next one is at 4
        // even though 2..6 would also fit.
        let mut words = [0b11u64];
        let bitmap = Bitmap::new(&mut words, 64);
        assert_eq!(bitmap.find_run(run(0..64), 4).map(|m| m.start), Some(Pfn::new(4)));
    }
}
