//! Alignment of two wrapping identifier streams.
//!
//! Two devices record the same trigger sequence but each labels events with a small,
//! wrapping identifier (typically a 3 bit BCID) and either may drop, duplicate or fail to
//! read out an event. The streams are in sync over a run of indices when the modular
//! difference of their identifiers stays constant. [`find_sync`] walks both streams and
//! reports the runs it accepts as [`MatchBlock`]s, together with loss statistics.
//!
//! Missing samples are `None` and never take part in a run.
//!
//! The candidate search in [`find_max_rle`] only moves one cursor at a time (a zig-zag over
//! `(o1, o2+k)` and `(o1+k, o2)`), so runs that start past both cursors are not found from
//! that position. This is kept for compatibility with existing re-synchronised data.
use super::constants::*;
use super::error::CorrelatorError;

/// `length` consecutive events starting at `offset1` in the first stream match those
/// starting at `offset2` in the second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchBlock {
    pub offset1: usize,
    pub offset2: usize,
    pub length: usize,
}

impl MatchBlock {
    pub fn new(offset1: usize, offset2: usize, length: usize) -> Self {
        Self {
            offset1,
            offset2,
            length,
        }
    }
}

/// A run of constant identifier difference found from a pair of start offsets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Run {
    pub offset1: usize,
    pub offset2: usize,
    pub length: usize,
    /// The modular identifier difference held over the run.
    pub difference: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncParams {
    /// Identifiers wrap at this value.
    pub modulus: u32,
    /// Number of candidate offset pairs examined per position.
    pub range: usize,
    /// Runs shorter than this are not trusted.
    pub min_run: usize,
}

impl Default for SyncParams {
    fn default() -> Self {
        Self {
            modulus: DEFAULT_ID_MODULUS,
            range: DEFAULT_SEARCH_RANGE,
            min_run: MIN_MATCH_RUN,
        }
    }
}

impl SyncParams {
    pub fn validate(&self) -> Result<(), CorrelatorError> {
        if self.modulus == 0 {
            return Err(CorrelatorError::ZeroModulus);
        }
        if self.min_run == 0 {
            return Err(CorrelatorError::ZeroMinRun);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub blocks: Vec<MatchBlock>,
    /// Identifier difference of each block, parallel to `blocks`.
    pub phases: Vec<u32>,
    pub n_synced: usize,
    pub n_dropped1: usize,
    pub n_dropped2: usize,
    pub n_resyncs: usize,
    pub n_phase_loss: usize,
    pub initial_phase: Option<u32>,
}

fn mod_diff(a: u32, b: u32, modulus: u32) -> u32 {
    let m = modulus as u64;
    (((a as u64 % m) + m - (b as u64 % m)) % m) as u32
}

/// Length of the run of constant identifier difference starting at `(offset1, offset2)`.
/// A missing sample at the start gives length 0.
pub fn rle_encode_single(
    v1: &[Option<u32>],
    v2: &[Option<u32>],
    offset1: usize,
    offset2: usize,
    modulus: u32,
) -> Run {
    let (Some(Some(a)), Some(Some(b))) = (v1.get(offset1), v2.get(offset2)) else {
        return Run {
            offset1,
            offset2,
            length: 0,
            difference: 0,
        };
    };
    let check = mod_diff(*a, *b, modulus);
    let mut index = 1;
    while offset1 + index < v1.len() && offset2 + index < v2.len() {
        match (v1[offset1 + index], v2[offset2 + index]) {
            (Some(x), Some(y)) if mod_diff(x, y, modulus) == check => index += 1,
            _ => break,
        }
    }
    Run {
        offset1,
        offset2,
        length: index,
        difference: check,
    }
}

/// The longest run reachable from `(offset1, offset2)` within `params.range` candidates.
///
/// Candidates alternate between advancing the second stream and the first:
/// `(o1, o2+1), (o1+1, o2), (o1, o2+2), (o1+2, o2), ...`. A longer candidate only replaces
/// the current best if it does not lie entirely behind it.
pub fn find_max_rle(
    v1: &[Option<u32>],
    v2: &[Option<u32>],
    offset1: usize,
    offset2: usize,
    params: &SyncParams,
) -> Run {
    let mut best = rle_encode_single(v1, v2, offset1, offset2, params.modulus);
    for count in 0..=params.range {
        let (i, j) = if count % 2 == 1 {
            (1 + count / 2, 0)
        } else {
            (0, 1 + count / 2)
        };
        let (c1, c2) = (offset1 + i, offset2 + j);
        if c1 >= v1.len() || c2 >= v2.len() {
            continue;
        }
        if v1[c1].is_none() || v2[c2].is_none() {
            continue;
        }
        let candidate = rle_encode_single(v1, v2, c1, c2, params.modulus);
        if candidate.length > best.length
            && (best.length < 2
                || c1 < best.offset1 + best.length
                || c2 < best.offset2 + best.length)
        {
            best = candidate;
        }
    }
    best
}

/// Align two identifier streams.
///
/// Runs of at least `min_run` are accepted. A shorter run is accepted only when it reaches
/// the end of either stream and continues the previous block's alignment and phase, so a
/// stream that simply ends keeps its last events. Every event is either synced or counted as
/// dropped: `n_synced + n_dropped1 == v1.len()` and likewise for the second stream.
pub fn find_sync(
    v1: &[Option<u32>],
    v2: &[Option<u32>],
    params: &SyncParams,
) -> Result<SyncReport, CorrelatorError> {
    params.validate()?;
    let mut report = SyncReport::default();
    if let (Some(Some(a)), Some(Some(b))) = (v1.first(), v2.first()) {
        report.initial_phase = Some(mod_diff(*a, *b, params.modulus));
    }
    let mut current_phase = report.initial_phase;
    let mut current_diff: i64 = 0;
    let (mut num1, mut num2) = (0usize, 0usize);

    spdlog::debug!(
        "Looking for synchronous sections in {}/{} events, range {}",
        v1.len(),
        v2.len(),
        params.range
    );
    while num1 < v1.len() && num2 < v2.len() {
        let best = find_max_rle(v1, v2, num1, num2, params);
        let diff = best.offset1 as i64 - best.offset2 as i64;
        let continues_tail = best.length > 0
            && !report.blocks.is_empty()
            && (best.offset1 + best.length == v1.len() || best.offset2 + best.length == v2.len())
            && diff == current_diff
            && current_phase == Some(best.difference);
        if best.length < params.min_run && !continues_tail {
            num1 += 1;
            num2 += 1;
            report.n_dropped1 += 1;
            report.n_dropped2 += 1;
            continue;
        }

        if current_phase.is_none() {
            current_phase = Some(best.difference);
            report.initial_phase = current_phase;
        }
        if diff != current_diff {
            spdlog::info!(
                "Resyncing streams at {}/{} to {}/{}, run length {}",
                num1,
                num2,
                best.offset1,
                best.offset2,
                best.length
            );
            report.n_resyncs += 1;
            current_diff = diff;
        } else if best.offset1 > num1 {
            let skipped = best.offset1 - num1;
            spdlog::debug!("Skipped over {} events at {}/{}", skipped, num1, num2);
            num1 += skipped;
            num2 += skipped;
            report.n_dropped1 += skipped;
            report.n_dropped2 += skipped;
        }
        if current_phase != Some(best.difference) {
            spdlog::info!(
                "Phase change at {}/{} from {:?} to {}, run length {}",
                num1,
                num2,
                current_phase,
                best.difference,
                best.length
            );
            current_phase = Some(best.difference);
            report.n_phase_loss += 1;
        }
        report.n_dropped1 += best.offset1 - num1;
        report.n_dropped2 += best.offset2 - num2;
        num1 = best.offset1 + best.length;
        num2 = best.offset2 + best.length;
        report.n_synced += best.length;
        report
            .blocks
            .push(MatchBlock::new(best.offset1, best.offset2, best.length));
        report.phases.push(best.difference);
    }
    report.n_dropped1 += v1.len().saturating_sub(num1);
    report.n_dropped2 += v2.len().saturating_sub(num2);
    spdlog::debug!(
        "Synced {} events, dropped {}/{}",
        report.n_synced,
        report.n_dropped1,
        report.n_dropped2
    );
    Ok(report)
}

/// The part of `match1` whose second-stream range overlaps `match2`'s, re-based on
/// `match1`'s first stream. Returns None if the overlap is empty.
pub fn block_overlap(match1: &MatchBlock, match2: &MatchBlock) -> Option<MatchBlock> {
    let end1 = match1.offset2 + match1.length;
    let end2 = match2.offset2 + match2.length;
    if end1 < match2.offset2 || match1.offset2 > end2 {
        return None;
    }
    let overlap = if match1.offset2 < match2.offset2 {
        MatchBlock {
            offset1: match1.offset1 + (match2.offset2 - match1.offset2),
            offset2: match2.offset2,
            length: if end1 > end2 {
                match2.length
            } else {
                end1 - match2.offset2
            },
        }
    } else {
        MatchBlock {
            offset1: match1.offset1,
            offset2: match1.offset2,
            length: if end2 > end1 {
                match1.length
            } else {
                end2 - match1.offset2
            },
        }
    };
    (overlap.length > 0).then_some(overlap)
}

/// Intersect two block lists on their second (shared reference) index. The result is
/// expressed in `match1`'s first stream.
pub fn overlap_matcher(match1: &[MatchBlock], match2: &[MatchBlock]) -> Vec<MatchBlock> {
    match1
        .iter()
        .flat_map(|p| match2.iter().filter_map(move |q| block_overlap(p, q)))
        .collect()
}

/// Which index of a [`MatchBlock`] to test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The device stream (`offset1`).
    Stream,
    /// The DAQ reference stream (`offset2`).
    Reference,
}

/// True if event `n` of the given side lies inside any block.
pub fn is_valid(blocks: &[MatchBlock], side: Side, n: usize) -> bool {
    blocks.iter().any(|b| {
        let start = match side {
            Side::Stream => b.offset1,
            Side::Reference => b.offset2,
        };
        n >= start && n < start + b.length
    })
}

/// Sum of block lengths.
pub fn total_event_number(blocks: &[MatchBlock]) -> usize {
    blocks.iter().map(|b| b.length).sum()
}

/// Events in blocks that needed no index shift.
pub fn in_sync(blocks: &[MatchBlock]) -> usize {
    blocks
        .iter()
        .filter(|b| b.offset1 == b.offset2)
        .map(|b| b.length)
        .sum()
}

/// Events in block pairs where both lists needed no index shift. Lists of different
/// lengths give 0.
pub fn in_global_sync(blocks1: &[MatchBlock], blocks2: &[MatchBlock]) -> usize {
    if blocks1.len() != blocks2.len() {
        return 0;
    }
    blocks1
        .iter()
        .zip(blocks2.iter())
        .filter(|(a, b)| a.offset1 == a.offset2 && b.offset1 == b.offset2)
        .map(|(a, _)| a.length)
        .sum()
}
