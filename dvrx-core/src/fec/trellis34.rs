//! Rate-3/4 trellis code for DMR data bursts.
//!
//! 98 on-air dibits deinterleave into 49 constellation points. The encoder
//! is an eight-state FSM whose state is the previous input tribit: each
//! point carries the tribit systematically in its upper three bits and a
//! state-mixing parity bit below them, so a decision error keeps costing
//! into the following symbol. 48 information tribits (18 bytes) plus a
//! zero flush produce the 49 points. Decoding is an eight-state Viterbi
//! with hard or reliability-weighted metrics, falling back from soft to
//! hard to a direct point-table walk.

use crate::errors::{FecError, FecKind};

const POINTS: usize = 49;
const STATES: usize = 8;

fn parity3(v: u8) -> u8 {
    (v.count_ones() & 1) as u8
}

/// Constellation point emitted for (state, input tribit).
fn transition(state: usize, input: usize) -> u8 {
    ((input as u8) << 1) | (parity3(input as u8) ^ parity3(state as u8))
}

/// Point-level deinterleave schedule: transmitted point `n` carries
/// matrix point `SCHEDULE[n]`.
fn schedule() -> [usize; POINTS] {
    let mut table = [0usize; POINTS];
    let mut n = 0;
    for r in 0..4 {
        let mut p = r;
        while p < POINTS {
            table[n] = p;
            n += 1;
            p += 4;
        }
    }
    table
}

/// Deinterleaved points plus, for each matrix position, the on-air point
/// index it came from (for reliability lookup).
fn deinterleave(dibits: &[u8; 98]) -> ([u8; POINTS], [usize; POINTS]) {
    let sched = schedule();
    let mut points = [0u8; POINTS];
    let mut origin = [0usize; POINTS];
    for n in 0..POINTS {
        points[sched[n]] = (dibits[2 * n] << 2) | dibits[2 * n + 1];
        origin[sched[n]] = n;
    }
    (points, origin)
}

/// Encode 18 bytes into 98 on-air dibits.
pub fn encode(bytes: &[u8; 18]) -> [u8; 98] {
    let mut tribits = [0u8; 48];
    for (i, t) in tribits.iter_mut().enumerate() {
        let bit = |idx: usize| (bytes[idx / 8] >> (7 - idx % 8)) & 1;
        let base = i * 3;
        *t = (bit(base) << 2) | (bit(base + 1) << 1) | bit(base + 2);
    }

    let mut points = [0u8; POINTS];
    let mut state = 0usize;
    for (p, &t) in tribits.iter().chain(std::iter::once(&0u8)).enumerate() {
        points[p] = transition(state, usize::from(t));
        state = usize::from(t);
    }

    let sched = schedule();
    let mut dibits = [0u8; 98];
    for n in 0..POINTS {
        let point = points[sched[n]];
        dibits[2 * n] = point >> 2;
        dibits[2 * n + 1] = point & 0x3;
    }
    dibits
}

fn viterbi<F: Fn(usize, u8) -> u32>(metric: F) -> ([u8; POINTS], u32) {
    const INF: u32 = u32::MAX / 2;
    let mut path_metric = [INF; STATES];
    path_metric[0] = 0;
    let mut survivors = [[0u8; STATES]; POINTS];

    for step in 0..POINTS {
        let mut next = [INF; STATES];
        let mut back = [0u8; STATES];
        for (state, &pm) in path_metric.iter().enumerate() {
            if pm >= INF {
                continue;
            }
            for input in 0..STATES {
                let m = pm + metric(step, transition(state, input));
                if m < next[input] {
                    next[input] = m;
                    back[input] = state as u8;
                }
            }
        }
        path_metric = next;
        survivors[step] = back;
    }

    let mut state = 0usize; // flush pins the final state
    let final_metric = path_metric[0];
    let mut inputs = [0u8; POINTS];
    for step in (0..POINTS).rev() {
        inputs[step] = state as u8;
        state = usize::from(survivors[step][state]);
    }
    (inputs, final_metric)
}

fn pack(inputs: &[u8; POINTS]) -> [u8; 18] {
    let mut bytes = [0u8; 18];
    for (i, &t) in inputs.iter().take(48).enumerate() {
        for b in 0..3 {
            let idx = i * 3 + b;
            bytes[idx / 8] |= ((t >> (2 - b)) & 1) << (7 - idx % 8);
        }
    }
    bytes
}

/// Hard-decision decode of 98 on-air dibits into 18 bytes.
pub fn decode(dibits: &[u8; 98]) -> Result<[u8; 18], FecError> {
    let (points, _) = deinterleave(dibits);
    let (inputs, metric) = viterbi(|step, expected| {
        u32::from((points[step] ^ expected).count_ones())
    });
    if metric > 12 {
        return Err(FecError::Irrecoverable {
            kind: FecKind::TrellisThreeQuarter,
            residual_errors: metric as usize,
        });
    }
    Ok(pack(&inputs))
}

/// Soft decode; erasures are zero-metric branches. Falls back to the hard
/// decoder, then to the direct table walk, before giving up.
pub fn decode_soft(
    dibits: &[u8; 98],
    rel: &[u8; 98],
    erasure: u8,
) -> Result<[u8; 18], FecError> {
    let (_, origin) = deinterleave(dibits);
    let (inputs, metric) = viterbi(|step, expected| {
        let n = origin[step];
        let obs = [dibits[2 * n], dibits[2 * n + 1]];
        let r = [rel[2 * n], rel[2 * n + 1]];
        let exp = [expected >> 2, expected & 0x3];
        let mut m = 0u32;
        for i in 0..2 {
            if obs[i] != exp[i] && r[i] >= erasure {
                m += u32::from(r[i]);
            }
        }
        m
    });
    if metric <= 12 * 255 {
        return Ok(pack(&inputs));
    }
    decode(dibits).or_else(|_| table_walk(dibits))
}

/// Legacy decoder: walk the FSM point by point, requiring exact matches.
fn table_walk(dibits: &[u8; 98]) -> Result<[u8; 18], FecError> {
    let (points, _) = deinterleave(dibits);
    let mut inputs = [0u8; POINTS];
    let mut state = 0usize;
    for (step, &point) in points.iter().enumerate() {
        let input = (0..STATES)
            .position(|t| transition(state, t) == point)
            .ok_or(FecError::Irrecoverable {
                kind: FecKind::TrellisThreeQuarter,
                residual_errors: POINTS - step,
            })?;
        inputs[step] = input as u8;
        state = input;
    }
    if inputs[POINTS - 1] != 0 {
        return Err(FecError::Irrecoverable {
            kind: FecKind::TrellisThreeQuarter,
            residual_errors: 1,
        });
    }
    Ok(pack(&inputs))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: [u8; 18] = [
        0xAB, 0xCD, 0xEF, 0x01, 0x23, 0x45, 0x67, 0x89, 0x10, 0x32, 0x54, 0x76,
        0x98, 0xBA, 0xDC, 0xFE, 0x00, 0xFF,
    ];

    #[test]
    fn schedule_is_a_permutation() {
        let mut seen = [false; POINTS];
        for p in schedule() {
            assert!(!seen[p]);
            seen[p] = true;
        }
    }

    #[test]
    fn each_state_emits_distinct_points() {
        for s in 0..STATES {
            let mut seen = [false; 16];
            for t in 0..STATES {
                let p = usize::from(transition(s, t));
                assert!(!seen[p]);
                seen[p] = true;
            }
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let dibits = encode(&PAYLOAD);
        assert_eq!(decode(&dibits).unwrap(), PAYLOAD);
    }

    #[test]
    fn table_walk_matches_viterbi_on_clean_input() {
        let dibits = encode(&PAYLOAD);
        assert_eq!(table_walk(&dibits).unwrap(), PAYLOAD);
    }

    #[test]
    fn corrects_isolated_single_bit_hits() {
        // One flipped bit per hit, hits far apart in the point stream.
        let mut dibits = encode(&PAYLOAD);
        dibits[20] ^= 0x2;
        dibits[71] ^= 0x1;
        assert_eq!(decode(&dibits).unwrap(), PAYLOAD);
    }

    #[test]
    fn soft_weighting_recovers_low_confidence_damage() {
        let mut dibits = encode(&PAYLOAD);
        let mut rel = [220u8; 98];
        for &i in &[8usize, 40, 90] {
            dibits[i] ^= 0x1;
            rel[i] = 70;
        }
        assert_eq!(decode_soft(&dibits, &rel, 64).unwrap(), PAYLOAD);
    }
}
