//! Half-rate trellis code over dibit symbols.
//!
//! The encoder is a four-state finite state machine: the state is the
//! previous input dibit and each input emits one 4-bit constellation point
//! (two dibits on air). 98 received dibits carry 48 information dibits
//! plus a zero flush, decoded here with a Viterbi search that accepts
//! either hard decisions or per-dibit reliabilities.

use crate::errors::{FecError, FecKind};

/// Constellation point emitted for (state, input dibit).
const TRANSITION: [[u8; 4]; 4] = [
    [0, 15, 12, 3],
    [4, 11, 8, 7],
    [13, 2, 1, 14],
    [9, 6, 5, 10],
];

const POINTS: usize = 49;
const STATES: usize = 4;

/// Encode 12 bytes into 98 dibits (flush dibit appended).
pub fn encode(bytes: &[u8; 12]) -> [u8; 98] {
    let mut dibits_in = [0u8; 48];
    for (i, d) in dibits_in.iter_mut().enumerate() {
        let byte = bytes[i / 4];
        *d = (byte >> (6 - 2 * (i % 4))) & 0x3;
    }

    let mut out = [0u8; 98];
    let mut state = 0usize;
    for (p, &d) in dibits_in.iter().chain(std::iter::once(&0u8)).enumerate() {
        let point = TRANSITION[state][usize::from(d)];
        out[2 * p] = point >> 2;
        out[2 * p + 1] = point & 0x3;
        state = usize::from(d);
    }
    out
}

fn branch_metric_hard(observed: u8, expected: u8) -> u32 {
    u32::from((observed ^ expected).count_ones())
}

fn branch_metric_soft(obs: [u8; 2], rel: [u8; 2], expected: u8, erasure: u8) -> u32 {
    let exp = [expected >> 2, expected & 0x3];
    let mut metric = 0u32;
    for i in 0..2 {
        if obs[i] != exp[i] && rel[i] >= erasure {
            metric += u32::from(rel[i]);
        }
    }
    metric
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
                let m = pm + metric(step, TRANSITION[state][input]);
                if m < next[input] {
                    next[input] = m;
                    back[input] = state as u8;
                }
            }
        }
        path_metric = next;
        survivors[step] = back;
    }

    // The flush forces the final state to zero.
    let mut state = 0usize;
    let final_metric = path_metric[0];
    let mut inputs = [0u8; POINTS];
    for step in (0..POINTS).rev() {
        inputs[step] = state as u8;
        state = usize::from(survivors[step][state]);
    }
    (inputs, final_metric)
}

fn pack(inputs: &[u8; POINTS]) -> [u8; 12] {
    let mut bytes = [0u8; 12];
    for (i, &d) in inputs.iter().take(48).enumerate() {
        bytes[i / 4] |= (d & 0x3) << (6 - 2 * (i % 4));
    }
    bytes
}

/// Hard-decision decode of 98 dibits into 12 bytes.
pub fn decode(dibits: &[u8; 98]) -> Result<[u8; 12], FecError> {
    let (inputs, metric) = viterbi(|step, expected| {
        let observed = (dibits[2 * step] << 2) | dibits[2 * step + 1];
        branch_metric_hard(observed, expected)
    });
    // More than a handful of disagreeing bits means the packet is junk,
    // not a correctable channel hit.
    if metric > 12 {
        return Err(FecError::Irrecoverable {
            kind: FecKind::TrellisHalf,
            residual_errors: metric as usize,
        });
    }
    Ok(pack(&inputs))
}

/// Soft-decision decode weighting each mismatched dibit by its
/// reliability; erasures ride along as zero-metric branches.
pub fn decode_soft(
    dibits: &[u8; 98],
    rel: &[u8; 98],
    erasure: u8,
) -> Result<[u8; 12], FecError> {
    let (inputs, metric) = viterbi(|step, expected| {
        let obs = [dibits[2 * step], dibits[2 * step + 1]];
        let r = [rel[2 * step], rel[2 * step + 1]];
        branch_metric_soft(obs, r, expected, erasure)
    });
    if metric > 12 * 255 {
        return Err(FecError::Irrecoverable {
            kind: FecKind::TrellisHalf,
            residual_errors: (metric / 255) as usize,
        });
    }
    Ok(pack(&inputs))
}
