//! Steim1 and Steim2 frame decompression
//!
//! Data is a sequence of 64-byte frames of sixteen 32-bit words. Word 0 of
//! every frame holds sixteen 2-bit nibbles describing how each word is
//! packed. In the first frame words 1 and 2 are the forward and reverse
//! integration constants (first and last sample).

use super::MseedError;

const FRAME_SIZE: usize = 64;
const WORDS_PER_FRAME: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Steim {
    One,
    Two,
}

fn sign_extend(value: u32, bits: u32) -> i32 {
    ((value << (32 - bits)) as i32) >> (32 - bits)
}

/// `count` packed values of `bits` each, most significant first
fn unpack(word: u32, count: u32, bits: u32, out: &mut Vec<i32>) {
    let mask = if bits == 32 { u32::MAX } else { (1u32 << bits) - 1 };
    for k in 0..count {
        let shift = (count - 1 - k) * bits;
        out.push(sign_extend((word >> shift) & mask, bits));
    }
}

fn differences(kind: Steim, nibble: u32, word: u32, out: &mut Vec<i32>) -> Result<(), MseedError> {
    match (kind, nibble) {
        (_, 0) => {}
        (Steim::One, 1) => unpack(word, 4, 8, out),
        (Steim::One, 2) => unpack(word, 2, 16, out),
        (Steim::One, 3) => out.push(word as i32),
        (Steim::Two, 1) => unpack(word, 4, 8, out),
        (Steim::Two, 2) => match word >> 30 {
            1 => unpack(word, 1, 30, out),
            2 => unpack(word, 2, 15, out),
            3 => unpack(word, 3, 10, out),
            dnib => {
                return Err(MseedError::BadHeader(format!(
                    "invalid Steim2 dnib {} for nibble 2",
                    dnib
                )))
            }
        },
        (Steim::Two, 3) => match word >> 30 {
            0 => unpack(word, 5, 6, out),
            1 => unpack(word, 6, 5, out),
            2 => unpack(word, 7, 4, out),
            dnib => {
                return Err(MseedError::BadHeader(format!(
                    "invalid Steim2 dnib {} for nibble 3",
                    dnib
                )))
            }
        },
        _ => unreachable!("nibbles are two bits"),
    }
    Ok(())
}

/// Decode `nsamp` samples from Steim frames
pub fn decode(kind: Steim, data: &[u8], nsamp: usize, big_endian: bool) -> Result<Vec<i32>, MseedError> {
    if nsamp == 0 {
        return Ok(Vec::new());
    }
    let read_word = |chunk: &[u8]| {
        let bytes = [chunk[0], chunk[1], chunk[2], chunk[3]];
        if big_endian {
            u32::from_be_bytes(bytes)
        } else {
            u32::from_le_bytes(bytes)
        }
    };

    let mut diffs: Vec<i32> = Vec::with_capacity(nsamp);
    let mut first = None;
    let mut last = None;

    for (index, frame) in data.chunks_exact(FRAME_SIZE).enumerate() {
        let words: Vec<u32> = frame.chunks_exact(4).map(read_word).collect();
        let control = words[0];
        for (w, &word) in words.iter().enumerate().skip(1) {
            if index == 0 && w == 1 {
                first = Some(word as i32);
                continue;
            }
            if index == 0 && w == 2 {
                last = Some(word as i32);
                continue;
            }
            let nibble = (control >> (30 - 2 * w as u32)) & 0b11;
            differences(kind, nibble, word, &mut diffs)?;
        }
        debug_assert_eq!(words.len(), WORDS_PER_FRAME);
        if diffs.len() >= nsamp {
            break;
        }
    }

    let first = first.ok_or(MseedError::Truncated {
        needed: FRAME_SIZE,
        available: data.len(),
    })?;
    if diffs.len() < nsamp {
        return Err(MseedError::BadHeader(format!(
            "Steim frames hold {} differences, header claims {} samples",
            diffs.len(),
            nsamp
        )));
    }

    // The first difference is relative to the previous record
    let mut samples = Vec::with_capacity(nsamp);
    samples.push(first);
    for &d in &diffs[1..nsamp] {
        let prev = samples[samples.len() - 1];
        samples.push(prev.wrapping_add(d));
    }

    if let (Some(expected), Some(&got)) = (last, samples.last()) {
        if expected != got {
            tracing::debug!(
                "Steim reverse integration constant {} does not match last sample {}",
                expected,
                got
            );
        }
    }

    Ok(samples)
}
