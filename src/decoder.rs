//! Binary scan decoding.
//!
//! In binary mode each pixel is sent relative to the previous one:
//!
//! - a single byte other than `0x80` is a signed 8-bit delta added to the
//!   running value;
//! - `0x80` is followed by two bytes holding the absolute value, high byte
//!   first, which replaces the running value outright.
//!
//! Nothing in the byte stream marks the end of a frame. The decoder knows it
//! is done only by counting samples, so it pulls exactly as many bytes as the
//! frame needs and never waits on a trailing timeout.
//!
//! The instrument sends one value ahead of the first pixel. That value is
//! dropped so the result lines up with the 2048 physical pixels.
// TODO: confirm against the instrument whether the extra value is the first
// or the last one; the first is dropped as observed so far.

use serde::Serialize;

use crate::errors::{DriverError, Result};
use crate::protocol::{ESCAPE, PIXEL_COUNT};
use crate::transport::Transport;

/// Pull-based source of single bytes.
pub trait ByteSource {
    /// Next byte, or `None` when the source has nothing more to give
    /// (a timed-out read on a live link).
    fn next_byte(&mut self) -> Result<Option<u8>>;
}

impl ByteSource for &[u8] {
    fn next_byte(&mut self) -> Result<Option<u8>> {
        let bytes = *self;
        let Some((&b, rest)) = bytes.split_first() else {
            return Ok(None);
        };
        *self = rest;
        Ok(Some(b))
    }
}

/// Reads a transport one byte at a time.
pub struct TransportBytes<'a, T: Transport + ?Sized>(pub &'a mut T);

impl<T: Transport + ?Sized> ByteSource for TransportBytes<'_, T> {
    fn next_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.0.read(&mut byte)? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }
}

/// Running state for one frame: the accumulator and the values so far.
#[derive(Debug, Clone)]
pub struct DeltaDecoder {
    acc: i32,
    values: Vec<i32>,
    steps: usize,
}

impl DeltaDecoder {
    /// Decoder that stops after `steps` decoded values.
    pub fn new(steps: usize) -> Self {
        Self {
            acc: 0,
            values: Vec::with_capacity(steps),
            steps,
        }
    }

    pub fn accumulator(&self) -> i32 {
        self.acc
    }

    pub fn values(&self) -> &[i32] {
        &self.values
    }

    pub fn is_done(&self) -> bool {
        self.values.len() >= self.steps
    }

    /// Decode one value (one delta byte or one three-byte escape).
    pub fn step<S: ByteSource + ?Sized>(&mut self, src: &mut S) -> Result<i32> {
        let b = self.pull(src)?;
        if b == ESCAPE {
            let hi = self.pull(src)?;
            let lo = self.pull(src)?;
            self.acc = i32::from(u16::from_be_bytes([hi, lo]));
        } else {
            self.acc += i32::from(b as i8);
        }
        self.values.push(self.acc);
        Ok(self.acc)
    }

    /// Step until `steps` values are decoded, returning all of them.
    pub fn run<S: ByteSource + ?Sized>(mut self, src: &mut S) -> Result<Vec<i32>> {
        while !self.is_done() {
            self.step(src)?;
        }
        Ok(self.values)
    }

    fn pull<S: ByteSource + ?Sized>(&self, src: &mut S) -> Result<u8> {
        src.next_byte()?.ok_or(DriverError::Decode {
            decoded: self.values.len(),
            expected: self.steps,
        })
    }
}

/// Decode one frame of `count` samples from `src`.
///
/// Decodes `count + 1` values and drops the leading priming value. Any read
/// that yields nothing aborts the whole frame; no partial result is returned.
pub fn decode_frame<S: ByteSource + ?Sized>(src: &mut S, count: usize) -> Result<Vec<i32>> {
    let total = count
        .checked_add(1)
        .ok_or_else(|| DriverError::Protocol(format!("frame length {count} too large")))?;
    let mut values = DeltaDecoder::new(total).run(src)?;
    values.remove(0);
    Ok(values)
}

/// Encode values the way the instrument does: single-byte deltas where they
/// fit, escapes otherwise.
///
/// A delta of -128 would collide with the escape byte and is sent as an
/// escape instead.
pub fn encode_frame(values: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() + values.len() / 8);
    let mut acc = 0i32;
    for &v in values {
        let delta = i32::from(v) - acc;
        match i8::try_from(delta) {
            Ok(d) if d != i8::MIN => out.push(d as u8),
            _ => {
                out.push(ESCAPE);
                out.extend_from_slice(&v.to_be_bytes());
            }
        }
        acc = i32::from(v);
    }
    out
}

/// One decoded scan: exactly [`PIXEL_COUNT`] samples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Spectrum {
    samples: Vec<i32>,
}

impl Spectrum {
    /// Decode a full spectrum from `src`.
    pub fn read_from<S: ByteSource + ?Sized>(src: &mut S) -> Result<Self> {
        Self::try_from(decode_frame(src, PIXEL_COUNT)?)
    }

    pub fn samples(&self) -> &[i32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, i32> {
        self.samples.iter()
    }

    pub fn into_inner(self) -> Vec<i32> {
        self.samples
    }
}

impl TryFrom<Vec<i32>> for Spectrum {
    type Error = DriverError;

    fn try_from(samples: Vec<i32>) -> Result<Self> {
        if samples.len() != PIXEL_COUNT {
            return Err(DriverError::Protocol(format!(
                "spectrum must have {} samples, got {}",
                PIXEL_COUNT,
                samples.len()
            )));
        }
        Ok(Self { samples })
    }
}

impl AsRef<[i32]> for Spectrum {
    fn as_ref(&self) -> &[i32] {
        &self.samples
    }
}

impl<'a> IntoIterator for &'a Spectrum {
    type Item = &'a i32;
    type IntoIter = std::slice::Iter<'a, i32>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta_byte(d: i32) -> u8 {
        if d >= 0 {
            d as u8
        } else {
            (d + 256) as u8
        }
    }

    #[test]
    fn escape_replaces_accumulator() {
        for prior in [0u8, 5, 0x7F] {
            for v in [0u16, 1, 0x7F, 0x80, 0xFF, 0x1234, 0xFFFF] {
                let bytes = [prior, ESCAPE, (v >> 8) as u8, (v & 0xFF) as u8];
                let mut src = &bytes[..];
                let mut dec = DeltaDecoder::new(2);
                dec.step(&mut src).unwrap();
                assert_eq!(dec.step(&mut src).unwrap(), i32::from(v));
            }
        }
    }

    #[test]
    fn delta_adds_signed_byte() {
        for start in [0u16, 300, 65_000] {
            for d in [-127, -100, -1, 0, 1, 64, 127] {
                let esc = start.to_be_bytes();
                let bytes = [ESCAPE, esc[0], esc[1], delta_byte(d)];
                let mut src = &bytes[..];
                let mut dec = DeltaDecoder::new(2);
                dec.step(&mut src).unwrap();
                assert_eq!(dec.step(&mut src).unwrap(), i32::from(start) + d);
            }
        }
    }

    #[test]
    fn frame_drops_priming_value() {
        let mut bytes = vec![ESCAPE, 0x03, 0xE8]; // priming 1000
        bytes.extend([ESCAPE, 0x07, 0xD0]); // 2000
        bytes.extend(std::iter::repeat(1u8).take(PIXEL_COUNT - 1));
        let mut src = &bytes[..];

        let values = decode_frame(&mut src, PIXEL_COUNT).unwrap();
        assert_eq!(values.len(), PIXEL_COUNT);
        assert_eq!(values[0], 2_000);
        assert_eq!(values[PIXEL_COUNT - 1], 2_000 + PIXEL_COUNT as i32 - 1);
        assert!(src.is_empty());
    }

    #[test]
    fn stops_on_count_without_draining_source() {
        let bytes = vec![1u8; PIXEL_COUNT + 10];
        let mut src = &bytes[..];
        let spectrum = Spectrum::read_from(&mut src).unwrap();
        assert_eq!(spectrum.len(), PIXEL_COUNT);
        assert_eq!(spectrum.samples()[0], 2);
        assert_eq!(src.len(), 9);
    }

    #[test]
    fn short_stream_yields_no_samples() {
        let full = encode_frame(&vec![500u16; PIXEL_COUNT + 1]);
        for cut in [0, 1, 2, full.len() / 2, full.len() - 1] {
            let mut src = &full[..cut];
            match Spectrum::read_from(&mut src) {
                Err(DriverError::Decode { expected, .. }) => {
                    assert_eq!(expected, PIXEL_COUNT + 1)
                }
                other => panic!("cut at {cut}: expected decode error, got {other:?}"),
            }
        }
    }

    #[test]
    fn truncated_escape_is_a_failure() {
        let bytes = [5u8, ESCAPE, 0x01];
        let mut src = &bytes[..];
        let err = decode_frame(&mut src, 1).unwrap_err();
        assert!(matches!(err, DriverError::Decode { decoded: 1, expected: 2 }));
    }

    #[test]
    fn oversized_count_is_rejected_before_reading() {
        let bytes = [5u8, 1, 2];
        let mut src = &bytes[..];
        let err = decode_frame(&mut src, usize::MAX).unwrap_err();
        assert!(matches!(err, DriverError::Protocol(_)));
        assert_eq!(src.len(), 3);
    }

    #[test]
    fn encoder_uses_escape_for_large_steps_and_minus_128() {
        assert_eq!(encode_frame(&[5, 3]), vec![5, 0xFE]);
        assert_eq!(encode_frame(&[200]), vec![ESCAPE, 0x00, 0xC8]);
        assert_eq!(encode_frame(&[300, 172]), vec![ESCAPE, 0x01, 0x2C, ESCAPE, 0x00, 0xAC]);
        assert_eq!(encode_frame(&[300, 173]), vec![ESCAPE, 0x01, 0x2C, 0x81]);
    }

    #[test]
    fn encoded_frame_decodes_to_source() {
        let values: Vec<u16> = (0..=PIXEL_COUNT as u32)
            .map(|i| ((i * 7919) % 4000) as u16)
            .collect();
        let bytes = encode_frame(&values);
        let mut src = &bytes[..];
        let decoded = decode_frame(&mut src, PIXEL_COUNT).unwrap();
        let expected: Vec<i32> = values[1..].iter().map(|&v| i32::from(v)).collect();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn spectrum_rejects_wrong_length() {
        assert!(Spectrum::try_from(vec![0; PIXEL_COUNT - 1]).is_err());
        assert!(Spectrum::try_from(vec![0; PIXEL_COUNT]).is_ok());
    }
}
