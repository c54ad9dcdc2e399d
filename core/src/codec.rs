//! Physical-layer codec contract shared by the FSK and QPSK variants.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use crate::error::{ModemError, Result};
use crate::fsk::FskCodec;
use crate::qpsk::QpskCodec;
use crate::{BYTES_PER_SYNC, DETECTION_THRESHOLD, FULL_SCALE, MIN_SAMPLES_PER_BAUD};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecType {
    Fsk,
    Qpsk,
}

impl CodecType {
    pub const ALL: [CodecType; 2] = [CodecType::Fsk, CodecType::Qpsk];

    /// Samples spanned by one symbol for this codec.
    pub fn samples_per_baud(self, sample_rate: u32, baud_rate: u32) -> usize {
        if baud_rate == 0 {
            return 0;
        }
        match self {
            CodecType::Fsk => (sample_rate / baud_rate) as usize,
            CodecType::Qpsk => (2 * sample_rate as u64 / baud_rate as u64) as usize,
        }
    }

    pub fn bits_per_symbol(self) -> usize {
        match self {
            CodecType::Fsk => 1,
            CodecType::Qpsk => 2,
        }
    }
}

impl fmt::Display for CodecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecType::Fsk => write!(f, "FSK"),
            CodecType::Qpsk => write!(f, "QPSK"),
        }
    }
}

impl FromStr for CodecType {
    type Err = ModemError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fsk" => Ok(CodecType::Fsk),
            "qpsk" => Ok(CodecType::Qpsk),
            other => Err(ModemError::InvalidConfig(format!("unknown codec type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Locked,
    NotLocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemodStatus {
    Ok,
    SyncLost,
}

/// A stateful modulator/demodulator for one physical-layer scheme.
///
/// `sync` and `demodulate` consume samples from the front of `samples` as
/// they go; whatever is left must be handed back, with fresh samples
/// appended, on the next call.
pub trait PhyCodec: Send {
    /// Scan for a preamble and lock onto its symbol boundary.
    fn sync(&mut self, samples: &mut Vec<i16>) -> SyncStatus;

    /// Decode symbols into whole bytes appended to `out`.
    fn demodulate(&mut self, samples: &mut Vec<i16>, out: &mut Vec<u8>) -> DemodStatus;

    /// Synthesize the waveform for `bytes`, preambles included.
    fn modulate(&self, bytes: &[u8]) -> Vec<i16>;

    fn codec_type(&self) -> CodecType;

    fn sample_rate(&self) -> u32;

    fn baud_rate(&self) -> u32;

    fn samples_per_baud(&self) -> usize;

    fn is_synchronized(&self) -> bool;

    /// Drop lock and any partially received byte.
    fn reset(&mut self);

    /// Fresh, unsynchronized codec of the same kind at other rates.
    fn with_rates(&self, sample_rate: u32, baud_rate: u32) -> Result<Box<dyn PhyCodec>> {
        new_codec(self.codec_type(), sample_rate, baud_rate)
    }
}

pub fn new_codec(kind: CodecType, sample_rate: u32, baud_rate: u32) -> Result<Box<dyn PhyCodec>> {
    Ok(match kind {
        CodecType::Fsk => Box::new(FskCodec::new(sample_rate, baud_rate)?),
        CodecType::Qpsk => Box::new(QpskCodec::new(sample_rate, baud_rate)?),
    })
}

pub(crate) fn check_rates(kind: CodecType, sample_rate: u32, baud_rate: u32) -> Result<usize> {
    if baud_rate == 0 || sample_rate == 0 {
        return Err(ModemError::InvalidConfig(format!(
            "sample rate {sample_rate} / baud rate {baud_rate} must be non-zero"
        )));
    }
    let spb = kind.samples_per_baud(sample_rate, baud_rate);
    if spb < MIN_SAMPLES_PER_BAUD {
        return Err(ModemError::InvalidConfig(format!(
            "{kind} at {baud_rate} baud needs at least {MIN_SAMPLES_PER_BAUD} samples per baud, got {spb}"
        )));
    }
    Ok(spb)
}

/// One period of cosine and sine at `cycles` cycles per table length.
pub(crate) struct ToneTable {
    pub cos: Vec<f64>,
    pub sin: Vec<f64>,
}

impl ToneTable {
    pub fn new(len: usize, cycles: f64) -> Self {
        let (cos, sin): (Vec<f64>, Vec<f64>) = (0..len)
            .map(|i| {
                let theta = 2.0 * PI * cycles * i as f64 / len as f64;
                (theta.cos(), theta.sin())
            })
            .unzip();
        Self { cos, sin }
    }

    pub fn len(&self) -> usize {
        self.cos.len()
    }

    /// Complex correlation of `len` samples starting at `start`, wrapping
    /// over the table period. Returns `(cos, -sin)` scaled so a full-scale
    /// tone in phase with the table yields magnitude 1.
    pub fn correlate(&self, samples: &[i16], start: usize, len: usize) -> (f64, f64) {
        let period = self.len();
        let mut c = 0.0;
        let mut s = 0.0;
        for (i, &x) in samples[start..start + len].iter().enumerate() {
            let x = x as f64 / FULL_SCALE;
            let t = i % period;
            c += self.cos[t] * x;
            s -= self.sin[t] * x;
        }
        let scale = 2.0 / len as f64;
        (c * scale, s * scale)
    }

    /// Single-bin DFT magnitude over one table period.
    pub fn magnitude(&self, samples: &[i16], start: usize) -> f64 {
        let (c, s) = self.correlate(samples, start, self.len());
        (c * c + s * s).sqrt()
    }
}

/// Coarse carrier search in baud-sized steps.
///
/// Returns `Ok(idx)` with `idx` one baud past the first window whose
/// correlation power exceeds the detection threshold, or `Err(scanned)`
/// with the number of samples that can be discarded.
pub(crate) fn detect_carrier(
    table: &ToneTable,
    samples: &[i16],
    min_samples: usize,
) -> std::result::Result<usize, usize> {
    let spb = table.len();
    let mut idx = 0;
    while idx + min_samples < samples.len() {
        let (c, s) = table.correlate(samples, idx, spb);
        if (c * c + s * s).sqrt() > DETECTION_THRESHOLD {
            return Ok(idx + spb);
        }
        idx += spb;
    }
    Err(idx)
}

/// Find the symbol boundary within one baud of `from`.
///
/// Every offset is scored with `cos - |sin|` over a two-baud window; the
/// idle preamble symbol scores highest exactly when the window starts on
/// its boundary.
pub(crate) fn refine_edge(table: &ToneTable, samples: &[i16], from: usize) -> usize {
    let spb = table.len();
    let mut best = from;
    let mut best_val = f64::NEG_INFINITY;
    for i in from..from + spb {
        let (c, s) = table.correlate(samples, i, 2 * spb);
        let val = c - s.abs();
        if val > best_val {
            best_val = val;
            best = i;
        }
    }
    best
}

/// Collects demodulated bits MSB first and counts bytes since the last lock.
#[derive(Debug, Default)]
pub(crate) struct BitAccumulator {
    bits: u8,
    count: u8,
    received: usize,
}

impl BitAccumulator {
    /// Returns the completed byte once eight bits have arrived.
    pub fn push(&mut self, bit: bool) -> Option<u8> {
        self.bits = (self.bits << 1) | bit as u8;
        self.count += 1;
        if self.count < 8 {
            return None;
        }
        let byte = self.bits;
        self.bits = 0;
        self.count = 0;
        self.received += 1;
        Some(byte)
    }

    /// Bytes since the last reset have reached the resync cadence.
    pub fn block_complete(&self) -> bool {
        self.received >= BYTES_PER_SYNC
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Sample value for a unit-amplitude waveform point at transmit level.
pub(crate) fn tx_sample(value: f64) -> i16 {
    (value * FULL_SCALE * crate::TX_AMPLITUDE) as i16
}

/// Run a codec over a finite recording until it stops making progress.
#[cfg(test)]
pub(crate) fn decode_recording(codec: &mut dyn PhyCodec, samples: &[i16]) -> Vec<u8> {
    let mut buf = samples.to_vec();
    let mut out = Vec::new();
    loop {
        let before = buf.len();
        if codec.is_synchronized() {
            codec.demodulate(&mut buf, &mut out);
        } else {
            codec.sync(&mut buf);
        }
        if buf.len() == before {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_type_parse() {
        assert_eq!("fsk".parse::<CodecType>().unwrap(), CodecType::Fsk);
        assert_eq!("QPSK".parse::<CodecType>().unwrap(), CodecType::Qpsk);
        assert!("ofdm".parse::<CodecType>().is_err());
        assert_eq!(CodecType::Qpsk.to_string(), "QPSK");
    }

    #[test]
    fn test_samples_per_baud() {
        assert_eq!(CodecType::Fsk.samples_per_baud(48000, 600), 80);
        assert_eq!(CodecType::Qpsk.samples_per_baud(48000, 600), 160);
        assert_eq!(CodecType::Fsk.samples_per_baud(48000, 1225), 39);
    }

    #[test]
    fn test_check_rates_rejects_tiny_baud_interval() {
        assert!(check_rates(CodecType::Fsk, 48000, 0).is_err());
        assert!(check_rates(CodecType::Fsk, 8000, 4000).is_err());
        assert!(check_rates(CodecType::Qpsk, 8000, 4000).is_ok());
    }

    #[test]
    fn test_bit_accumulator_msb_first() {
        let mut acc = BitAccumulator::default();
        let bits = [false, true, true, false, true, false, false, false]; // 0x68 'h'
        let mut out = None;
        for bit in bits {
            out = acc.push(bit);
        }
        assert_eq!(out, Some(b'h'));
        assert!(!acc.block_complete());
    }

    #[test]
    fn test_bit_accumulator_block_cadence() {
        let mut acc = BitAccumulator::default();
        for _ in 0..BYTES_PER_SYNC * 8 {
            acc.push(true);
        }
        assert!(acc.block_complete());
        acc.reset();
        assert!(!acc.block_complete());
    }

    #[test]
    fn test_tone_table_correlation_unit_magnitude() {
        let table = ToneTable::new(80, 1.0);
        let samples: Vec<i16> = table.cos.iter().map(|&c| (c * FULL_SCALE) as i16).collect();
        let (c, s) = table.correlate(&samples, 0, 80);
        assert!((c - 1.0).abs() < 1e-3, "cos component {c}");
        assert!(s.abs() < 1e-3, "sin component {s}");
        assert!((table.magnitude(&samples, 0) - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_new_codec_dispatch() {
        let fsk = new_codec(CodecType::Fsk, 48000, 600).unwrap();
        assert_eq!(fsk.codec_type(), CodecType::Fsk);
        let resampled = fsk.with_rates(44100, 300).unwrap();
        assert_eq!(resampled.codec_type(), CodecType::Fsk);
        assert_eq!(resampled.sample_rate(), 44100);
        assert_eq!(resampled.samples_per_baud(), 147);
        assert!(!resampled.is_synchronized());

        let qpsk = new_codec(CodecType::Qpsk, 48000, 600).unwrap();
        assert_eq!(qpsk.samples_per_baud(), 160);
    }
}
