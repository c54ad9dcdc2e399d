use crate::codec::{
    check_rates, detect_carrier, refine_edge, tx_sample, BitAccumulator, CodecType, DemodStatus,
    PhyCodec, SyncStatus, ToneTable,
};
use crate::error::Result;
use crate::{BYTES_PER_SYNC, DETECTION_THRESHOLD, MIN_WINDOW_BAUDS, PREAMBLE_IDLE_SYMBOLS};

// Binary FSK
//
// Each baud interval carries one bit as one of two tones whose periods
// divide the interval exactly:
// - low tone: one cycle per baud (bit 0, idle/preamble symbol)
// - high tone: two cycles per baud (bit 1, preamble start symbol)
//
// Both tones are integer-cycle over the interval, so their single-bin DFTs
// are orthogonal and a baud-aligned window sees only one of them.
//
// Frame on air:
//   [6 x low][high] 128 data bytes [6 x low][high] ... data [low][low]

/// Binary frequency-shift keying codec.
pub struct FskCodec {
    sample_rate: u32,
    baud_rate: u32,
    samples_per_baud: usize,
    min_samples: usize,
    low: ToneTable,
    high: ToneTable,
    low_wave: Vec<i16>,
    high_wave: Vec<i16>,
    synchronized: bool,
    bits: BitAccumulator,
}

impl FskCodec {
    pub fn new(sample_rate: u32, baud_rate: u32) -> Result<Self> {
        let samples_per_baud = check_rates(CodecType::Fsk, sample_rate, baud_rate)?;
        let low = ToneTable::new(samples_per_baud, 1.0);
        let high = ToneTable::new(samples_per_baud, 2.0);
        let low_wave = low.cos.iter().map(|&c| tx_sample(c)).collect();
        let high_wave = high.cos.iter().map(|&c| tx_sample(c)).collect();

        Ok(Self {
            sample_rate,
            baud_rate,
            samples_per_baud,
            min_samples: MIN_WINDOW_BAUDS * samples_per_baud,
            low,
            high,
            low_wave,
            high_wave,
            synchronized: false,
            bits: BitAccumulator::default(),
        })
    }

    /// Magnitudes of the high and low tone over the baud starting at `idx`.
    fn tones(&self, samples: &[i16], idx: usize) -> (f64, f64) {
        (
            self.high.magnitude(samples, idx),
            self.low.magnitude(samples, idx),
        )
    }

    fn lose_sync(&mut self) {
        self.synchronized = false;
        self.bits.reset();
    }
}

impl PhyCodec for FskCodec {
    fn sync(&mut self, samples: &mut Vec<i16>) -> SyncStatus {
        if samples.len() < self.min_samples {
            return SyncStatus::NotLocked;
        }

        let from = match detect_carrier(&self.low, samples, self.min_samples) {
            Ok(idx) => idx,
            Err(scanned) => {
                samples.drain(..scanned);
                return SyncStatus::NotLocked;
            }
        };

        let spb = self.samples_per_baud;
        let mut idx = refine_edge(&self.low, samples, from);

        while idx + self.min_samples < samples.len() {
            let (hi, lo) = self.tones(samples, idx);
            if hi > lo {
                samples.drain(..idx + spb);
                self.synchronized = true;
                self.bits.reset();
                log::debug!("FSK locked at {} baud", self.baud_rate);
                return SyncStatus::Locked;
            }
            idx += spb;
        }

        samples.drain(..idx);
        SyncStatus::NotLocked
    }

    fn demodulate(&mut self, samples: &mut Vec<i16>, out: &mut Vec<u8>) -> DemodStatus {
        let spb = self.samples_per_baud;
        let mut idx = 0;

        while idx + self.min_samples < samples.len() {
            let (hi, lo) = self.tones(samples, idx);

            if hi.max(lo) < DETECTION_THRESHOLD {
                self.lose_sync();
                samples.drain(..idx + spb);
                return DemodStatus::SyncLost;
            }

            if let Some(byte) = self.bits.push(hi > lo) {
                out.push(byte);
            }

            if self.bits.block_complete() {
                self.lose_sync();
                samples.drain(..idx + spb);
                return DemodStatus::Ok;
            }

            idx += spb;
        }

        samples.drain(..idx);
        DemodStatus::Ok
    }

    fn modulate(&self, bytes: &[u8]) -> Vec<i16> {
        let symbols = bytes.len() * 8
            + bytes.len().div_ceil(BYTES_PER_SYNC) * (PREAMBLE_IDLE_SYMBOLS + 1)
            + 2;
        let mut out = Vec::with_capacity(symbols * self.samples_per_baud);

        for (i, &byte) in bytes.iter().enumerate() {
            if i % BYTES_PER_SYNC == 0 {
                for _ in 0..PREAMBLE_IDLE_SYMBOLS {
                    out.extend_from_slice(&self.low_wave);
                }
                out.extend_from_slice(&self.high_wave);
            }

            for bit in (0..8).rev() {
                let wave = if (byte >> bit) & 1 == 1 {
                    &self.high_wave
                } else {
                    &self.low_wave
                };
                out.extend_from_slice(wave);
            }
        }

        out.extend_from_slice(&self.low_wave);
        out.extend_from_slice(&self.low_wave);
        out
    }

    fn codec_type(&self) -> CodecType {
        CodecType::Fsk
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn samples_per_baud(&self) -> usize {
        self.samples_per_baud
    }

    fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    fn reset(&mut self) {
        self.lose_sync();
    }
}
