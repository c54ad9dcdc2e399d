use std::f64::consts::FRAC_1_SQRT_2;

use crate::codec::{
    check_rates, detect_carrier, refine_edge, tx_sample, BitAccumulator, CodecType, DemodStatus,
    PhyCodec, SyncStatus, ToneTable,
};
use crate::error::Result;
use crate::{BYTES_PER_SYNC, DETECTION_THRESHOLD, MIN_WINDOW_BAUDS, PREAMBLE_IDLE_SYMBOLS};

/// Constellation point `(i, q)` of the idle symbol: carrier at phase zero.
const IDLE_POINT: (f64, f64) = (1.0, 0.0);

/// Start-of-data symbol: the only point with both components negative that
/// can follow an idle run.
const START_POINT: (f64, f64) = (-FRAC_1_SQRT_2, -FRAC_1_SQRT_2);

/// Quadrature phase-shift keying codec.
///
/// One carrier cycle per baud interval, two bits per symbol: the first bit
/// selects the sign of the in-phase component, the second the sign of the
/// quadrature component. The interval is twice the FSK one at the same
/// baud rate so the single carrier is resolved with the same precision.
pub struct QpskCodec {
    sample_rate: u32,
    baud_rate: u32,
    samples_per_baud: usize,
    min_samples: usize,
    carrier: ToneTable,
    synchronized: bool,
    bits: BitAccumulator,
}

impl QpskCodec {
    pub fn new(sample_rate: u32, baud_rate: u32) -> Result<Self> {
        let samples_per_baud = check_rates(CodecType::Qpsk, sample_rate, baud_rate)?;
        Ok(Self {
            sample_rate,
            baud_rate,
            samples_per_baud,
            min_samples: MIN_WINDOW_BAUDS * samples_per_baud,
            carrier: ToneTable::new(samples_per_baud, 1.0),
            synchronized: false,
            bits: BitAccumulator::default(),
        })
    }

    fn phase(&self, samples: &[i16], idx: usize) -> (f64, f64) {
        self.carrier.correlate(samples, idx, self.samples_per_baud)
    }

    fn write_symbol(&self, (i, q): (f64, f64), out: &mut Vec<i16>) {
        out.extend(
            self.carrier
                .cos
                .iter()
                .zip(&self.carrier.sin)
                .map(|(&c, &s)| tx_sample(c * i - s * q)),
        );
    }

    fn lose_sync(&mut self) {
        self.synchronized = false;
        self.bits.reset();
    }
}

fn bit_point(bit: bool) -> f64 {
    if bit {
        FRAC_1_SQRT_2
    } else {
        -FRAC_1_SQRT_2
    }
}

impl PhyCodec for QpskCodec {
    fn sync(&mut self, samples: &mut Vec<i16>) -> SyncStatus {
        if samples.len() < self.min_samples {
            return SyncStatus::NotLocked;
        }

        let from = match detect_carrier(&self.carrier, samples, self.min_samples) {
            Ok(idx) => idx,
            Err(scanned) => {
                samples.drain(..scanned);
                return SyncStatus::NotLocked;
            }
        };

        let spb = self.samples_per_baud;
        let mut idx = refine_edge(&self.carrier, samples, from);

        while idx + self.min_samples < samples.len() {
            let (c, s) = self.phase(samples, idx);
            if c < 0.0 && s < 0.0 {
                samples.drain(..idx + spb);
                self.synchronized = true;
                self.bits.reset();
                log::debug!("QPSK locked at {} baud", self.baud_rate);
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
            let (c, s) = self.phase(samples, idx);

            if (c * c + s * s).sqrt() < DETECTION_THRESHOLD {
                self.lose_sync();
                samples.drain(..idx + spb);
                return DemodStatus::SyncLost;
            }

            // Eight bits always land on a symbol boundary, so at most the
            // second push completes a byte.
            self.bits.push(c > 0.0);
            if let Some(byte) = self.bits.push(s > 0.0) {
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
        let symbols = bytes.len() * 4
            + bytes.len().div_ceil(BYTES_PER_SYNC) * (PREAMBLE_IDLE_SYMBOLS + 1)
            + 1;
        let mut out = Vec::with_capacity(symbols * self.samples_per_baud);

        for (i, &byte) in bytes.iter().enumerate() {
            if i % BYTES_PER_SYNC == 0 {
                for _ in 0..PREAMBLE_IDLE_SYMBOLS {
                    self.write_symbol(IDLE_POINT, &mut out);
                }
                self.write_symbol(START_POINT, &mut out);
            }

            for pair in (0..4).rev() {
                let dibit = byte >> (pair * 2);
                let point = (bit_point(dibit & 0b10 != 0), bit_point(dibit & 0b01 != 0));
                self.write_symbol(point, &mut out);
            }
        }

        self.write_symbol(IDLE_POINT, &mut out);
        out
    }

    fn codec_type(&self) -> CodecType {
        CodecType::Qpsk
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_recording;

    const SR: u32 = 48000;
    const BAUD: u32 = 600;
    const SPB: usize = 160;

    fn padded(mut samples: Vec<i16>, lead: usize) -> Vec<i16> {
        let mut out = vec![0i16; lead];
        out.append(&mut samples);
        out.extend(std::iter::repeat(0).take((MIN_WINDOW_BAUDS + 5) * SPB));
        out
    }

    #[test]
    fn test_waveform_length() {
        let codec = QpskCodec::new(SR, BAUD).unwrap();
        assert_eq!(codec.samples_per_baud(), SPB);
        let samples = codec.modulate(b"hi!");
        assert_eq!(samples.len(), (6 + 1 + 3 * 4 + 1) * SPB);
    }

    #[test]
    fn test_constellation_points_decode() {
        let codec = QpskCodec::new(SR, BAUD).unwrap();
        for (point, expect_c, expect_s) in [
            ((FRAC_1_SQRT_2, FRAC_1_SQRT_2), true, true),
            ((FRAC_1_SQRT_2, -FRAC_1_SQRT_2), true, false),
            ((-FRAC_1_SQRT_2, FRAC_1_SQRT_2), false, true),
            ((-FRAC_1_SQRT_2, -FRAC_1_SQRT_2), false, false),
        ] {
            let mut wave = Vec::new();
            codec.write_symbol(point, &mut wave);
            let (c, s) = codec.phase(&wave, 0);
            assert_eq!(c > 0.0, expect_c, "cos sign for {point:?}");
            assert_eq!(s > 0.0, expect_s, "sin sign for {point:?}");
            assert!((c * c + s * s).sqrt() > 0.85);
        }
    }

    #[test]
    fn test_roundtrip_hi() {
        let tx = QpskCodec::new(SR, BAUD).unwrap();
        let samples = padded(tx.modulate(b"hi!"), 0);

        let mut rx = QpskCodec::new(SR, BAUD).unwrap();
        assert_eq!(decode_recording(&mut rx, &samples), b"hi!");
    }

    #[test]
    fn test_roundtrip_with_phase_offset() {
        let tx = QpskCodec::new(SR, BAUD).unwrap();
        let data: Vec<u8> = (0..=255u8).step_by(5).collect();

        for lead in [3, 80, 159, 401] {
            let samples = padded(tx.modulate(&data), lead);
            let mut rx = QpskCodec::new(SR, BAUD).unwrap();
            assert_eq!(
                decode_recording(&mut rx, &samples),
                data,
                "failed with {lead} leading samples"
            );
        }
    }

    #[test]
    fn test_roundtrip_across_resync_blocks() {
        let tx = QpskCodec::new(SR, BAUD).unwrap();
        let data: Vec<u8> = (0..260u32).map(|i| (i * 13) as u8).collect();
        let samples = padded(tx.modulate(&data), 42);

        let mut rx = QpskCodec::new(SR, BAUD).unwrap();
        assert_eq!(decode_recording(&mut rx, &samples), data);
    }

    #[test]
    fn test_silence_never_locks() {
        let mut rx = QpskCodec::new(SR, BAUD).unwrap();
        let mut samples = vec![0i16; 40 * SPB];
        assert_eq!(rx.sync(&mut samples), SyncStatus::NotLocked);
        assert!(!rx.is_synchronized());
    }

    #[test]
    fn test_sync_loss_resets_state() {
        let tx = QpskCodec::new(SR, BAUD).unwrap();
        let mut samples = padded(tx.modulate(b"qp"), 0);

        let mut rx = QpskCodec::new(SR, BAUD).unwrap();
        assert_eq!(rx.sync(&mut samples), SyncStatus::Locked);
        let mut out = Vec::new();
        assert_eq!(rx.demodulate(&mut samples, &mut out), DemodStatus::SyncLost);
        assert_eq!(out, b"qp");
        assert!(!rx.is_synchronized());
    }
}
