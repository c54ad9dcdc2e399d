use crate::codec::{DemodStatus, PhyCodec, SyncStatus};
use crate::packet::Packet;

/// Outcome of one receive step, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveEvent {
    Locked,
    Progress { received: usize, total: usize },
    Completed(Packet),
    Corrupted { id: u8 },
    Lost,
}

/// Turns a sample stream into packets.
///
/// Holds the samples not yet consumed by the codec, the recovered bytes not
/// yet claimed by a packet, and the packet under assembly. It owns no
/// thread and no codec: the engine's worker drives it from the inbound
/// ring, and offline decoding drives it from a recording.
#[derive(Debug, Default)]
pub struct PacketReceiver {
    samples: Vec<i16>,
    received: Vec<u8>,
    packet: Packet,
}

impl PacketReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, samples: &[i16]) {
        self.samples.extend_from_slice(samples);
    }

    /// Sample backlog, for callers that append in place.
    pub fn samples_mut(&mut self) -> &mut Vec<i16> {
        &mut self.samples
    }

    pub fn backlog(&self) -> usize {
        self.samples.len()
    }

    pub fn in_progress(&self) -> &Packet {
        &self.packet
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.received.clear();
        self.packet.clear();
    }

    /// Run one sync attempt or one demodulation pass over the backlog.
    pub fn step(&mut self, codec: &mut dyn PhyCodec, events: &mut Vec<ReceiveEvent>) {
        if !codec.is_synchronized() {
            if codec.sync(&mut self.samples) == SyncStatus::Locked {
                events.push(ReceiveEvent::Locked);
            }
            return;
        }

        let status = codec.demodulate(&mut self.samples, &mut self.received);
        self.assemble(events);

        if status == DemodStatus::SyncLost {
            if self.packet.header().is_some() {
                events.push(ReceiveEvent::Lost);
            }
            self.packet.clear();
            self.received.clear();
        }
    }

    /// Step until the backlog stops shrinking. Returns the events of all steps.
    pub fn drain(&mut self, codec: &mut dyn PhyCodec) -> Vec<ReceiveEvent> {
        let mut events = Vec::new();
        loop {
            let before = self.samples.len();
            self.step(codec, &mut events);
            if self.samples.len() == before {
                return events;
            }
        }
    }

    fn assemble(&mut self, events: &mut Vec<ReceiveEvent>) {
        loop {
            self.packet.push(&mut self.received);

            let Some(header) = self.packet.header() else {
                return;
            };

            if self.packet.is_malformed() {
                log::warn!("dropping packet {} with impossible length {}", header.id, header.len);
                events.push(ReceiveEvent::Corrupted { id: header.id });
                self.packet.clear();
                self.received.clear();
                return;
            }

            events.push(ReceiveEvent::Progress {
                received: self.packet.len(),
                total: header.len as usize,
            });

            if !self.packet.finished() {
                return;
            }

            let packet = std::mem::take(&mut self.packet);
            if packet.valid() {
                events.push(ReceiveEvent::Completed(packet));
            } else {
                log::warn!("packet {} failed checksum", header.id);
                events.push(ReceiveEvent::Corrupted { id: header.id });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{new_codec, CodecType};
    use crate::MIN_WINDOW_BAUDS;

    fn silence(codec: &dyn PhyCodec, bauds: usize) -> Vec<i16> {
        vec![0; bauds * codec.samples_per_baud()]
    }

    fn completed(events: &[ReceiveEvent]) -> Vec<&Packet> {
        events
            .iter()
            .filter_map(|e| match e {
                ReceiveEvent::Completed(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_single_packet() {
        let mut codec = new_codec(CodecType::Fsk, 48000, 600).unwrap();
        let packet = Packet::text(5, "hello receiver").unwrap();

        let mut rx = PacketReceiver::new();
        rx.extend(&silence(codec.as_ref(), 3));
        rx.extend(&codec.modulate(packet.as_bytes()));
        rx.extend(&silence(codec.as_ref(), MIN_WINDOW_BAUDS + 4));

        let events = rx.drain(codec.as_mut());
        assert_eq!(events.first(), Some(&ReceiveEvent::Locked));
        assert_eq!(completed(&events), vec![&packet]);
        assert!(!events.contains(&ReceiveEvent::Lost));
        assert!(events.contains(&ReceiveEvent::Progress {
            received: packet.len(),
            total: packet.len()
        }));
    }

    #[test]
    fn test_back_to_back_packets_separated_by_gap() {
        let mut codec = new_codec(CodecType::Qpsk, 48000, 600).unwrap();
        let first = Packet::text(1, "first").unwrap();
        let second = Packet::file(2, "b.bin", &[1, 2, 3, 4, 5]).unwrap();

        let mut rx = PacketReceiver::new();
        rx.extend(&codec.modulate(first.as_bytes()));
        rx.extend(&silence(codec.as_ref(), crate::INTER_FRAME_GAP_BAUDS));
        rx.extend(&codec.modulate(second.as_bytes()));
        rx.extend(&silence(codec.as_ref(), MIN_WINDOW_BAUDS + 4));

        let events = rx.drain(codec.as_mut());
        assert_eq!(completed(&events), vec![&first, &second]);
    }

    #[test]
    fn test_long_packet_spans_resync_blocks() {
        let mut codec = new_codec(CodecType::Fsk, 48000, 1200).unwrap();
        let text: String = (0..400).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let packet = Packet::text(77, &text).unwrap();

        let mut rx = PacketReceiver::new();
        rx.extend(&codec.modulate(packet.as_bytes()));
        rx.extend(&silence(codec.as_ref(), MIN_WINDOW_BAUDS + 4));

        let events = rx.drain(codec.as_mut());
        assert_eq!(completed(&events), vec![&packet]);
        let locks = events.iter().filter(|e| **e == ReceiveEvent::Locked).count();
        assert_eq!(locks, packet.len().div_ceil(crate::BYTES_PER_SYNC));
    }

    #[test]
    fn test_truncated_transmission_reports_loss() {
        let mut codec = new_codec(CodecType::Fsk, 48000, 600).unwrap();
        let packet = Packet::text(9, "this one gets cut off").unwrap();
        let mut samples = codec.modulate(packet.as_bytes());
        samples.truncate(samples.len() / 2);

        let mut rx = PacketReceiver::new();
        rx.extend(&samples);
        rx.extend(&silence(codec.as_ref(), MIN_WINDOW_BAUDS + 4));

        let events = rx.drain(codec.as_mut());
        assert!(completed(&events).is_empty());
        assert!(events.contains(&ReceiveEvent::Lost));
        assert!(rx.in_progress().is_empty());
    }

    #[test]
    fn test_corrupted_packet_not_delivered() {
        let mut codec = new_codec(CodecType::Fsk, 48000, 600).unwrap();
        let packet = Packet::text(4, "tamper").unwrap();
        let mut bytes = packet.into_bytes();
        bytes[8] ^= 0x20;

        let mut rx = PacketReceiver::new();
        rx.extend(&codec.modulate(&bytes));
        rx.extend(&silence(codec.as_ref(), MIN_WINDOW_BAUDS + 4));

        let events = rx.drain(codec.as_mut());
        assert!(completed(&events).is_empty());
        assert!(events.contains(&ReceiveEvent::Corrupted { id: 4 }));
    }

    #[test]
    fn test_silence_produces_nothing() {
        let mut codec = new_codec(CodecType::Qpsk, 44100, 500).unwrap();
        let mut rx = PacketReceiver::new();
        rx.extend(&vec![0; 44100]);
        assert!(rx.drain(codec.as_mut()).is_empty());
        assert!(rx.backlog() <= MIN_WINDOW_BAUDS * codec.samples_per_baud());
    }
}
