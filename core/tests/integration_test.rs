// Full modulate → channel → receive round trips through the public API,
// without any audio device in between.

use audiomodem_core::{
    new_codec, CodecType, DemodStatus, Packet, PacketReceiver, Payload, PhyCodec, ReceiveEvent,
    SyncStatus, MIN_WINDOW_BAUDS,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

fn transmit(codec: &dyn PhyCodec, packets: &[Packet], lead: usize) -> Vec<i16> {
    let spb = codec.samples_per_baud();
    let mut samples = vec![0i16; lead];
    for packet in packets {
        samples.extend(codec.modulate(packet.as_bytes()));
        samples.extend(std::iter::repeat(0).take(4 * spb));
    }
    samples.extend(std::iter::repeat(0).take((MIN_WINDOW_BAUDS + 5) * spb));
    samples
}

fn receive(codec: &mut dyn PhyCodec, samples: &[i16]) -> Vec<Packet> {
    let mut receiver = PacketReceiver::new();
    receiver.extend(samples);
    receiver
        .drain(codec)
        .into_iter()
        .filter_map(|e| match e {
            ReceiveEvent::Completed(p) => Some(p),
            _ => None,
        })
        .collect()
}

fn add_noise(samples: &mut [i16], std_dev: f64, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, std_dev).unwrap();
    for s in samples.iter_mut() {
        let noisy = *s as f64 + normal.sample(&mut rng);
        *s = noisy.clamp(i16::MIN as f64, i16::MAX as f64) as i16;
    }
}

#[test]
fn test_hi_example_scenario() {
    let mut codec = new_codec(CodecType::Fsk, 48000, 600).unwrap();
    assert_eq!(codec.samples_per_baud(), 80);

    let samples = codec.modulate(b"hi!");
    assert_eq!(samples.len(), (6 + 1 + 3 * 8 + 2) * 80);

    let mut remaining = samples;
    remaining.extend(vec![0; (MIN_WINDOW_BAUDS + 1) * 80]);
    assert_eq!(codec.sync(&mut remaining), SyncStatus::Locked);

    let mut out = Vec::new();
    assert_eq!(codec.demodulate(&mut remaining, &mut out), DemodStatus::SyncLost);
    assert_eq!(out, b"hi!");
}

#[test]
fn test_text_packet_roundtrip_both_codecs() {
    for kind in CodecType::ALL {
        let mut codec = new_codec(kind, 48000, 1225).unwrap();
        let packet = Packet::text(12, "The quick brown fox jumps over the lazy dog").unwrap();
        let samples = transmit(codec.as_ref(), &[packet.clone()], 123);

        let received = receive(codec.as_mut(), &samples);
        assert_eq!(received, vec![packet], "{kind} round trip failed");
        assert!(received[0].valid());
        assert_eq!(
            received[0].payload().unwrap(),
            Payload::Text("The quick brown fox jumps over the lazy dog".into())
        );
    }
}

#[test]
fn test_random_file_roundtrip() {
    let mut rng = StdRng::seed_from_u64(7);
    let data: Vec<u8> = (0..2000).map(|_| rng.gen()).collect();

    for kind in CodecType::ALL {
        let mut codec = new_codec(kind, 44100, 1050).unwrap();
        let packet = Packet::file(rng.gen(), "random.bin", &data).unwrap();
        let samples = transmit(codec.as_ref(), &[packet.clone()], rng.gen_range(0..500));

        let received = receive(codec.as_mut(), &samples);
        assert_eq!(received.len(), 1, "{kind} lost the file");
        match received[0].payload().unwrap() {
            Payload::File { name, data: got } => {
                assert_eq!(name, "random.bin");
                assert_eq!(got, data);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }
}

#[test]
fn test_packet_sequence_in_order() {
    let mut codec = new_codec(CodecType::Qpsk, 48000, 1225).unwrap();
    let packets: Vec<Packet> = (0..5u8)
        .map(|i| Packet::text(i, &format!("message number {i}")).unwrap())
        .collect();
    let samples = transmit(codec.as_ref(), &packets, 0);

    assert_eq!(receive(codec.as_mut(), &samples), packets);
}

#[test]
fn test_roundtrip_with_gaussian_noise() {
    for (kind, seed) in [(CodecType::Fsk, 1), (CodecType::Qpsk, 2)] {
        let mut codec = new_codec(kind, 48000, 600).unwrap();
        let packet = Packet::text(3, "noisy channel").unwrap();
        let mut samples = transmit(codec.as_ref(), &[packet.clone()], 1000);
        add_noise(&mut samples, 1500.0, seed);

        assert_eq!(receive(codec.as_mut(), &samples), vec![packet], "{kind} with noise");
    }
}

#[test]
fn test_attenuated_signal() {
    let mut codec = new_codec(CodecType::Fsk, 48000, 1225).unwrap();
    let packet = Packet::text(8, "quiet").unwrap();

    let scaled = |factor: f64| -> Vec<i16> {
        transmit(codec.as_ref(), &[packet.clone()], 50)
            .into_iter()
            .map(|s| (s as f64 * factor) as i16)
            .collect()
    };
    let soft = scaled(0.7);
    let too_soft = scaled(0.4);

    assert_eq!(receive(codec.as_mut(), &soft), vec![packet.clone()]);
    codec.reset();
    assert!(receive(codec.as_mut(), &too_soft).is_empty());
}

#[test]
fn test_pure_noise_delivers_nothing() {
    for kind in CodecType::ALL {
        let mut codec = new_codec(kind, 48000, 1225).unwrap();
        let mut samples = vec![0i16; 48000 * 2];
        add_noise(&mut samples, 2000.0, 99);
        assert!(receive(codec.as_mut(), &samples).is_empty());
    }
}

#[test]
fn test_tampered_packet_reported_corrupted() {
    let mut codec = new_codec(CodecType::Qpsk, 48000, 1225).unwrap();
    let packet = Packet::text(200, "integrity").unwrap();
    let mut bytes = packet.into_bytes();
    let last = bytes.len() - 2;
    bytes[last] = bytes[last].wrapping_add(1);

    let mut samples = codec.modulate(&bytes);
    samples.extend(vec![0; (MIN_WINDOW_BAUDS + 5) * codec.samples_per_baud()]);

    let mut receiver = PacketReceiver::new();
    receiver.extend(&samples);
    let events = receiver.drain(codec.as_mut());
    assert!(events.contains(&ReceiveEvent::Corrupted { id: 200 }));
    assert!(!events.iter().any(|e| matches!(e, ReceiveEvent::Completed(_))));
}
