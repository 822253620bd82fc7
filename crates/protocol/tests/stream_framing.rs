//! Framer and codec behaviour over realistic byte streams.

use proptest::prelude::*;
use protocol::{crc16, crc8, encode, try_decode, Decoded, StreamFramer, HEADER_SIZE};

fn garbage(len: usize) -> Vec<u8> {
    // Never contains 0xAA so no sync marker can appear
    (0..len).map(|i| (i * 7 % 0xA0) as u8).collect()
}

#[test]
fn test_resync_after_garbage() {
    for k in [0usize, 1, 2, 8, 9, 31] {
        let frame = encode(&[42], 1, 0, 8, 1).unwrap();
        let mut stream = garbage(k);
        stream.extend_from_slice(&frame);

        let mut framer = StreamFramer::new();
        let packets = framer.feed(&stream);

        assert_eq!(packets.len(), 1, "K = {}", k);
        assert_eq!(packets[0].payload, vec![42]);
        assert_eq!(framer.buffered(), 0);
        assert_eq!(framer.stats().resync_bytes, k as u64);
    }
}

#[test]
fn test_byte_at_a_time_emits_once_complete() {
    let frame = encode(&[0xDEAD_BEEF, 7], 4, 9, 32, 8).unwrap();
    let mut framer = StreamFramer::new();

    for (i, byte) in frame.iter().enumerate() {
        let packets = framer.feed(&[*byte]);
        if i + 1 < frame.len() {
            assert!(packets.is_empty(), "emitted early at byte {}", i);
        } else {
            assert_eq!(packets.len(), 1);
            assert_eq!(packets[0].payload, vec![0xDEAD_BEEF, 7]);
        }
    }

    let stats = framer.stats();
    assert_eq!(stats.bad_crc, 0);
    assert_eq!(stats.resync_bytes, 0);
}

#[test]
fn test_corrupted_frame_does_not_wedge_the_stream() {
    // Step 1: a good frame, a corrupted one, then noise and another good one
    let first = encode(&[1], 1, 0, 8, 1).unwrap();
    let mut broken = encode(&[2, 3], 2, 0, 8, 2).unwrap();
    broken[HEADER_SIZE + 1] ^= 0x10;
    let last = encode(&[4], 3, 0, 8, 1).unwrap();

    let mut stream = first.clone();
    stream.extend(&broken);
    stream.extend(garbage(5));
    stream.extend(&last);

    // Step 2: feed it in uneven chunks
    let mut framer = StreamFramer::new();
    let mut packets = Vec::new();
    for chunk in stream.chunks(4) {
        packets.extend(framer.feed(chunk));
    }

    // Step 3: the good frames survive in order
    let codes: Vec<u8> = packets.iter().map(|p| p.event_code).collect();
    assert_eq!(codes, vec![1, 3]);
    assert_eq!(framer.stats().bad_crc, 1);
    assert_eq!(framer.stats().resync_bytes, 5);
}

#[test]
fn test_ping_decodes_on_the_peer() {
    let frame = encode(&[], 14, 0, 8, 0).unwrap();
    match try_decode(&frame) {
        Decoded::Found(packet, data_size) => {
            assert_eq!(packet.event_code, 14);
            assert_eq!(data_size, 0);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_crc_reference_vectors() {
    assert_eq!(crc16(b"123456789"), 0x4B37);
    assert_eq!(crc8(b"123456789"), 0xF7);
}

fn packet_args() -> impl Strategy<Value = (u8, u8, u8, Vec<u32>)> {
    (any::<u8>(), any::<u8>(), prop_oneof![Just(8u8), Just(16u8), Just(32u8)]).prop_flat_map(
        |(code, iter, bits)| {
            let max = if bits == 32 {
                u32::MAX
            } else {
                (1u32 << bits) - 1
            };
            (
                Just(code),
                Just(iter),
                Just(bits),
                proptest::collection::vec(0..=max, 0..64),
            )
        },
    )
}

proptest! {
    #[test]
    fn prop_crc_detects_single_bit_flips(data in proptest::collection::vec(any::<u8>(), 1..256), bit in any::<usize>()) {
        let bit = bit % (data.len() * 8);
        let mut flipped = data.clone();
        flipped[bit / 8] ^= 1 << (bit % 8);

        prop_assert_eq!(crc16(&data), crc16(&data));
        prop_assert_ne!(crc16(&data), crc16(&flipped));
        prop_assert_ne!(crc8(&data), crc8(&flipped));
    }

    #[test]
    fn prop_packet_round_trip((code, iter, bits, payload) in packet_args()) {
        let data_size = (payload.len() * bits as usize / 8) as u16;
        let frame = encode(&payload, code, iter, bits, data_size).unwrap();

        match try_decode(&frame) {
            Decoded::Found(packet, size) => {
                prop_assert_eq!(size, data_size as usize);
                prop_assert_eq!(packet.event_code, code);
                prop_assert_eq!(packet.event_iter, iter);
                prop_assert_eq!(packet.event_bits, bits);
                prop_assert_eq!(packet.payload, payload);
            }
            other => prop_assert!(false, "unexpected {:?}", other),
        }
    }

    #[test]
    fn prop_framer_consumes_garbage_plus_frame(k in 0usize..64, (code, iter, bits, payload) in packet_args()) {
        let data_size = (payload.len() * bits as usize / 8) as u16;
        let mut stream = garbage(k);
        stream.extend(encode(&payload, code, iter, bits, data_size).unwrap());

        let mut framer = StreamFramer::new();
        let packets = framer.feed(&stream);

        prop_assert_eq!(packets.len(), 1);
        prop_assert_eq!(framer.buffered(), 0);
        prop_assert_eq!(framer.stats().resync_bytes, k as u64);
    }
}
