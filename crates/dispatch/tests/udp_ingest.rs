//! Sample ingest over a loopback UDP socket.

use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use bci_types::{AdcConfig, DispatchEvent, SampleBatch};
use dispatch::{BatchSource, SampleAssembler, UdpDispatcher, UdpIngest};
use protocol::{AmplifierBatch, BatchLayout};

fn batch(counter: u8, seed: i16) -> Vec<u8> {
    let layout = BatchLayout::default();
    let codes: Vec<i16> = (0..(layout.channels * layout.samples) as i16)
        .map(|i| seed.wrapping_add(i))
        .collect();
    AmplifierBatch::encode(counter, &codes, layout).unwrap()
}

fn collect(rx: &flume::Receiver<DispatchEvent>, n: usize) -> Vec<SampleBatch> {
    (0..n)
        .map(|_| match rx.recv_timeout(Duration::from_secs(2)) {
            Ok(DispatchEvent::SampleBatch(batch)) => batch,
            other => panic!("expected a sample batch, got {:?}", other),
        })
        .collect()
}

#[test]
fn test_sequence_and_duplicates_over_udp() {
    env_logger::try_init().ok();
    let (tx, rx) = flume::unbounded();
    let assembler = SampleAssembler::new(BatchLayout::default(), AdcConfig::default());
    let handle = UdpDispatcher::start(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0), assembler, tx).unwrap();
    let target = handle.local_addr().unwrap();

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    let first = batch(1, 0);
    let datagrams = vec![
        first.clone(),
        first, // radio duplicate
        batch(2, 10),
        batch(5, 20),
        batch(5, 30), // same counter, new data
        batch(7, 40),
        batch(250, 50),
        batch(3, 60),
    ];
    for datagram in &datagrams {
        sender.send_to(datagram, target).unwrap();
        std::thread::sleep(Duration::from_millis(2));
    }

    let batches = collect(&rx, 7);
    let lost: Vec<u32> = batches.iter().map(|b| b.lost_packets).collect();
    let counters: Vec<u8> = batches.iter().map(|b| b.counter).collect();
    assert_eq!(counters, vec![1, 2, 5, 5, 7, 250, 3]);
    // a repeated counter reads as a full wrap of 255
    assert_eq!(lost, vec![0, 0, 2, 255, 1, 242, 8]);
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

    assert_eq!(batches[0].channel_count(), 5);
    assert_eq!(batches[0].samples_per_channel(), 80);
    let adc = AdcConfig::default();
    assert_eq!(batches[0].channels[1][0], adc.code_to_volts(1));

    handle.stop();
}

#[test]
fn test_batches_longer_than_default_read_arrive_whole() {
    // 5 channels of 250 samples is a 2505-byte datagram
    let layout = BatchLayout::new(5, 250);
    assert!(layout.frame_len() > 2048);
    let encode = |counter: u8, seed: i16| {
        let codes: Vec<i16> = (0..1250).map(|i| seed.wrapping_add(i)).collect();
        AmplifierBatch::encode(counter, &codes, layout).unwrap()
    };

    let (tx, rx) = flume::unbounded();
    let mut ingest = UdpIngest::bind(
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0),
        SampleAssembler::new(layout, AdcConfig::default()),
    )
    .unwrap()
    .with_poll_timeout(Duration::from_millis(20));
    let target = ingest.local_addr().unwrap();

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    let first = encode(1, 0);
    for datagram in [first.clone(), first, encode(2, 300)] {
        sender.send_to(&datagram, target).unwrap();
    }

    let mut sink = tx;
    let mut delivered = 0;
    for _ in 0..100 {
        delivered += ingest.poll_once(&mut sink).unwrap();
        if delivered == 2 && ingest.stats().duplicates == 1 {
            break;
        }
    }

    let batches = collect(&rx, 2);
    assert_eq!(batches[0].counter, 1);
    assert_eq!(batches[1].counter, 2);
    assert_eq!(batches[1].lost_packets, 0);
    assert_eq!(batches[1].samples_per_channel(), 250);

    let stats = ingest.stats();
    assert_eq!(stats.accepted, 2);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(stats.crc_rejects, 0);
    assert_eq!(stats.resync_bytes, 0);
}

#[test]
fn test_simulated_defects_are_absorbed() {
    let layout = BatchLayout::default();
    let mut source = BatchSource::new(layout, 2000).duplicate_every(4).drop_every(5);
    let mut assembler = SampleAssembler::new(layout, AdcConfig::default());

    let mut batches = Vec::new();
    for _ in 0..20 {
        for datagram in source.next_datagrams().unwrap() {
            batches.extend(assembler.push(&datagram));
        }
    }

    // 20 batches, every 5th withheld, every 4th doubled
    let stats = assembler.stats();
    assert_eq!(batches.len(), 16);
    assert_eq!(stats.accepted, 16);
    assert_eq!(stats.duplicates, 4);
    assert_eq!(stats.crc_rejects, 0);

    // the stream starts at counter 0, which reads as a full wrap
    assert_eq!(batches[0].counter, 0);
    assert_eq!(batches[0].lost_packets, 255);
    // counters 4, 9 and 14 leave gaps; 19 is the last one withheld
    let later_losses: u32 = batches[1..].iter().map(|b| b.lost_packets).sum();
    assert_eq!(later_losses, 3);
}

#[test]
fn test_garbage_between_datagrams_is_skipped() {
    let mut assembler = SampleAssembler::new(BatchLayout::default(), AdcConfig::default());
    let mut out = assembler.push(&[0xAA, 0x00, 0xAA, 0xBB, 0x07]);
    out.extend(assembler.push(&batch(1, 0)));
    out.extend(assembler.push(&batch(2, 5)));

    assert_eq!(out.len(), 2);
    assert_eq!(out[0].counter, 1);
    assert_eq!(out[1].lost_packets, 0);
}
