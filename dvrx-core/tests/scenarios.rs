//! End-to-end scenarios across the DSP front-end, the data assembler and
//! the trunking control path.

use num_complex::Complex64;

use dvrx_core::config::{DemodConfig, TrunkConfig};
use dvrx_core::errors::TuneError;
use dvrx_core::event::{Event, VecSink};
use dvrx_core::fec::crc::{bytes_to_bits, crc12, crc9};
use dvrx_core::fec::golay;
use dvrx_core::fec::bptc;
use dvrx_core::frame::assembler::{append_pdu_crc32, SlotAssembler};
use dvrx_core::frame::burst::{decode_burst, BurstType};
use dvrx_core::keystore::KeyStore;
use dvrx_core::pipeline::{MacChannel, Pipeline};
use dvrx_core::proto::dmr::data::dispatch_pdu;
use dvrx_core::Tuner;

#[derive(Default)]
struct RecordingTuner {
    tuned_to: Vec<u64>,
}

impl Tuner for RecordingTuner {
    fn tune(&mut self, freq_hz: u64) -> Result<(), TuneError> {
        self.tuned_to.push(freq_hz);
        Ok(())
    }
}

fn tone(freq_hz: f64, sample_rate: f64, n: usize, start: usize) -> Vec<Complex64> {
    (start..start + n)
        .map(|i| {
            Complex64::from_polar(
                1.0,
                std::f64::consts::TAU * freq_hz / sample_rate * i as f64,
            )
        })
        .collect()
}

fn mac_frame(span_bits: usize, pdu: &[u8]) -> Vec<u8> {
    let mut bits = bytes_to_bits(pdu);
    bits.resize(span_bits, 0);
    let c = crc12(&bits);
    for i in (0..12).rev() {
        bits.push(((c >> i) & 1) as u8);
    }
    bits
}

/// The FLL frequency estimate survives a samples-per-symbol change.
#[test]
fn fll_preserves_frequency_across_sps_change() {
    let mut fe = dvrx_core::dsp::cqpsk::CqpskFrontEnd::new(DemodConfig::for_sps(5.0));
    let mut symbols = Vec::new();
    fe.process(&tone(200.0, 24_000.0, 2048, 0), &mut symbols);
    let f_before = fe.fll_frequency_hz(24_000.0);

    fe.retune(4.0);
    assert!(
        (fe.fll_frequency_hz(24_000.0) - f_before).abs() < 1.0,
        "FLL frequency moved across retune"
    );

    symbols.clear();
    fe.process(&tone(200.0, 24_000.0, 256, 2048), &mut symbols);
    assert!(!symbols.is_empty(), "no symbols after reconfiguration");
}

/// Soft Golay(24,12) pulls a four-bit burst out when the damaged
/// positions carry near-zero reliability.
#[test]
fn soft_golay_corrects_four_bit_burst() {
    let cw = golay::encode_24_12(0x5A3);
    let mut bits: Vec<u8> = (0..24).rev().map(|i| ((cw >> i) & 1) as u8).collect();
    let mut rel = [250u8; 24];
    for &pos in &[0usize, 5, 11, 23] {
        bits[pos] ^= 1;
        rel[pos] = 10;
    }
    let out = golay::soft_24_12(&bits, &rel, 64).expect("soft decode");
    assert_eq!(out.data, 0x5A3);
    assert_eq!(out.fixed, 4);
}

fn confirmed_block_burst(dbsn: u8, data: &[u8; 10]) -> [u8; 196] {
    let data_bits = bytes_to_bits(data);
    let c = crc9(&data_bits) ^ 0x0F0;
    let mut bits = Vec::with_capacity(96);
    for i in (0..7).rev() {
        bits.push((dbsn >> i) & 1);
    }
    for i in (0..9).rev() {
        bits.push(((c >> i) & 1) as u8);
    }
    bits.extend_from_slice(&data_bits);
    bptc::encode_196_96(&bits, [0, 0, 0])
}

fn header_burst_bytes(btf: u8, sap: u8) -> Vec<u8> {
    let mut bytes = vec![0u8; 12];
    bytes[0] = 0x80 | 0x3; // group, confirmed DPF
    bytes[1] = sap << 4;
    bytes[2..5].copy_from_slice(&[0x00, 0x00, 0x64]);
    bytes[5..8].copy_from_slice(&[0x00, 0x23, 0x29]);
    bytes[8] = btf;
    bytes
}

/// Confirmed rate-1/2 sequence: in-order assembles and dispatches to
/// the short-data SAP; a DBSN swap in strict mode resets the slot.
#[test]
fn confirmed_rate_half_dbsn_sequence() {
    let cfg = TrunkConfig::default();
    let erasure = 64;

    // Payload spanning three blocks, CRC-32 in the last four octets.
    let mut data: Vec<u8> = (0u8..26).collect();
    append_pdu_crc32(&mut data);
    let blocks: Vec<[u8; 10]> = data
        .chunks_exact(10)
        .map(|c| {
            let mut b = [0u8; 10];
            b.copy_from_slice(c);
            b
        })
        .collect();

    let mut asm = SlotAssembler::new();
    let header = dvrx_core::frame::burst::DecodedBurst {
        burst: BurstType::DataHeader,
        bytes: header_burst_bytes(3, 10),
        crc_ok: true,
        fec_corrected: 0,
        dbsn: None,
    };
    asm.on_data_header(&header, &cfg).unwrap();

    let rel = [200u8; 196];
    let mut pdu = None;
    for (i, block) in blocks.iter().enumerate() {
        let raw = confirmed_block_burst(i as u8, block);
        let decoded = decode_burst(BurstType::Rate12Confirmed, &raw, &rel, erasure).unwrap();
        assert!(decoded.crc_ok, "block {} CRC-9", i);
        pdu = asm.on_data_block(&decoded, &cfg).unwrap();
    }
    assert_eq!(asm.block_counter(), 0, "assembler back to idle");
    assert!(asm.is_idle());

    let mut sink = VecSink::default();
    dispatch_pdu(pdu.expect("assembled pdu"), &KeyStore::new(), &mut sink, 0);
    match &sink.records[0].event {
        Event::DataPdu { sap, src, dst, .. } => {
            assert_eq!(*sap, 10);
            assert_eq!(*src, 0x2329);
            assert_eq!(*dst, 0x64);
        }
        other => panic!("unexpected event {:?}", other),
    }

    // Out-of-order DBSN in strict mode: slot resets, nothing dispatched.
    let mut asm = SlotAssembler::new();
    asm.on_data_header(&header, &cfg).unwrap();
    let first = decode_burst(
        BurstType::Rate12Confirmed,
        &confirmed_block_burst(0, &blocks[0]),
        &rel,
        erasure,
    )
    .unwrap();
    asm.on_data_block(&first, &cfg).unwrap();
    let skipped = decode_burst(
        BurstType::Rate12Confirmed,
        &confirmed_block_burst(2, &blocks[2]),
        &rel,
        erasure,
    )
    .unwrap();
    let err = asm.on_data_block(&skipped, &cfg).unwrap_err();
    assert!(matches!(
        err,
        dvrx_core::errors::FrameError::OutOfSequence {
            expected_dbsn: 1,
            got_dbsn: 2
        }
    ));
    assert!(asm.is_idle());
}

fn establish_site(p: &mut Pipeline, tuner: &mut RecordingTuner, sink: &mut VecSink) {
    // RFSS_STATUS then NETWORK_STATUS with matching sysid 0x123.
    let rfss = {
        let mut pdu = vec![0x00u8 << 5];
        pdu.extend_from_slice(&[0x7A, 0x00, 0x01, 0x23, 0x01, 0x01, 0x10, 0x42, 0x00]);
        pdu
    };
    let net = {
        let mut pdu = vec![0x00u8 << 5];
        pdu.extend_from_slice(&[0x7B, 0x00, 0xBE, 0xE0, 0x01, 0x23, 0x10, 0x42, 0x00, 0x00]);
        pdu
    };
    p.handle_mac_frame(&mac_frame(144, &rfss), MacChannel::Facch, 0, tuner, sink);
    p.handle_mac_frame(&mac_frame(144, &net), MacChannel::Facch, 0, tuner, sink);
}

fn iden_up_tdma(iden: u8) -> Vec<u8> {
    let base = (851_000_000u32 / 5).to_be_bytes();
    let offset = 0x2000u16 | 180; // −45 MHz in 250 kHz units
    let mut pdu = vec![0x00u8 << 5, 0x73, (iden << 4) | 0x03];
    pdu.extend_from_slice(&offset.to_be_bytes());
    pdu.extend_from_slice(&100u16.to_be_bytes()); // 12.5 kHz spacing
    pdu.extend_from_slice(&base);
    pdu
}

fn group_grant(ch: u16, tg: u16, src: u32, svc: u8) -> Vec<u8> {
    let mut pdu = vec![0x00u8 << 5, 0x01, svc];
    pdu.extend_from_slice(&ch.to_be_bytes());
    pdu.extend_from_slice(&tg.to_be_bytes());
    pdu.extend_from_slice(&src.to_be_bytes()[1..]);
    pdu
}

/// IDEN_UP_TDMA from the live site, then a grant resolves and tunes.
#[test]
fn iden_update_then_grant() {
    let mut p = Pipeline::new(
        DemodConfig::for_sps(5.0),
        TrunkConfig::default(),
        KeyStore::new(),
    );
    p.sm.set_cc_freq(853_000_000);
    let mut tuner = RecordingTuner::default();
    let mut sink = VecSink::default();

    establish_site(&mut p, &mut tuner, &mut sink);
    p.handle_mac_frame(
        &mac_frame(144, &iden_up_tdma(1)),
        MacChannel::Facch,
        0,
        &mut tuner,
        &mut sink,
    );
    assert_eq!(p.ctx.iden.resolve(0x1042), Some(851_825_000));

    p.handle_mac_frame(
        &mac_frame(144, &group_grant(0x1042, 100, 9001, 0)),
        MacChannel::Facch,
        0,
        &mut tuner,
        &mut sink,
    );
    assert!(p.sm.tuned());
    assert_eq!(p.sm.active_tg(), 100);
    assert_eq!(tuner.tuned_to.last(), Some(&851_825_000));
}

/// Encrypted grant with enc-following disabled: one lockout event,
/// no tune, idempotent on redelivery.
#[test]
fn encryption_lockout_fires_once() {
    let mut p = Pipeline::new(
        DemodConfig::for_sps(5.0),
        TrunkConfig::default(),
        KeyStore::new(),
    );
    p.sm.set_cc_freq(853_000_000);
    let mut tuner = RecordingTuner::default();
    let mut sink = VecSink::default();

    establish_site(&mut p, &mut tuner, &mut sink);
    p.handle_mac_frame(
        &mac_frame(144, &iden_up_tdma(1)),
        MacChannel::Facch,
        0,
        &mut tuner,
        &mut sink,
    );
    let tunes_before = tuner.tuned_to.len();

    let grant = mac_frame(144, &group_grant(0x1042, 500, 9001, 0x40));
    p.handle_mac_frame(&grant, MacChannel::Facch, 0, &mut tuner, &mut sink);
    p.handle_mac_frame(&grant, MacChannel::Facch, 0, &mut tuner, &mut sink);

    assert!(!p.sm.tuned());
    assert_eq!(tuner.tuned_to.len(), tunes_before, "no tune on lockout");
    let lockouts = sink
        .records
        .iter()
        .filter(|r| matches!(r.event, Event::EncryptionLockout { tg: 500, .. }))
        .count();
    assert_eq!(lockouts, 1);
}

/// MAC_RELEASE drops both gates and returns to the control channel.
#[test]
fn mac_release_returns_to_cc() {
    let mut p = Pipeline::new(
        DemodConfig::for_sps(5.0),
        TrunkConfig::default(),
        KeyStore::new(),
    );
    p.sm.set_cc_freq(853_000_000);
    let mut tuner = RecordingTuner::default();
    let mut sink = VecSink::default();

    establish_site(&mut p, &mut tuner, &mut sink);
    p.handle_mac_frame(
        &mac_frame(144, &iden_up_tdma(1)),
        MacChannel::Facch,
        0,
        &mut tuner,
        &mut sink,
    );
    p.handle_mac_frame(
        &mac_frame(144, &group_grant(0x1042, 100, 9001, 0)),
        MacChannel::Facch,
        0,
        &mut tuner,
        &mut sink,
    );
    assert!(p.sm.tuned());
    p.sm.set_audio_gate(0, true);
    p.sm.set_audio_gate(1, true);

    p.handle_mac_frame(
        &mac_frame(144, &[0x00u8 << 5, 0x31, 0x80, 0x00]),
        MacChannel::Facch,
        0,
        &mut tuner,
        &mut sink,
    );
    assert!(!p.sm.tuned());
    assert!(!p.sm.audio_allowed(0) && !p.sm.audio_allowed(1));
    assert_eq!(tuner.tuned_to.last(), Some(&853_000_000));
}

/// The front-end never emits more than one symbol per sps samples.
#[test]
fn front_end_never_over_emits() {
    for sps in [4.0f64, 5.0, 10.0] {
        let mut fe = dvrx_core::dsp::cqpsk::CqpskFrontEnd::new(DemodConfig::for_sps(sps));
        let mut out = Vec::new();
        let n = 4096;
        fe.process(&tone(50.0, 48_000.0, n, 0), &mut out);
        assert!(
            out.len() <= (n as f64 / sps).ceil() as usize,
            "sps {} emitted {}",
            sps,
            out.len()
        );
    }
}

/// Double release is a no-op.
#[test]
fn trunking_release_is_reentrant() {
    let mut p = Pipeline::new(
        DemodConfig::for_sps(5.0),
        TrunkConfig::default(),
        KeyStore::new(),
    );
    p.sm.set_cc_freq(853_000_000);
    let mut tuner = RecordingTuner::default();
    let mut sink = VecSink::default();
    p.force_release(&mut tuner, &mut sink);
    p.force_release(&mut tuner, &mut sink);
    assert!(tuner.tuned_to.is_empty());
    assert!(sink.records.is_empty());
}

/// Events must render as JSON with the envelope fields present.
#[test]
fn event_json_contract() {
    let mut p = Pipeline::new(
        DemodConfig::for_sps(5.0),
        TrunkConfig::default(),
        KeyStore::new(),
    );
    p.sm.set_cc_freq(853_000_000);
    let mut tuner = RecordingTuner::default();
    let mut sink = VecSink::default();
    establish_site(&mut p, &mut tuner, &mut sink);
    let site = sink
        .records
        .iter()
        .find(|r| matches!(r.event, Event::SiteStatus { .. }))
        .expect("site status event");
    let json = dvrx_core::event::to_json(site);
    assert!(json.contains("\"event\":\"site_status\""));
    assert!(json.contains("\"timestamp\""));
}
