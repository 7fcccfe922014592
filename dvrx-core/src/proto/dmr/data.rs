//! Data-PDU routing: proprietary-header crypto parameters, SAP dispatch,
//! and UDT/short-data payload decoding.

use log::debug;

use crate::event::{Event, EventRecord, EventSink};
use crate::frame::assembler::{AssembledPdu, CryptoParams, DataHeader};
use crate::keystore::KeyStore;

use super::crypto;

/// Service access points carried in the data header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sap {
    Udt,
    TcpHeaderCompression,
    UdpHeaderCompression,
    Ip,
    Arp,
    Proprietary,
    ShortData,
    /// Vendor network-interface service traffic.
    Mnis,
    Unknown(u8),
}

impl Sap {
    pub fn from_value(v: u8) -> Self {
        match v {
            0 => Sap::Udt,
            1 => Sap::Mnis,
            2 => Sap::TcpHeaderCompression,
            3 => Sap::UdpHeaderCompression,
            4 => Sap::Ip,
            5 => Sap::Arp,
            9 => Sap::Proprietary,
            10 => Sap::ShortData,
            other => Sap::Unknown(other),
        }
    }
}

/// UDT payload format nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UdtFormat {
    Binary,
    MsAddress,
    Bcd,
    Iso7,
    Iso8,
    Nmea,
    IpAddress,
    Utf16Be,
    MixedAddressText,
    Lip,
    AppendedAddressing,
    Reserved(u8),
}

impl UdtFormat {
    pub fn from_nibble(n: u8) -> Self {
        match n & 0xF {
            0x0 => UdtFormat::Binary,
            0x1 => UdtFormat::MsAddress,
            0x2 => UdtFormat::Bcd,
            0x3 => UdtFormat::Iso7,
            0x4 => UdtFormat::Iso8,
            0x5 => UdtFormat::Nmea,
            0x6 => UdtFormat::IpAddress,
            0x7 => UdtFormat::Utf16Be,
            0x8 => UdtFormat::MixedAddressText,
            0x9 => UdtFormat::Lip,
            0xA => UdtFormat::AppendedAddressing,
            other => UdtFormat::Reserved(other),
        }
    }
}

/// Parse the proprietary header that precedes encrypted data blocks.
pub fn parse_proprietary_header(bytes: &[u8]) -> Option<CryptoParams> {
    if bytes.len() < 12 || bytes[0] & 0x0F != 0x0F {
        return None;
    }
    Some(CryptoParams {
        alg: bytes[2],
        keyid: u16::from(bytes[3]) << 8 | u16::from(bytes[4]),
        mi: u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]),
    })
}

/// Decode text from a UDT payload according to its format nibble.
pub fn decode_udt_text(format: UdtFormat, data: &[u8]) -> Option<String> {
    match format {
        UdtFormat::Iso7 => {
            let mut out = String::new();
            let mut acc = 0u16;
            let mut bits = 0u32;
            for &b in data {
                acc = (acc << 8) | u16::from(b);
                bits += 8;
                while bits >= 7 {
                    let ch = ((acc >> (bits - 7)) & 0x7F) as u8;
                    bits -= 7;
                    if ch == 0 {
                        continue;
                    }
                    out.push(char::from(ch));
                }
            }
            Some(out)
        }
        UdtFormat::Iso8 => Some(
            data.iter()
                .filter(|&&b| b != 0)
                .map(|&b| char::from(b))
                .collect(),
        ),
        UdtFormat::Utf16Be => {
            let units: Vec<u16> = data
                .chunks_exact(2)
                .map(|c| u16::from(c[0]) << 8 | u16::from(c[1]))
                .filter(|&u| u != 0)
                .collect();
            Some(String::from_utf16_lossy(&units))
        }
        UdtFormat::Bcd | UdtFormat::MsAddress => {
            let mut out = String::new();
            for &b in data {
                for nibble in [b >> 4, b & 0xF] {
                    if nibble <= 9 {
                        out.push(char::from(b'0' + nibble));
                    }
                }
            }
            Some(out)
        }
        UdtFormat::IpAddress => match data.len() {
            n if n >= 16 => Some(
                data[..16]
                    .chunks_exact(2)
                    .map(|c| format!("{:02x}{:02x}", c[0], c[1]))
                    .collect::<Vec<_>>()
                    .join(":"),
            ),
            n if n >= 4 => Some(format!("{}.{}.{}.{}", data[0], data[1], data[2], data[3])),
            _ => None,
        },
        _ => None,
    }
}

fn hex_summary(data: &[u8], max: usize) -> String {
    let shown = &data[..data.len().min(max)];
    let mut s: String = shown.iter().map(|b| format!("{:02x}", b)).collect();
    if data.len() > max {
        s.push('…');
    }
    s
}

fn ipv4_summary(data: &[u8]) -> Option<String> {
    if data.len() < 20 || data[0] >> 4 != 4 {
        return None;
    }
    let proto = data[9];
    let src = format!("{}.{}.{}.{}", data[12], data[13], data[14], data[15]);
    let dst = format!("{}.{}.{}.{}", data[16], data[17], data[18], data[19]);
    if proto == 17 && data.len() >= 28 {
        let ihl = usize::from(data[0] & 0xF) * 4;
        let sport = u16::from(data[ihl]) << 8 | u16::from(data[ihl + 1]);
        let dport = u16::from(data[ihl + 2]) << 8 | u16::from(data[ihl + 3]);
        return Some(format!("udp {}:{} > {}:{}", src, sport, dst, dport));
    }
    Some(format!("ip proto {} {} > {}", proto, src, dst))
}

/// Route one finished PDU: decrypt when parameters and key material are
/// present, then dispatch by SAP (or UDT format) and emit an event.
pub fn dispatch_pdu(
    pdu: AssembledPdu,
    keys: &KeyStore,
    sink: &mut dyn EventSink,
    slot: u8,
) {
    match pdu {
        AssembledPdu::Data {
            header,
            mut payload,
            crypto: params,
        } => {
            if let Some(params) = params {
                // CRC-32 was verified on ciphertext by the assembler;
                // the keystream never touches pads or the CRC tail.
                let ran = crypto::decrypt_payload(
                    params,
                    keys,
                    &mut payload,
                    0,
                    usize::from(header.pad_octets),
                );
                if !ran {
                    debug!("pdu left encrypted: alg {:#04x}", params.alg);
                }
            }
            let data_end = payload
                .len()
                .saturating_sub(usize::from(header.pad_octets) + 4);
            let data = &payload[..data_end];
            let summary = match Sap::from_value(header.sap) {
                Sap::Ip | Sap::TcpHeaderCompression | Sap::UdpHeaderCompression => {
                    ipv4_summary(data).unwrap_or_else(|| hex_summary(data, 16))
                }
                Sap::ShortData => short_data_summary(&header, data),
                Sap::Mnis => format!("mnis {}", hex_summary(data, 12)),
                Sap::Arp => String::from("arp"),
                _ => hex_summary(data, 16),
            };
            sink.emit(EventRecord::new(
                "dmr",
                Some(slot),
                Event::DataPdu {
                    sap: header.sap,
                    src: header.src,
                    dst: header.dst,
                    octets: data.len(),
                    summary,
                },
            ));
        }
        AssembledPdu::Udt { header, payload } => {
            let format = UdtFormat::from_nibble(header.udt_format);
            let span = payload.len().saturating_sub(2);
            let text = decode_udt_text(format, &payload[..span]);
            let summary = text.unwrap_or_else(|| hex_summary(&payload[..span], 16));
            sink.emit(EventRecord::new(
                "dmr",
                Some(slot),
                Event::DataPdu {
                    sap: header.sap,
                    src: header.src,
                    dst: header.dst,
                    octets: span,
                    summary,
                },
            ));
        }
        AssembledPdu::Mbc {
            header,
            continuation,
        } => {
            // Protect flag clear: the assembled MBC carries a CSBK.
            if header[0] & 0x40 == 0 {
                super::csbk::handle_mbc(&header, &continuation, sink, slot);
            }
        }
    }
}

fn short_data_summary(header: &DataHeader, data: &[u8]) -> String {
    let format = UdtFormat::from_nibble(header.udt_format);
    decode_udt_text(format, data)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| hex_summary(data, 16))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::VecSink;
    use crate::frame::assembler::Dpf;

    fn header(sap: u8) -> DataHeader {
        DataHeader {
            dpf: Dpf::Confirmed,
            sap,
            group: true,
            response_requested: false,
            blocks_to_follow: 3,
            pad_octets: 0,
            dst: 100,
            src: 9001,
            confirmed: true,
            udt_format: 0x4,
            udt_uab: 0,
        }
    }

    #[test]
    fn iso7_text_unpacks() {
        // "HI" in packed 7-bit: 1001000 1001001 (+2 pad bits).
        let packed = [0b1001000_1u8, 0b001001_00];
        assert_eq!(decode_udt_text(UdtFormat::Iso7, &packed).unwrap(), "HI");
    }

    #[test]
    fn utf16_text_decodes() {
        let data = [0x00, 0x4F, 0x00, 0x4B];
        assert_eq!(decode_udt_text(UdtFormat::Utf16Be, &data).unwrap(), "OK");
    }

    #[test]
    fn short_data_pdu_emits_event_with_text() {
        let mut sink = VecSink::default();
        let mut payload = b"hello".to_vec();
        payload.extend_from_slice(&[0, 0, 0, 0]); // CRC tail placeholder
        let pdu = AssembledPdu::Data {
            header: header(10),
            payload,
            crypto: None,
        };
        dispatch_pdu(pdu, &KeyStore::new(), &mut sink, 1);
        assert_eq!(sink.records.len(), 1);
        match &sink.records[0].event {
            Event::DataPdu { sap, summary, .. } => {
                assert_eq!(*sap, 10);
                assert_eq!(summary, "hello");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn ipv4_udp_summary_formats_endpoints() {
        let mut pkt = vec![0u8; 28];
        pkt[0] = 0x45;
        pkt[9] = 17;
        pkt[12..16].copy_from_slice(&[10, 0, 0, 1]);
        pkt[16..20].copy_from_slice(&[10, 0, 0, 2]);
        pkt[20..22].copy_from_slice(&[0x13, 0x88]); // 5000
        pkt[22..24].copy_from_slice(&[0x13, 0x89]); // 5001
        assert_eq!(
            ipv4_summary(&pkt).unwrap(),
            "udp 10.0.0.1:5000 > 10.0.0.2:5001"
        );
    }
}
