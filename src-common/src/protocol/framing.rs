//! Video frame chunking with XOR parity.
//!
//! An encoded frame is split into fixed-size chunks that fit the wire MTU.
//! After every full group of [`FEC_GROUP_SIZE`] data chunks one parity
//! packet is emitted whose payload is the XOR of the group's payloads
//! (padded to the longest); a receiver can rebuild any single lost chunk
//! per group. The trailing partial group carries no parity.

use super::packet::{PacketHeader, PACKET_HEADER_SIZE, PKT_DATA, PKT_FEC};

/// Wire packet budget per chunk, header included.
pub const WIRE_MTU: usize = 1400;

/// Payload bytes per data chunk.
pub const DATA_CHUNK: usize = WIRE_MTU - PACKET_HEADER_SIZE;

/// Data chunks covered by one parity packet.
pub const FEC_GROUP_SIZE: usize = 4;

/// Chunk counts are carried in a u16.
pub const MAX_CHUNKS: usize = 65_535;

/// Per-frame metadata stamped into every chunk header.
#[derive(Debug, Clone, Copy)]
pub struct FrameMeta {
    pub timestamp: i64,
    pub encode_time_us: u32,
    pub frame_id: u32,
    pub is_key: bool,
}

/// Number of data and parity packets a frame of `size` bytes produces.
pub fn chunk_counts(size: usize) -> (usize, usize) {
    let nchunks = size.div_ceil(DATA_CHUNK);
    (nchunks, nchunks / FEC_GROUP_SIZE)
}

/// Split an encoded frame into wire packets, data and parity interleaved in
/// send order. Returns `None` for empty frames and frames that would need
/// more than [`MAX_CHUNKS`] chunks.
pub fn packetize(frame: &[u8], meta: FrameMeta) -> Option<Vec<Vec<u8>>> {
    let size = frame.len();
    if size == 0 || size > DATA_CHUNK * MAX_CHUNKS {
        return None;
    }
    let (nchunks, nfec) = chunk_counts(size);

    let mut header = PacketHeader {
        timestamp: meta.timestamp,
        encode_time_us: meta.encode_time_us,
        frame_id: meta.frame_id,
        total_size: size as u32,
        chunk_index: 0,
        total_chunks: nchunks as u16,
        chunk_bytes: 0,
        data_chunk_size: DATA_CHUNK as u16,
        frame_type: meta.is_key as u8,
        packet_type: PKT_DATA,
        fec_group_size: FEC_GROUP_SIZE as u8,
    };

    let mut packets = Vec::with_capacity(nchunks + nfec);
    let mut parity = [0u8; DATA_CHUNK];

    for group in 0..nchunks.div_ceil(FEC_GROUP_SIZE) {
        let start = group * FEC_GROUP_SIZE;
        let end = (start + FEC_GROUP_SIZE).min(nchunks);
        let mut parity_len = 0usize;
        parity.fill(0);

        for i in start..end {
            let off = i * DATA_CHUNK;
            let len = DATA_CHUNK.min(size - off);
            let payload = &frame[off..off + len];

            header.chunk_index = i as u16;
            header.chunk_bytes = len as u16;
            header.packet_type = PKT_DATA;

            let mut pkt = Vec::with_capacity(PACKET_HEADER_SIZE + len);
            header.write_to(&mut pkt);
            pkt.extend_from_slice(payload);
            packets.push(pkt);

            parity_len = parity_len.max(len);
            for (p, b) in parity.iter_mut().zip(payload) {
                *p ^= b;
            }
        }

        if end - start == FEC_GROUP_SIZE && parity_len > 0 {
            header.chunk_index = group as u16;
            header.chunk_bytes = parity_len as u16;
            header.packet_type = PKT_FEC;

            let mut pkt = Vec::with_capacity(PACKET_HEADER_SIZE + parity_len);
            header.write_to(&mut pkt);
            pkt.extend_from_slice(&parity[..parity_len]);
            packets.push(pkt);
        }
    }

    Some(packets)
}

/// Recover a missing chunk payload from the group's parity payload and the
/// surviving chunk payloads. Shorter survivors are treated as zero-padded.
pub fn recover_chunk(parity: &[u8], survivors: &[&[u8]]) -> Vec<u8> {
    let mut out = parity.to_vec();
    for s in survivors {
        for (o, b) in out.iter_mut().zip(s.iter()) {
            *o ^= b;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::PacketHeader;

    fn meta(is_key: bool) -> FrameMeta {
        FrameMeta {
            timestamp: 1_000_000,
            encode_time_us: 500,
            frame_id: 1,
            is_key,
        }
    }

    fn split(pkts: &[Vec<u8>]) -> (Vec<(PacketHeader, Vec<u8>)>, Vec<(PacketHeader, Vec<u8>)>) {
        let mut data = Vec::new();
        let mut fec = Vec::new();
        for p in pkts {
            let h = PacketHeader::parse(p).unwrap();
            let payload = p[PACKET_HEADER_SIZE..].to_vec();
            assert_eq!(payload.len(), h.chunk_bytes as usize);
            if h.packet_type == PKT_FEC {
                fec.push((h, payload));
            } else {
                data.push((h, payload));
            }
        }
        (data, fec)
    }

    #[test]
    fn test_chunk_counts() {
        assert_eq!(chunk_counts(1), (1, 0));
        assert_eq!(chunk_counts(DATA_CHUNK), (1, 0));
        assert_eq!(chunk_counts(DATA_CHUNK + 1), (2, 0));
        assert_eq!(chunk_counts(DATA_CHUNK * 4), (4, 1));
        assert_eq!(chunk_counts(DATA_CHUNK * 9), (9, 2));
    }

    #[test]
    fn test_empty_frame_rejected() {
        assert!(packetize(&[], meta(false)).is_none());
        assert!(packetize(&[0u8], meta(false)).is_some());
    }

    #[test]
    fn test_concatenation_reconstructs_frame() {
        let frame: Vec<u8> = (0..DATA_CHUNK * 3 + 100).map(|i| (i % 251) as u8).collect();
        let pkts = packetize(&frame, meta(true)).unwrap();
        let (mut data, _) = split(&pkts);
        data.sort_by_key(|(h, _)| h.chunk_index);

        let mut rebuilt = Vec::new();
        for (h, payload) in &data {
            assert_eq!(h.total_chunks, 4);
            assert_eq!(h.total_size as usize, frame.len());
            assert_eq!(h.frame_type, 1);
            rebuilt.extend_from_slice(payload);
        }
        assert_eq!(rebuilt, frame);
    }

    #[test]
    fn test_trailing_partial_group_has_no_fec() {
        // 5 chunks: one full group (parity) plus a trailing single chunk.
        let frame = vec![7u8; DATA_CHUNK * 4 + 10];
        let pkts = packetize(&frame, meta(false)).unwrap();
        let (data, fec) = split(&pkts);
        assert_eq!(data.len(), 5);
        assert_eq!(fec.len(), 1);
        assert_eq!(fec[0].0.chunk_index, 0); // group index
        assert_eq!(fec[0].0.chunk_bytes as usize, DATA_CHUNK);
    }

    #[test]
    fn test_fec_recovers_lost_chunk() {
        // A frame spanning five chunks loses its third chunk; the first
        // group's parity restores it.
        let frame: Vec<u8> = (0..DATA_CHUNK * 4 + 123)
            .map(|i| (i.wrapping_mul(31) % 256) as u8)
            .collect();
        let pkts = packetize(&frame, meta(false)).unwrap();
        let (data, fec) = split(&pkts);

        let lost = &data[2];
        let survivors: Vec<&[u8]> = data[..4]
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != 2)
            .map(|(_, (_, p))| p.as_slice())
            .collect();
        let recovered = recover_chunk(&fec[0].1, &survivors);
        assert_eq!(&recovered[..lost.1.len()], lost.1.as_slice());
    }

    #[test]
    fn test_single_full_group_parity_is_xor() {
        let frame = vec![0xF0u8; DATA_CHUNK * 4];
        let pkts = packetize(&frame, meta(false)).unwrap();
        let (data, fec) = split(&pkts);
        assert_eq!(data.len(), 4);
        assert_eq!(fec.len(), 1);
        // XOR of four identical payloads is zero.
        assert!(fec[0].1.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_delta_frames_are_marked() {
        let pkts = packetize(&[1, 2, 3], meta(false)).unwrap();
        let h = PacketHeader::parse(&pkts[0]).unwrap();
        assert_eq!(h.frame_type, 0);
        assert_eq!(h.total_chunks, 1);
        assert_eq!(h.chunk_bytes, 3);
    }
}
