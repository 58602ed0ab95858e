//! Video and audio packet headers.

use super::*;

/// Size of the packed video packet header on the wire.
pub const PACKET_HEADER_SIZE: usize = 31;

/// Size of the packed audio/mic packet header on the wire.
pub const MEDIA_HEADER_SIZE: usize = 16;

/// Data packet carrying a slice of an encoded frame.
pub const PKT_DATA: u8 = 0;
/// Parity packet covering one group of data chunks.
pub const PKT_FEC: u8 = 1;

/// Header preceding every video chunk.
///
/// Field order is the wire layout; all integers little-endian, no padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub timestamp: i64,
    pub encode_time_us: u32,
    pub frame_id: u32,
    pub total_size: u32,
    /// Chunk index for data packets, group index for parity packets.
    pub chunk_index: u16,
    pub total_chunks: u16,
    pub chunk_bytes: u16,
    pub data_chunk_size: u16,
    /// 1 = keyframe, 0 = delta
    pub frame_type: u8,
    /// [`PKT_DATA`] or [`PKT_FEC`]
    pub packet_type: u8,
    pub fec_group_size: u8,
}

impl PacketHeader {
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.encode_time_us.to_le_bytes());
        out.extend_from_slice(&self.frame_id.to_le_bytes());
        out.extend_from_slice(&self.total_size.to_le_bytes());
        out.extend_from_slice(&self.chunk_index.to_le_bytes());
        out.extend_from_slice(&self.total_chunks.to_le_bytes());
        out.extend_from_slice(&self.chunk_bytes.to_le_bytes());
        out.extend_from_slice(&self.data_chunk_size.to_le_bytes());
        out.push(self.frame_type);
        out.push(self.packet_type);
        out.push(self.fec_group_size);
    }

    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < PACKET_HEADER_SIZE {
            return None;
        }
        Some(Self {
            timestamp: read_i64(data, 0),
            encode_time_us: read_u32(data, 8),
            frame_id: read_u32(data, 12),
            total_size: read_u32(data, 16),
            chunk_index: read_u16(data, 20),
            total_chunks: read_u16(data, 22),
            chunk_bytes: read_u16(data, 24),
            data_chunk_size: read_u16(data, 26),
            frame_type: data[28],
            packet_type: data[29],
            fec_group_size: data[30],
        })
    }
}

/// Header preceding an Opus payload on the audio channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioPacketHeader {
    pub timestamp: i64,
    pub samples: u16,
    pub data_len: u16,
}

impl AudioPacketHeader {
    /// Build a complete audio packet: header plus Opus bytes.
    pub fn packetize(&self, opus: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MEDIA_HEADER_SIZE + opus.len());
        buf.extend_from_slice(&MSG_AUDIO_DATA.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.samples.to_le_bytes());
        buf.extend_from_slice(&self.data_len.to_le_bytes());
        buf.extend_from_slice(opus);
        buf
    }
}

/// A validated inbound mic packet: header fields plus the Opus payload
/// range. `None` for short packets, wrong magic or a bad declared length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MicPacketHeader {
    pub timestamp: i64,
    pub samples: u16,
    pub data_len: u16,
}

impl MicPacketHeader {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < MEDIA_HEADER_SIZE || read_magic(data)? != MSG_MIC_DATA {
            return None;
        }
        let header = Self {
            timestamp: read_i64(data, 4),
            samples: read_u16(data, 12),
            data_len: read_u16(data, 14),
        };
        if header.data_len as usize > data.len() - MEDIA_HEADER_SIZE {
            return None;
        }
        Some(header)
    }

    /// The Opus payload described by this header.
    pub fn payload<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[MEDIA_HEADER_SIZE..MEDIA_HEADER_SIZE + self.data_len as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_header_roundtrip() {
        let h = PacketHeader {
            timestamp: 1_700_000_000_000_000,
            encode_time_us: 1234,
            frame_id: 42,
            total_size: 6000,
            chunk_index: 3,
            total_chunks: 5,
            chunk_bytes: 1369,
            data_chunk_size: 1369,
            frame_type: 1,
            packet_type: PKT_DATA,
            fec_group_size: 4,
        };
        let mut buf = Vec::new();
        h.write_to(&mut buf);
        assert_eq!(buf.len(), PACKET_HEADER_SIZE);
        assert_eq!(PacketHeader::parse(&buf), Some(h));
    }

    #[test]
    fn test_packet_header_too_short() {
        assert_eq!(PacketHeader::parse(&[0u8; PACKET_HEADER_SIZE - 1]), None);
    }

    #[test]
    fn test_audio_packetize_layout() {
        let pkt = AudioPacketHeader {
            timestamp: 99,
            samples: 480,
            data_len: 3,
        }
        .packetize(&[0xAA, 0xBB, 0xCC]);
        assert_eq!(pkt.len(), MEDIA_HEADER_SIZE + 3);
        assert_eq!(read_magic(&pkt), Some(MSG_AUDIO_DATA));
        assert_eq!(read_i64(&pkt, 4), 99);
        assert_eq!(read_u16(&pkt, 12), 480);
        assert_eq!(read_u16(&pkt, 14), 3);
        assert_eq!(&pkt[16..], &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_mic_header_validation() {
        let mut pkt = MSG_MIC_DATA.to_le_bytes().to_vec();
        pkt.extend_from_slice(&77i64.to_le_bytes());
        pkt.extend_from_slice(&480u16.to_le_bytes());
        pkt.extend_from_slice(&4u16.to_le_bytes());
        pkt.extend_from_slice(&[1, 2, 3, 4]);

        let h = MicPacketHeader::parse(&pkt).unwrap();
        assert_eq!(h.timestamp, 77);
        assert_eq!(h.samples, 480);
        assert_eq!(h.payload(&pkt), &[1, 2, 3, 4]);

        // Wrong magic
        let mut bad = pkt.clone();
        bad[0] ^= 0xFF;
        assert_eq!(MicPacketHeader::parse(&bad), None);

        // Declared length exceeds the payload
        let mut bad = pkt.clone();
        bad[14] = 5;
        assert_eq!(MicPacketHeader::parse(&bad), None);

        // Truncated header
        assert_eq!(MicPacketHeader::parse(&pkt[..15]), None);
    }
}
