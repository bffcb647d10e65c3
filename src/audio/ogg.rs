//! # Ogg Opus File Source
//!
//! Reads Opus packets out of an Ogg container (`.opus` files as produced by
//! `opusenc`) and exposes them as a [`PacketSource`].
//!
//! ## How It Works:
//! - symphonia's Ogg format reader handles pages, lacing, packets that span
//!   pages, and the Opus mapping (it consumes `OpusHead` and `OpusTags`)
//! - Packets are pulled one at a time with `FormatReader::next_packet()` and
//!   passed on untouched; nothing is decoded
//!
//! ## Stream Parameters:
//! The sample rate comes from the `OpusHead` identification header, which
//! symphonia hands back as the track's `extra_data`. Frames per packet and
//! packet duration come from the TOC byte of the first audio packet.

use crate::audio::source::{PacketSource, StreamParameters};
use crate::error::{StreamError, StreamResult};
use byteorder::{LittleEndian, ReadBytesExt};
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;
use symphonia::core::codecs::CODEC_TYPE_OPUS;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream, ReadOnlySource};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

const OPUS_HEAD_MAGIC: &[u8; 8] = b"OpusHead";
const OPUS_HEAD_MIN_LEN: usize = 19;

/// Sample rate announced when the file does not record a usable input rate.
const FALLBACK_SAMPLE_RATE: u16 = 48000;

/// Packet source streaming Opus packets from an Ogg file.
///
/// ## Rust Concepts:
/// - **Box<dyn FormatReader>**: symphonia picks the reader at runtime by
///   probing the input; we only ever get the Ogg one because that is the only
///   container feature enabled
/// - **Lazy reading**: packets are read from disk as the session asks for them
pub struct OggOpusSource {
    format: Box<dyn FormatReader>,
    track_id: u32,
    parameters: StreamParameters,
    /// First audio packet, read ahead to derive the stream parameters
    first_packet: Option<Vec<u8>>,
}

impl OggOpusSource {
    /// Open an `.opus` file and read its headers.
    pub fn open(path: impl AsRef<Path>) -> StreamResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| StreamError::Source(format!("cannot open {}: {}", path.display(), e)))?;

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(extension);
        }
        Self::from_media(Box::new(file), &hint)
    }

    /// Read the Opus headers and the first audio packet from any reader.
    ///
    /// The reader is consumed front to back without seeking.
    pub fn from_reader<R: Read + Send + Sync + 'static>(reader: R) -> StreamResult<Self> {
        Self::from_media(Box::new(ReadOnlySource::new(reader)), &Hint::new())
    }

    fn from_media(media: Box<dyn MediaSource>, hint: &Hint) -> StreamResult<Self> {
        let stream = MediaSourceStream::new(media, Default::default());
        let detected = symphonia::default::get_probe()
            .format(hint, stream, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| StreamError::Source(format!("not an Ogg Opus stream: {}", e)))?;
        let mut format = detected.format;

        let track = format
            .tracks()
            .iter()
            .find(|track| track.codec_params.codec == CODEC_TYPE_OPUS)
            .ok_or_else(|| StreamError::Source("file contains no Opus track".to_string()))?;
        let track_id = track.id;
        let sample_rate = match track.codec_params.extra_data.as_deref() {
            Some(head) => parse_opus_head(head)?,
            None => FALLBACK_SAMPLE_RATE,
        };

        let first_packet = next_track_packet(format.as_mut(), track_id)?
            .ok_or_else(|| StreamError::Source("file contains no audio packets".to_string()))?;
        let (frames_per_packet, packet_duration_ms) = packet_timing(&first_packet)?;

        let parameters = StreamParameters::new(sample_rate, frames_per_packet, packet_duration_ms);
        debug!(
            sample_rate = parameters.sample_rate,
            frames_per_packet = parameters.frames_per_packet,
            packet_duration_ms = parameters.packet_duration_ms,
            "Opened Ogg Opus stream"
        );

        Ok(Self {
            format,
            track_id,
            parameters,
            first_packet: Some(first_packet),
        })
    }
}

impl PacketSource for OggOpusSource {
    fn parameters(&self) -> StreamParameters {
        self.parameters
    }

    fn next_packet(&mut self) -> StreamResult<Option<Vec<u8>>> {
        if let Some(packet) = self.first_packet.take() {
            return Ok(Some(packet));
        }
        next_track_packet(self.format.as_mut(), self.track_id)
    }
}

/// Next raw packet of `track_id`, or `None` at the end of the file.
fn next_track_packet(format: &mut dyn FormatReader, track_id: u32) -> StreamResult<Option<Vec<u8>>> {
    loop {
        match format.next_packet() {
            Ok(packet) if packet.track_id() == track_id => return Ok(Some(packet.data.into_vec())),
            Ok(_) => continue,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
    }
}

/// Parse the `OpusHead` identification header and return the sample rate to announce.
fn parse_opus_head(packet: &[u8]) -> StreamResult<u16> {
    if packet.len() < OPUS_HEAD_MIN_LEN || !packet.starts_with(OPUS_HEAD_MAGIC) {
        return Err(StreamError::Source("track header is not an OpusHead".to_string()));
    }

    let mut fields = Cursor::new(&packet[8..]);
    let _version = fields.read_u8()?;
    let channels = fields.read_u8()?;
    let pre_skip = fields.read_u16::<LittleEndian>()?;
    let input_sample_rate = fields.read_u32::<LittleEndian>()?;
    debug!(channels, pre_skip, input_sample_rate, "Parsed OpusHead");

    Ok(match u16::try_from(input_sample_rate) {
        Ok(rate) if rate > 0 => rate,
        _ => FALLBACK_SAMPLE_RATE,
    })
}

/// Frame duration for a TOC configuration number, in tenths of a millisecond.
fn frame_duration_tenths_ms(config: u8) -> u32 {
    match config {
        // SILK-only
        0..=11 => [100, 200, 400, 600][(config % 4) as usize],
        // Hybrid
        12..=15 => [100, 200][(config % 2) as usize],
        // CELT-only
        _ => [25, 50, 100, 200][(config % 4) as usize],
    }
}

/// Derive (frames per packet, packet duration in ms) from an Opus packet's TOC byte.
fn packet_timing(packet: &[u8]) -> StreamResult<(u8, u8)> {
    let toc = *packet
        .first()
        .ok_or_else(|| StreamError::Source("empty Opus packet".to_string()))?;

    let frames = match toc & 0x03 {
        0 => 1,
        1 | 2 => 2,
        _ => {
            let count = packet
                .get(1)
                .map(|byte| byte & 0x3f)
                .ok_or_else(|| StreamError::Source("Opus packet is missing its frame count".to_string()))?;
            if count == 0 {
                return Err(StreamError::Source("Opus packet declares zero frames".to_string()));
            }
            count
        }
    };

    let total_tenths = frame_duration_tenths_ms(toc >> 3) * u32::from(frames);
    if total_tenths % 10 != 0 {
        return Err(StreamError::Source(format!(
            "packet duration of {}.{} ms is not a whole number of milliseconds",
            total_tenths / 10,
            total_tenths % 10
        )));
    }

    let duration_ms = u8::try_from(total_tenths / 10)
        .map_err(|_| StreamError::Source(format!("packet duration {} ms is too long", total_tenths / 10)))?;

    Ok((frames, duration_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRE_SKIP: u16 = 312;
    /// 20 ms at the 48 kHz granule rate Opus always uses
    const SAMPLES_20MS: u64 = 960;

    /// Ogg page checksum: CRC-32, polynomial 0x04c11db7, no reflection, zero init.
    fn ogg_crc(data: &[u8]) -> u32 {
        let mut crc = 0u32;
        for &byte in data {
            crc ^= u32::from(byte) << 24;
            for _ in 0..8 {
                crc = if crc & 0x8000_0000 != 0 {
                    (crc << 1) ^ 0x04c1_1db7
                } else {
                    crc << 1
                };
            }
        }
        crc
    }

    /// Build one page from an explicit segment table.
    fn raw_page(header_type: u8, granule: u64, sequence: u32, lacing: &[u8], body: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"OggS");
        bytes.push(0);
        bytes.push(header_type);
        bytes.extend_from_slice(&granule.to_le_bytes());
        bytes.extend_from_slice(&7u32.to_le_bytes());
        bytes.extend_from_slice(&sequence.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.push(lacing.len() as u8);
        bytes.extend_from_slice(lacing);
        bytes.extend_from_slice(body);

        let crc = ogg_crc(&bytes);
        bytes[22..26].copy_from_slice(&crc.to_le_bytes());
        bytes
    }

    /// Build one page holding `packets`, each terminated in this page.
    fn page(header_type: u8, granule: u64, sequence: u32, packets: &[&[u8]]) -> Vec<u8> {
        let mut lacing = Vec::new();
        let mut body = Vec::new();
        for packet in packets {
            let mut remaining = packet.len();
            loop {
                let len = remaining.min(255);
                lacing.push(len as u8);
                remaining -= len;
                if len < 255 {
                    break;
                }
            }
            body.extend_from_slice(packet);
        }
        raw_page(header_type, granule, sequence, &lacing, &body)
    }

    fn opus_head(sample_rate: u32) -> Vec<u8> {
        let mut head = b"OpusHead".to_vec();
        head.push(1); // version
        head.push(1); // channels
        head.extend_from_slice(&PRE_SKIP.to_le_bytes());
        head.extend_from_slice(&sample_rate.to_le_bytes());
        head.extend_from_slice(&0i16.to_le_bytes());
        head.push(0); // mapping family
        head
    }

    /// Vendor string length 0, comment count 0
    const OPUS_TAGS: &[u8] = b"OpusTags\x00\x00\x00\x00\x00\x00\x00\x00";

    fn header_pages(sample_rate: u32) -> Vec<u8> {
        let mut file = page(0x02, 0, 0, &[&opus_head(sample_rate)]);
        file.extend(page(0x00, 0, 1, &[OPUS_TAGS]));
        file
    }

    /// Header pages plus one final page of 20 ms audio packets.
    fn opus_file(sample_rate: u32, audio: &[&[u8]]) -> Vec<u8> {
        let mut file = header_pages(sample_rate);
        let granule = u64::from(PRE_SKIP) + SAMPLES_20MS * audio.len() as u64;
        file.extend(page(0x04, granule, 2, audio));
        file
    }

    #[test]
    fn test_reads_parameters_and_packets() {
        // config 19 = CELT 20 ms, code 0 = one frame
        let first = [0x98u8, 1, 2, 3];
        let second = [0x98u8, 4, 5];
        let bytes = opus_file(16000, &[&first, &second]);

        let mut source = OggOpusSource::from_reader(Cursor::new(bytes)).unwrap();
        assert_eq!(source.parameters(), StreamParameters::new(16000, 1, 20));
        assert_eq!(source.next_packet().unwrap(), Some(first.to_vec()));
        assert_eq!(source.next_packet().unwrap(), Some(second.to_vec()));
        assert_eq!(source.next_packet().unwrap(), None);
    }

    #[test]
    fn test_packet_spanning_pages() {
        let mut big = vec![0x98u8];
        big.extend(std::iter::repeat(7u8).take(299));

        let mut bytes = header_pages(48000);
        // First page carries a full 255 byte segment and completes no packet.
        bytes.extend(raw_page(0x00, u64::MAX, 2, &[255], &big[..255]));
        // Continuation page finishes it.
        let granule = u64::from(PRE_SKIP) + SAMPLES_20MS;
        bytes.extend(page(0x01 | 0x04, granule, 3, &[&big[255..]]));

        let mut source = OggOpusSource::from_reader(Cursor::new(bytes)).unwrap();
        assert_eq!(source.parameters().sample_rate, 48000);
        assert_eq!(source.next_packet().unwrap(), Some(big));
        assert_eq!(source.next_packet().unwrap(), None);
    }

    #[test]
    fn test_packet_timing_from_toc() {
        // SILK 60 ms, one frame
        assert_eq!(packet_timing(&[3 << 3]).unwrap(), (1, 60));
        // SILK 20 ms, code 1 = two frames
        assert_eq!(packet_timing(&[(1 << 3) | 1]).unwrap(), (2, 40));
        // SILK 20 ms, code 3 with an explicit count of three
        assert_eq!(packet_timing(&[(1 << 3) | 3, 3]).unwrap(), (3, 60));
        // Hybrid 10 ms
        assert_eq!(packet_timing(&[12 << 3]).unwrap(), (1, 10));
        // CELT 2.5 ms is not a whole millisecond
        assert!(packet_timing(&[16 << 3]).is_err());
        // CELT 2.5 ms times four frames is
        assert_eq!(packet_timing(&[(16 << 3) | 3, 4]).unwrap(), (4, 10));
        assert!(packet_timing(&[]).is_err());
    }

    #[test]
    fn test_unusable_sample_rate_falls_back() {
        assert_eq!(parse_opus_head(&opus_head(0)).unwrap(), FALLBACK_SAMPLE_RATE);
        assert_eq!(parse_opus_head(&opus_head(96000)).unwrap(), FALLBACK_SAMPLE_RATE);
        assert_eq!(parse_opus_head(&opus_head(8000)).unwrap(), 8000);
        assert!(parse_opus_head(b"OpusTags").is_err());

        let bytes = opus_file(0, &[&[0x98, 0]]);
        let source = OggOpusSource::from_reader(Cursor::new(bytes)).unwrap();
        assert_eq!(source.parameters().sample_rate, FALLBACK_SAMPLE_RATE);
    }

    #[test]
    fn test_rejects_non_opus_input() {
        assert!(OggOpusSource::from_reader(Cursor::new(b"RIFF....WAVEfmt ".to_vec())).is_err());
        assert!(OggOpusSource::from_reader(Cursor::new(Vec::new())).is_err());

        let err = OggOpusSource::from_reader(Cursor::new(header_pages(16000)))
            .err()
            .unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::Source);
    }

    #[test]
    fn test_open_missing_file() {
        let err = OggOpusSource::open("/nonexistent/clip.opus").err().unwrap();
        assert!(err.to_string().contains("cannot open"));
    }
}
