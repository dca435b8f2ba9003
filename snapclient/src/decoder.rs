use crate::error::CodecInitError;
use crate::stream_buffer::BufferReader;
use hound::{SampleFormat, WavReader, WavSpec};
use log::{debug, info, warn};
use std::io::Read;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSourceStream, ReadOnlySource};
use symphonia::default::codecs::FlacDecoder;
use symphonia::default::formats::FlacReader;

/// Stream of interleaved samples in [-1.0, 1.0]
pub type SampleStream = Box<dyn Iterator<Item = f32> + Send>;

/// Format of the samples produced by a decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl From<WavSpec> for OutputFormat {
    fn from(spec: WavSpec) -> Self {
        Self {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            bits_per_sample: spec.bits_per_sample,
        }
    }
}

/// Opens a streaming decoder over the buffered codec header and audio bytes
pub trait DecoderFactory: Send {
    fn open(
        &self,
        codec: &str,
        source: BufferReader,
    ) -> Result<(SampleStream, OutputFormat), CodecInitError>;
}

/// Decoders available without extra native libraries: `pcm` and `flac`
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardDecoders;

impl DecoderFactory for StandardDecoders {
    fn open(
        &self,
        codec: &str,
        source: BufferReader,
    ) -> Result<(SampleStream, OutputFormat), CodecInitError> {
        match codec {
            "pcm" => open_pcm(source),
            "flac" => open_flac(source),
            other => Err(CodecInitError::UnsupportedCodec(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Int16,
    Int24,
    Int32,
    Float32,
}

impl Encoding {
    fn width(self) -> usize {
        match self {
            Encoding::Int16 => 2,
            Encoding::Int24 => 3,
            Encoding::Int32 | Encoding::Float32 => 4,
        }
    }
}

/// Parse the RIFF header from `source` and stream the samples that follow.
///
/// The data chunk length is ignored: a live stream announces 0 and keeps going.
pub fn open_pcm<R>(source: R) -> Result<(SampleStream, OutputFormat), CodecInitError>
where
    R: Read + Send + 'static,
{
    let rejected = |reason: String| CodecInitError::Rejected {
        codec: "pcm".to_string(),
        reason,
    };

    let reader = WavReader::new(source).map_err(|e| rejected(e.to_string()))?;
    let spec = reader.spec();

    let encoding = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => Encoding::Int16,
        (SampleFormat::Int, 24) => Encoding::Int24,
        (SampleFormat::Int, 32) => Encoding::Int32,
        (SampleFormat::Float, 32) => Encoding::Float32,
        (format, bits) => {
            return Err(rejected(format!(
                "{} bit {:?} samples are not supported",
                bits, format
            )))
        }
    };
    if spec.channels == 0 || spec.sample_rate == 0 {
        return Err(rejected(format!(
            "invalid format {}Hz {}ch",
            spec.sample_rate, spec.channels
        )));
    }

    info!(
        "🎵 PCM stream: {}Hz, {} channels, {} bits",
        spec.sample_rate, spec.channels, spec.bits_per_sample
    );

    let samples = PcmSamples {
        reader: reader.into_inner(),
        encoding,
        scratch: [0u8; 4],
    };
    Ok((Box::new(samples), OutputFormat::from(spec)))
}

struct PcmSamples<R> {
    reader: R,
    encoding: Encoding,
    scratch: [u8; 4],
}

impl<R: Read> Iterator for PcmSamples<R> {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        let width = self.encoding.width();
        self.reader.read_exact(&mut self.scratch[..width]).ok()?;
        let b = self.scratch;

        let sample = match self.encoding {
            Encoding::Int16 => i16::from_le_bytes([b[0], b[1]]) as f32 / 32_768.0,
            Encoding::Int24 => (i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8) as f32 / 8_388_608.0,
            Encoding::Int32 => i32::from_le_bytes(b) as f32 / 2_147_483_648.0,
            Encoding::Float32 => f32::from_le_bytes(b),
        };
        Some(sample)
    }
}

/// Read the FLAC stream header from `source` and decode frames as they
/// arrive.
///
/// Frames are only delimited by the next frame's sync code, so the newest
/// frame is held back until more data or the end of stream shows up.
pub fn open_flac<R>(source: R) -> Result<(SampleStream, OutputFormat), CodecInitError>
where
    R: Read + Send + Sync + 'static,
{
    let rejected = |reason: String| CodecInitError::Rejected {
        codec: "flac".to_string(),
        reason,
    };

    let stream = MediaSourceStream::new(
        Box::new(ReadOnlySource::new(source)),
        Default::default(),
    );
    let reader = FlacReader::try_new(stream, &FormatOptions::default())
        .map_err(|e| rejected(e.to_string()))?;

    let (track_id, params) = {
        let track = reader
            .default_track()
            .ok_or_else(|| rejected("stream has no audio track".to_string()))?;
        (track.id, track.codec_params.clone())
    };

    let sample_rate = params
        .sample_rate
        .ok_or_else(|| rejected("sample rate missing from stream info".to_string()))?;
    let channels = params
        .channels
        .map(|channels| channels.count() as u16)
        .ok_or_else(|| rejected("channel layout missing from stream info".to_string()))?;
    let format = OutputFormat {
        sample_rate,
        channels,
        bits_per_sample: params.bits_per_sample.unwrap_or(16) as u16,
    };

    let decoder = FlacDecoder::try_new(&params, &DecoderOptions::default())
        .map_err(|e| rejected(e.to_string()))?;

    info!(
        "🎵 FLAC stream: {}Hz, {} channels, {} bits",
        format.sample_rate, format.channels, format.bits_per_sample
    );

    let samples = FlacSamples {
        reader,
        decoder,
        track_id,
        pending: Vec::new(),
        position: 0,
    };
    Ok((Box::new(samples), format))
}

struct FlacSamples {
    reader: FlacReader,
    decoder: FlacDecoder,
    track_id: u32,
    /// Interleaved samples of the last decoded frame
    pending: Vec<f32>,
    position: usize,
}

impl FlacSamples {
    /// Decode the next frame into `pending`. False at end of stream.
    fn refill(&mut self) -> bool {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(_)) => return false,
                Err(e) => {
                    warn!("FLAC stream ended: {}", e);
                    return false;
                }
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let mut samples =
                        SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
                    samples.copy_interleaved_ref(decoded);
                    self.pending.clear();
                    self.pending.extend_from_slice(samples.samples());
                    self.position = 0;
                    if !self.pending.is_empty() {
                        return true;
                    }
                }
                Err(SymphoniaError::DecodeError(reason)) => {
                    debug!("Skipping undecodable FLAC frame: {}", reason);
                }
                Err(e) => {
                    warn!("FLAC decoder failed: {}", e);
                    return false;
                }
            }
        }
    }
}

impl Iterator for FlacSamples {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.position >= self.pending.len() && !self.refill() {
            return None;
        }
        let sample = self.pending[self.position];
        self.position += 1;
        Some(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream_buffer::StreamBuffer;
    use hound::WavWriter;
    use std::io::Cursor;
    use std::sync::Arc;

    fn wav_bytes(spec: WavSpec, samples: &[i32]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            for &sample in samples {
                writer.write_sample(sample).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn spec(bits: u16) -> WavSpec {
        WavSpec {
            channels: 2,
            sample_rate: 48_000,
            bits_per_sample: bits,
            sample_format: SampleFormat::Int,
        }
    }

    #[test]
    fn test_pcm_decoder_reads_format_and_samples() {
        let buffer = Arc::new(StreamBuffer::new(4096));
        buffer.write(&wav_bytes(spec(16), &[i16::MAX as i32, 0, -16_384, 16_384]));
        buffer.close();

        let (samples, format) = StandardDecoders.open("pcm", buffer.reader()).unwrap();
        assert_eq!(
            format,
            OutputFormat {
                sample_rate: 48_000,
                channels: 2,
                bits_per_sample: 16
            }
        );

        let samples: Vec<f32> = samples.collect();
        assert_eq!(samples.len(), 4);
        assert!((samples[0] - 1.0).abs() < 0.001);
        assert_eq!(samples[1], 0.0);
        assert!((samples[2] + 0.5).abs() < 0.001);
        assert!((samples[3] - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_pcm_ignores_data_length_for_live_streams() {
        // Header announces no samples, audio keeps arriving afterwards
        let buffer = Arc::new(StreamBuffer::new(4096));
        buffer.write(&wav_bytes(spec(16), &[]));
        for value in [1000i16, -1000, 2000, -2000] {
            buffer.write(&value.to_le_bytes());
        }
        buffer.close();

        let (samples, _) = StandardDecoders.open("pcm", buffer.reader()).unwrap();
        assert_eq!(samples.count(), 4);
    }

    #[test]
    fn test_pcm_24_bit_samples() {
        let (samples, format) = open_pcm(Cursor::new(wav_bytes(spec(24), &[-8_388_608, 4_194_304])))
            .unwrap();
        assert_eq!(format.bits_per_sample, 24);

        let samples: Vec<f32> = samples.collect();
        assert!((samples[0] + 1.0).abs() < 0.0001);
        assert!((samples[1] - 0.5).abs() < 0.0001);
    }

    #[test]
    fn test_garbage_header_is_rejected() {
        let result = open_pcm(Cursor::new(vec![0x42u8; 128]));
        assert!(matches!(result, Err(CodecInitError::Rejected { .. })));
    }

    fn crc8(bytes: &[u8]) -> u8 {
        bytes.iter().fold(0u8, |crc, &byte| {
            (0..8).fold(crc ^ byte, |crc, _| {
                if crc & 0x80 != 0 {
                    (crc << 1) ^ 0x07
                } else {
                    crc << 1
                }
            })
        })
    }

    fn crc16(bytes: &[u8]) -> u16 {
        bytes.iter().fold(0u16, |crc, &byte| {
            (0..8).fold(crc ^ (u16::from(byte) << 8), |crc, _| {
                if crc & 0x8000 != 0 {
                    (crc << 1) ^ 0x8005
                } else {
                    crc << 1
                }
            })
        })
    }

    /// "fLaC" marker and a STREAMINFO block for 48kHz mono 16 bit with
    /// 256 sample blocks
    fn flac_header() -> Vec<u8> {
        let mut bytes = b"fLaC".to_vec();
        // Last metadata block, type STREAMINFO, 34 bytes
        bytes.extend_from_slice(&[0x80, 0x00, 0x00, 34]);
        bytes.extend_from_slice(&256u16.to_be_bytes());
        bytes.extend_from_slice(&256u16.to_be_bytes());
        // Frame sizes unknown
        bytes.extend_from_slice(&[0; 6]);
        let packed: u64 = (48_000u64 << 44) | (15u64 << 36);
        bytes.extend_from_slice(&packed.to_be_bytes());
        // No MD5
        bytes.extend_from_slice(&[0; 16]);
        bytes
    }

    /// One frame of 256 identical samples stored as a CONSTANT subframe
    fn flac_frame(number: u8, value: i16) -> Vec<u8> {
        // Fixed blocking, 256 samples, 48kHz, mono, 16 bit
        let mut frame = vec![0xFF, 0xF8, 0x8A, 0x08, number];
        frame.push(crc8(&frame));
        frame.push(0x00);
        frame.extend_from_slice(&value.to_be_bytes());
        let crc = crc16(&frame);
        frame.extend_from_slice(&crc.to_be_bytes());
        frame
    }

    #[test]
    fn test_flac_decoder_reads_stream_info_and_frames() {
        let buffer = Arc::new(StreamBuffer::new(4096));
        buffer.write(&flac_header());
        for number in 0..8 {
            buffer.write(&flac_frame(number, 8_192));
        }
        buffer.close();

        let (samples, format) = StandardDecoders.open("flac", buffer.reader()).unwrap();
        assert_eq!(
            format,
            OutputFormat {
                sample_rate: 48_000,
                channels: 1,
                bits_per_sample: 16
            }
        );

        let samples: Vec<f32> = samples.collect();
        assert!(samples.len() >= 7 * 256, "only {} samples", samples.len());
        assert_eq!(samples.len() % 256, 0);
        assert!(samples.iter().all(|s| (s - 0.25).abs() < 1e-4));
    }

    #[test]
    fn test_flac_without_marker_is_rejected() {
        let buffer = Arc::new(StreamBuffer::new(4096));
        buffer.write(&[0x42u8; 512]);
        buffer.close();

        assert!(matches!(
            StandardDecoders.open("flac", buffer.reader()),
            Err(CodecInitError::Rejected { ref codec, .. }) if codec == "flac"
        ));
    }

    #[test]
    fn test_truncated_flac_header_fails_without_waiting() {
        // Stream info cut short while the buffer stays open
        let buffer = Arc::new(StreamBuffer::new(4096));
        buffer.write(&flac_header()[..20]);

        let result = {
            let _opening = buffer.non_blocking_reads();
            StandardDecoders.open("flac", buffer.reader())
        };
        assert!(matches!(result, Err(CodecInitError::Rejected { .. })));
        assert!(!buffer.is_closed());
    }

    #[test]
    fn test_unknown_codec_is_unsupported() {
        let buffer = Arc::new(StreamBuffer::new(16));
        for codec in ["aac", "opus", "ogg"] {
            match StandardDecoders.open(codec, buffer.reader()) {
                Err(CodecInitError::UnsupportedCodec(name)) => assert_eq!(name, codec),
                Err(other) => panic!("unexpected error: {other}"),
                Ok(_) => panic!("{codec} should be unsupported"),
            }
        }
    }
}
