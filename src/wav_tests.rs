//! Unit tests for the wav source

#[cfg(test)]
mod tests {
    use crate::error::AudioError;
    use crate::sources::wav::{upconvert_u8, WavSource};
    use crate::sources::AudioSource;
    use byteorder::{LittleEndian, WriteBytesExt};
    use std::io::Write;

    /// Builds a canonical RIFF/WAVE file around `data`
    fn wav_bytes(format_tag: u16, channels: u16, rate: u32, bits: u16, data: &[u8]) -> Vec<u8> {
        let block_align = channels * bits / 8;
        let mut out = Vec::new();

        out.write_all(b"RIFF").unwrap();
        out.write_u32::<LittleEndian>(36 + data.len() as u32).unwrap();
        out.write_all(b"WAVE").unwrap();

        out.write_all(b"fmt ").unwrap();
        out.write_u32::<LittleEndian>(16).unwrap();
        out.write_u16::<LittleEndian>(format_tag).unwrap();
        out.write_u16::<LittleEndian>(channels).unwrap();
        out.write_u32::<LittleEndian>(rate).unwrap();
        out.write_u32::<LittleEndian>(rate * block_align as u32).unwrap();
        out.write_u16::<LittleEndian>(block_align).unwrap();
        out.write_u16::<LittleEndian>(bits).unwrap();

        out.write_all(b"data").unwrap();
        out.write_u32::<LittleEndian>(data.len() as u32).unwrap();
        out.write_all(data).unwrap();
        out
    }

    fn pcm16(samples: &[i16]) -> Vec<u8> {
        let mut out = Vec::new();
        for s in samples {
            out.write_i16::<LittleEndian>(*s).unwrap();
        }
        out
    }

    #[test]
    fn test_upconvert_u8() {
        assert_eq!(upconvert_u8(0), -32768);
        assert_eq!(upconvert_u8(128), 0);
        assert_eq!(upconvert_u8(255), 32512);
    }

    #[test]
    fn test_parse_8bit_mono() {
        let bytes = wav_bytes(1, 1, 8000, 8, &[0, 128, 255]);
        let source = WavSource::from_reader(&bytes[..]).unwrap();

        assert_eq!(source.channels(), 1);
        assert_eq!(source.sample_rate(), 8000);
        assert_eq!(source.bits_per_sample(), 8);
        assert_eq!(source.total_samples(), Some(3));
        assert_eq!(source.samples(), &[-32768, 0, 32512]);
    }

    #[test]
    fn test_parse_16bit_stereo() {
        let bytes = wav_bytes(1, 2, 44100, 16, &pcm16(&[1, -1, 1000, -1000]));
        let source = WavSource::from_reader(&bytes[..]).unwrap();

        assert_eq!(source.channels(), 2);
        assert_eq!(source.total_samples(), Some(4));
        assert_eq!(source.total_frames(), 2);
        assert_eq!(source.samples(), &[1, -1, 1000, -1000]);
    }

    #[test]
    fn test_rejects_unsupported_channels() {
        let bytes = wav_bytes(1, 3, 44100, 16, &pcm16(&[0; 6]));
        let err = WavSource::from_reader(&bytes[..]).unwrap_err();

        assert!(matches!(
            err,
            AudioError::UnsupportedFormat {
                channels: 3,
                bits_per_sample: 16,
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_24bit() {
        let bytes = wav_bytes(1, 2, 44100, 24, &[0; 12]);
        let err = WavSource::from_reader(&bytes[..]).unwrap_err();

        assert!(matches!(
            err,
            AudioError::UnsupportedFormat {
                bits_per_sample: 24,
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_float_format_tag() {
        let bytes = wav_bytes(3, 1, 44100, 16, &pcm16(&[0; 2]));
        let err = WavSource::from_reader(&bytes[..]).unwrap_err();

        assert!(matches!(
            err,
            AudioError::UnsupportedFormat { format_tag: 3, .. }
        ));
    }

    #[test]
    fn test_rejects_non_riff() {
        let mut bytes = wav_bytes(1, 1, 44100, 16, &pcm16(&[0; 2]));
        bytes[..4].copy_from_slice(b"RIFX");

        let err = WavSource::from_reader(&bytes[..]).unwrap_err();
        assert!(matches!(err, AudioError::MalformedHeader(_)));
    }

    #[test]
    fn test_missing_data_chunk() {
        let bytes = wav_bytes(1, 1, 44100, 16, &[]);
        // Cut off the data chunk header
        let bytes = &bytes[..bytes.len() - 8];

        let err = WavSource::from_reader(bytes).unwrap_err();
        assert!(matches!(err, AudioError::MalformedHeader(_)));
    }

    #[test]
    fn test_skips_unknown_chunks() {
        let plain = wav_bytes(1, 1, 22050, 16, &pcm16(&[5, 6, 7]));

        // Insert an odd-sized LIST chunk (plus pad byte) between fmt and data
        let mut bytes = plain[..36].to_vec();
        bytes.extend_from_slice(b"LIST");
        bytes.write_u32::<LittleEndian>(3).unwrap();
        bytes.extend_from_slice(&[1, 2, 3, 0]);
        bytes.extend_from_slice(&plain[36..]);

        let source = WavSource::from_reader(&bytes[..]).unwrap();
        assert_eq!(source.samples(), &[5, 6, 7]);
    }

    #[test]
    fn test_truncated_payload_keeps_present_samples() {
        let mut bytes = wav_bytes(1, 1, 44100, 16, &pcm16(&[1, 2, 3, 4]));
        bytes.truncate(bytes.len() - 4);

        let source = WavSource::from_reader(&bytes[..]).unwrap();
        assert_eq!(source.samples(), &[1, 2]);
    }

    #[test]
    fn test_huge_declared_size_keeps_present_samples() {
        let mut bytes = wav_bytes(1, 1, 44100, 16, &pcm16(&[1, 2, 3]));
        // Data chunk claims nearly 4 GiB
        bytes[40..44].copy_from_slice(&0xffff_fff0u32.to_le_bytes());

        let source = WavSource::from_reader(&bytes[..]).unwrap();
        assert_eq!(source.samples(), &[1, 2, 3]);
    }

    #[test]
    fn test_fill_boundaries() {
        let source = WavSource::from_samples(1, 44100, (0..10).collect()).unwrap();
        let mut dest = [0; 4];

        let fill = source.fill_samples(&mut dest, 0);
        assert_eq!((fill.written, fill.is_final), (4, false));
        assert_eq!(dest, [0, 1, 2, 3]);

        // Short copy at the end is final
        let fill = source.fill_samples(&mut dest, 8);
        assert_eq!((fill.written, fill.is_final), (2, true));
        assert_eq!(&dest[..2], &[8, 9]);

        // An exact fill is not final, the next one is empty and final
        let fill = source.fill_samples(&mut dest, 6);
        assert_eq!((fill.written, fill.is_final), (4, false));
        let fill = source.fill_samples(&mut dest, 10);
        assert_eq!((fill.written, fill.is_final), (0, true));
    }

    #[test]
    fn test_open_missing_file() {
        let err = WavSource::open("/nonexistent/file.wav").unwrap_err();
        assert!(matches!(err, AudioError::Io(_)));
    }
}
