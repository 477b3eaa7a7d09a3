//! Incremental WAV/PCM file writer.
//!
//! Streams PCM bytes to disk as they are drained and patches the two RIFF
//! size fields into the header at finalization:
//!
//! ```text
//! offset  size  field            value
//! 0       4     ChunkID          "RIFF"
//! 4       4     ChunkSize        36 + data size   (0 until finalize)
//! 8       4     Format           "WAVE"
//! 12      4     SubChunk1ID      "fmt "
//! 16      4     SubChunk1Size    16
//! 20      2     AudioFormat      1 (PCM)
//! 22      2     NumChannels
//! 24      4     SampleRate
//! 28      4     ByteRate         SampleRate × BlockAlign
//! 32      2     BlockAlign       NumChannels × BitsPerSample/8
//! 34      2     BitsPerSample
//! 36      4     SubChunk2ID      "data"
//! 40      4     SubChunk2Size    data size        (0 until finalize)
//! 44      …     PCM samples
//! ```
//!
//! All multi-byte fields are little-endian. A file abandoned before
//! [`WavWriter::finalize`] keeps the zeroed size fields.

use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{CaptureError, Result};

/// Byte sink the drain loop writes through.
///
/// [`WavWriter`] is the production implementor; tests substitute collecting
/// or deliberately slow sinks.
pub trait PcmSink: Send + 'static {
    /// Append raw PCM bytes, sequentially.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Patch final sizes and flush. Called exactly once at end of capture;
    /// later calls are no-ops.
    fn finalize(&mut self) -> Result<()>;
}

const HEADER_LEN: usize = 44;
const CHUNK_SIZE_OFFSET: u64 = 4;
const DATA_SIZE_OFFSET: u64 = 40;

/// Streaming WAV writer with deferred size patching.
pub struct WavWriter {
    file: BufWriter<File>,
    data_len: u64,
    finalized: bool,
}

impl WavWriter {
    /// Create `path` (silently overwriting an existing file) and write a
    /// provisional header with zeroed size fields.
    ///
    /// # Errors
    /// `CaptureError::Config` for a zero sample rate, zero channels, or a
    /// bit depth that is not a non-zero multiple of 8;
    /// `CaptureError::Storage` for file-system failures.
    pub fn open(
        path: impl AsRef<Path>,
        sample_rate: u32,
        bits_per_sample: u16,
        channels: u16,
    ) -> Result<Self> {
        if sample_rate == 0 {
            return Err(CaptureError::Config("WAV sample rate must be non-zero".into()));
        }
        if bits_per_sample == 0 || bits_per_sample % 8 != 0 {
            return Err(CaptureError::Config(format!(
                "bits per sample must be a non-zero multiple of 8, got {bits_per_sample}"
            )));
        }
        if channels == 0 {
            return Err(CaptureError::Config("WAV channel count must be non-zero".into()));
        }

        let mut file = BufWriter::new(File::create(path)?);
        file.write_all(&header(sample_rate, bits_per_sample, channels, 0))?;

        Ok(Self {
            file,
            data_len: 0,
            finalized: false,
        })
    }

    /// PCM bytes written so far.
    pub fn data_bytes(&self) -> u64 {
        self.data_len
    }

    /// Append PCM bytes after the header. No seeking; errors surface to the
    /// caller and are not retried.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.file.write_all(bytes)?;
        self.data_len += bytes.len() as u64;
        Ok(())
    }

    /// Patch ChunkSize and SubChunk2Size in place, then flush.
    pub fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        let data = u32::try_from(self.data_len)
            .ok()
            .filter(|&d| d <= u32::MAX - 36)
            .ok_or_else(|| {
                CaptureError::Storage(io::Error::other("PCM data exceeds the RIFF 4 GiB limit"))
            })?;

        self.file.seek(SeekFrom::Start(CHUNK_SIZE_OFFSET))?;
        self.file.write_all(&(36 + data).to_le_bytes())?;
        self.file.seek(SeekFrom::Start(DATA_SIZE_OFFSET))?;
        self.file.write_all(&data.to_le_bytes())?;
        self.file.flush()?;
        self.finalized = true;
        Ok(())
    }
}

impl PcmSink for WavWriter {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        WavWriter::write(self, bytes)
    }

    fn finalize(&mut self) -> Result<()> {
        WavWriter::finalize(self)
    }
}

fn header(sample_rate: u32, bits_per_sample: u16, channels: u16, data_size: u32) -> [u8; HEADER_LEN] {
    let block_align = channels * (bits_per_sample / 8);
    let byte_rate = sample_rate * block_align as u32;

    let mut hdr = [0u8; HEADER_LEN];
    hdr[0..4].copy_from_slice(b"RIFF");
    hdr[4..8].copy_from_slice(&(36 + data_size).to_le_bytes());
    hdr[8..12].copy_from_slice(b"WAVE");
    hdr[12..16].copy_from_slice(b"fmt ");
    hdr[16..20].copy_from_slice(&16u32.to_le_bytes());
    hdr[20..22].copy_from_slice(&1u16.to_le_bytes());
    hdr[22..24].copy_from_slice(&channels.to_le_bytes());
    hdr[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    hdr[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    hdr[32..34].copy_from_slice(&block_align.to_le_bytes());
    hdr[34..36].copy_from_slice(&bits_per_sample.to_le_bytes());
    hdr[36..40].copy_from_slice(b"data");
    hdr[40..44].copy_from_slice(&data_size.to_le_bytes());
    hdr
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u32_at(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    fn u16_at(bytes: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap())
    }

    #[test]
    fn header_layout_matches_riff_reference() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ref.wav");

        let pcm: Vec<u8> = (0..80u8).collect();
        let mut writer = WavWriter::open(&path, 8_000, 8, 1).expect("open");
        writer.write(&pcm).expect("write");
        writer.finalize().expect("finalize");

        let bytes = std::fs::read(&path).expect("read back");
        assert_eq!(bytes.len(), 44 + 80);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(u32_at(&bytes, 4), 116, "ChunkSize = 36 + 80");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(&bytes[12..16], b"fmt ");
        assert_eq!(u32_at(&bytes, 16), 16);
        assert_eq!(u16_at(&bytes, 20), 1, "PCM format tag");
        assert_eq!(u16_at(&bytes, 22), 1, "mono");
        assert_eq!(u32_at(&bytes, 24), 8_000);
        assert_eq!(u32_at(&bytes, 28), 8_000, "ByteRate = 8000 × 1");
        assert_eq!(u16_at(&bytes, 32), 1, "BlockAlign");
        assert_eq!(u16_at(&bytes, 34), 8);
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(u32_at(&bytes, 40), 80, "SubChunk2Size");
        assert_eq!(&bytes[44..], &pcm[..], "payload byte-identical");
    }

    #[test]
    fn hound_accepts_the_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("hound.wav");

        let mut writer = WavWriter::open(&path, 12_000, 8, 1).expect("open");
        writer.write(&[128u8; 300]).expect("write");
        writer.finalize().expect("finalize");

        let reader = hound::WavReader::open(&path).expect("hound open");
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 12_000);
        assert_eq!(spec.bits_per_sample, 8);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_format, hound::SampleFormat::Int);
        assert_eq!(reader.duration(), 300, "300 mono frames");
    }

    #[test]
    fn size_fields_stay_zero_until_finalize() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("unfinalized.wav");

        let mut writer = WavWriter::open(&path, 12_000, 8, 1).expect("open");
        writer.write(&[1u8; 64]).expect("write");
        drop(writer); // flushes buffered bytes, skips the patch

        let bytes = std::fs::read(&path).expect("read back");
        assert_eq!(u32_at(&bytes, 4), 36, "ChunkSize provisional");
        assert_eq!(u32_at(&bytes, 40), 0, "SubChunk2Size provisional");
        assert_eq!(bytes.len(), 44 + 64);
    }

    #[test]
    fn appended_writes_accumulate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("chunks.wav");

        let mut writer = WavWriter::open(&path, 8_000, 8, 1).expect("open");
        writer.write(&[10u8; 40]).expect("first");
        writer.write(&[20u8; 40]).expect("second");
        assert_eq!(writer.data_bytes(), 80);
        writer.finalize().expect("finalize");
        writer.finalize().expect("second finalize is a no-op");

        let bytes = std::fs::read(&path).expect("read back");
        assert_eq!(u32_at(&bytes, 40), 80);
        assert_eq!(&bytes[44..84], &[10u8; 40][..]);
        assert_eq!(&bytes[84..], &[20u8; 40][..]);
    }

    #[test]
    fn invalid_parameters_are_configuration_errors() {
        let dir = tempfile::tempdir().expect("tempdir");

        let twelve_bit = WavWriter::open(dir.path().join("a.wav"), 8_000, 12, 1);
        assert!(matches!(twelve_bit, Err(CaptureError::Config(_))));

        let no_channels = WavWriter::open(dir.path().join("b.wav"), 8_000, 8, 0);
        assert!(matches!(no_channels, Err(CaptureError::Config(_))));

        let no_rate = WavWriter::open(dir.path().join("c.wav"), 0, 8, 1);
        assert!(matches!(no_rate, Err(CaptureError::Config(_))));

        let zero_bits = WavWriter::open(dir.path().join("d.wav"), 8_000, 0, 1);
        assert!(matches!(zero_bits, Err(CaptureError::Config(_))));
    }
}
