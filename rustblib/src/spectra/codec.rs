//! Peak array compression.
//!
//! m/z values are stored as 64-bit floats, intensities as 32-bit floats, both
//! little-endian. A blob is zlib compressed only when that makes it smaller;
//! otherwise the raw bytes are stored. No flag records which form was used:
//! readers know the peak count from `RefSpectra.numPeaks` and treat a blob as
//! raw when it does not inflate to exactly `numPeaks * element size` bytes.

use std::io;
use std::io::{Read, Write};

use byteorder::{ByteOrder, LittleEndian};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{LibraryError, Result};

/// zlib's own default level.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// A numeric type that can be stored in a peak blob.
pub trait PeakValue: Copy + Default {
    /// Size of one value in bytes
    const SIZE: usize;

    fn write_le(values: &[Self], bytes: &mut [u8]);

    fn read_le(bytes: &[u8], values: &mut [Self]);
}

impl PeakValue for f64 {
    const SIZE: usize = 8;

    fn write_le(values: &[Self], bytes: &mut [u8]) {
        LittleEndian::write_f64_into(values, bytes)
    }

    fn read_le(bytes: &[u8], values: &mut [Self]) {
        LittleEndian::read_f64_into(bytes, values)
    }
}

impl PeakValue for f32 {
    const SIZE: usize = 4;

    fn write_le(values: &[Self], bytes: &mut [u8]) {
        LittleEndian::write_f32_into(values, bytes)
    }

    fn read_le(bytes: &[u8], values: &mut [Self]) {
        LittleEndian::read_f32_into(bytes, values)
    }
}

/// Compresses a byte array using zlib
///
/// # Arguments
///
/// * `data` - A byte slice that holds the uncompressed data
/// * `level` - zlib compression level, 0 to 9
///
/// # Returns
///
/// * `compressed_data` - A vector of u8 that holds the compressed data
///
pub fn zlib_compress(data: &[u8], level: u32) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
    encoder.write_all(data)?;
    encoder.finish()
}

/// Decompresses a zlib compressed byte array, reading at most `limit` bytes of output
pub fn zlib_decompress(data: &[u8], limit: usize) -> io::Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data).take(limit as u64);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

/// Encode a peak array as a blob.
///
/// Compression failures are not errors: the raw bytes are stored instead.
/// A `level` of 0 always stores raw bytes.
pub fn encode_peaks<T: PeakValue>(values: &[T], level: u32) -> Vec<u8> {
    let mut raw = vec![0u8; values.len() * T::SIZE];
    T::write_le(values, &mut raw);

    if level == 0 {
        return raw;
    }

    match zlib_compress(&raw, level) {
        Ok(compressed) if compressed.len() < raw.len() => compressed,
        Ok(_) => raw,
        Err(e) => {
            log::debug!("Storing peaks uncompressed, compression failed: {}", e);
            raw
        }
    }
}

/// Decode a blob holding `expected` peak values.
///
/// Decompression is tried first; a blob that does not inflate to exactly the
/// expected size is read as raw values.
pub fn decode_peaks<T: PeakValue>(blob: &[u8], expected: usize) -> Result<Vec<T>> {
    let size = expected * T::SIZE;
    let mut values = vec![T::default(); expected];

    match zlib_decompress(blob, size + 1) {
        Ok(bytes) if bytes.len() == size => {
            T::read_le(&bytes, &mut values);
            Ok(values)
        }
        _ if blob.len() == size => {
            T::read_le(blob, &mut values);
            Ok(values)
        }
        _ => Err(LibraryError::PeakDecode { expected, actual: blob.len() }),
    }
}

pub fn encode_mz(mz: &[f64], level: u32) -> Vec<u8> {
    encode_peaks(mz, level)
}

pub fn encode_intensity(intensity: &[f32], level: u32) -> Vec<u8> {
    encode_peaks(intensity, level)
}

pub fn decode_mz(blob: &[u8], num_peaks: usize) -> Result<Vec<f64>> {
    decode_peaks(blob, num_peaks)
}

pub fn decode_intensity(blob: &[u8], num_peaks: usize) -> Result<Vec<f32>> {
    decode_peaks(blob, num_peaks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_compressible_data_is_compressed() {
        let mz: Vec<f64> = (0..500).map(|i| 100.0 + i as f64 * 0.5).collect();
        let blob = encode_mz(&mz, DEFAULT_COMPRESSION_LEVEL);
        assert!(blob.len() < mz.len() * 8);
        assert_eq!(decode_mz(&blob, mz.len()).unwrap(), mz);
    }

    #[test]
    fn test_single_value_stays_raw() {
        let intensity = vec![1234.5f32];
        let blob = encode_intensity(&intensity, DEFAULT_COMPRESSION_LEVEL);
        assert_eq!(blob, 1234.5f32.to_le_bytes().to_vec());
        assert_eq!(decode_intensity(&blob, 1).unwrap(), intensity);
    }

    #[test]
    fn test_all_zero() {
        let mz = vec![0.0f64; 64];
        let blob = encode_mz(&mz, DEFAULT_COMPRESSION_LEVEL);
        assert_eq!(decode_mz(&blob, 64).unwrap(), mz);
    }

    #[test]
    fn test_empty() {
        let blob = encode_mz(&[], DEFAULT_COMPRESSION_LEVEL);
        assert!(blob.is_empty());
        assert!(decode_mz(&blob, 0).unwrap().is_empty());
    }

    #[test]
    fn test_level_zero_is_raw() {
        let intensity = vec![1.0f32; 100];
        let blob = encode_intensity(&intensity, 0);
        assert_eq!(blob.len(), 400);
        assert_eq!(decode_intensity(&blob, 100).unwrap(), intensity);
    }

    #[test]
    fn test_wrong_count_is_error() {
        let blob = encode_mz(&[1.0, 2.0, 3.0], DEFAULT_COMPRESSION_LEVEL);
        match decode_mz(&blob, 5) {
            Err(LibraryError::PeakDecode { expected, actual }) => {
                assert_eq!(expected, 5);
                assert_eq!(actual, blob.len());
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    proptest! {
        #[test]
        fn prop_mz_round_trip(mz in prop::collection::vec(any::<f64>(), 0..300)) {
            let blob = encode_mz(&mz, DEFAULT_COMPRESSION_LEVEL);
            let decoded = decode_mz(&blob, mz.len()).unwrap();
            let expected: Vec<u64> = mz.iter().map(|v| v.to_bits()).collect();
            let actual: Vec<u64> = decoded.iter().map(|v| v.to_bits()).collect();
            prop_assert_eq!(actual, expected);
        }

        #[test]
        fn prop_intensity_round_trip(intensity in prop::collection::vec(0.0f32..1e7, 0..300)) {
            let blob = encode_intensity(&intensity, DEFAULT_COMPRESSION_LEVEL);
            prop_assert_eq!(decode_intensity(&blob, intensity.len()).unwrap(), intensity);
        }
    }
}
