//! Bit-granular readers and writers plus the variable-byte integer codecs.
//!
//! The histogram wire format mixes three granularities: raw big-endian scalars
//! (`f64` values), byte-aligned varints (counts and bin indices), and bit-packed
//! counter payloads whose field width is chosen per histogram. [`BitWriter`] and
//! [`BitReader`] cover the last kind: fields of 1 to 64 bits, MSB-first within
//! each byte, with no alignment requirement between fields.

use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Accumulates bit fields and flushes whole bytes to the underlying sink.
///
/// Bits are emitted MSB-first: the first bit written becomes the most significant
/// bit of the first byte. [`BitWriter::finish`] must be called to flush a trailing
/// partial byte; residual bits are left-aligned and zero-padded.
pub struct BitWriter<'a, W: Write> {
    sink: &'a mut W,
    buffer: u64,
    bit_count: u32,
}

impl<'a, W: Write> BitWriter<'a, W> {
    /// Creates a bit writer over the given sink.
    pub fn new(sink: &'a mut W) -> BitWriter<'a, W> {
        BitWriter {
            sink,
            buffer: 0,
            bit_count: 0,
        }
    }

    /// Appends the lowest `n_bits` bits of `value`, 1 to 64.
    pub fn write_bits(&mut self, n_bits: u32, value: u64) -> io::Result<()> {
        debug_assert!(n_bits >= 1 && n_bits <= 64);
        debug_assert!(n_bits == 64 || value < (1u64 << n_bits));
        if n_bits > 56 {
            // Split so the accumulator (at most 7 residual bits) cannot overflow.
            self.write_bits(n_bits - 32, value >> 32)?;
            return self.write_bits(32, value & 0xffff_ffff);
        }
        self.buffer = (self.buffer << n_bits) | value;
        self.bit_count += n_bits;
        while self.bit_count >= 8 {
            self.bit_count -= 8;
            self.sink.write_u8((self.buffer >> self.bit_count) as u8)?;
        }
        Ok(())
    }

    /// Flushes any residual bits as one final byte, left-aligned.
    pub fn finish(mut self) -> io::Result<()> {
        if self.bit_count > 0 {
            let residual = (self.buffer << (8 - self.bit_count)) as u8;
            self.bit_count = 0;
            self.sink.write_u8(residual)?;
        }
        Ok(())
    }
}

/// The inverse of [`BitWriter`]: extracts bit fields from a byte source, fetching
/// bytes lazily and supporting unaligned reads across byte boundaries.
pub struct BitReader<'a, R: Read> {
    source: &'a mut R,
    buffer: u64,
    bit_count: u32,
}

impl<'a, R: Read> BitReader<'a, R> {
    /// Creates a bit reader over the given source.
    pub fn new(source: &'a mut R) -> BitReader<'a, R> {
        BitReader {
            source,
            buffer: 0,
            bit_count: 0,
        }
    }

    /// Reads the next `n_bits` bits, 1 to 64, as an unsigned integer.
    ///
    /// Fails with `io::ErrorKind::UnexpectedEof` if the source is exhausted.
    pub fn read_bits(&mut self, n_bits: u32) -> io::Result<u64> {
        debug_assert!(n_bits >= 1 && n_bits <= 64);
        if n_bits > 56 {
            let high = self.read_bits(n_bits - 32)?;
            let low = self.read_bits(32)?;
            return Ok((high << 32) | low);
        }
        while self.bit_count < n_bits {
            let byte = self.source.read_u8()?;
            self.buffer = (self.buffer << 8) | u64::from(byte);
            self.bit_count += 8;
        }
        self.bit_count -= n_bits;
        let value = (self.buffer >> self.bit_count) & ((1u64 << n_bits) - 1);
        Ok(value)
    }
}

/// Writes a value as an LEB128 varint: 7 data bits per byte, the high bit set on
/// every byte except the last. Takes 1 to 10 bytes.
pub fn write_unsigned_var_long<W: Write>(sink: &mut W, mut value: u64) -> io::Result<()> {
    while value >= 0x80 {
        sink.write_u8((value as u8) | 0x80)?;
        value >>= 7;
    }
    sink.write_u8(value as u8)
}

/// Reads a varint written by [`write_unsigned_var_long`].
pub fn read_unsigned_var_long<R: Read>(source: &mut R) -> io::Result<u64> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = source.read_u8()?;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift >= 70 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "varint is longer than 10 bytes",
            ));
        }
    }
}

/// Writes an `i32` as a zig-zag varint. Maps signed numbers to unsigned: 0 to 0,
/// -1 to 1, 1 to 2, -2 to 3, etc, so small magnitudes of either sign stay short.
pub fn write_signed_var_int<W: Write>(sink: &mut W, value: i32) -> io::Result<()> {
    let zig_zag = (value.wrapping_shl(1) ^ (value >> 31)) as u32;
    write_unsigned_var_long(sink, u64::from(zig_zag))
}

/// Reads an `i32` written by [`write_signed_var_int`].
pub fn read_signed_var_int<R: Read>(source: &mut R) -> io::Result<i32> {
    let encoded = read_unsigned_var_long(source)?;
    if encoded > u64::from(u32::MAX) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "signed varint does not fit in 32 bits",
        ));
    }
    let encoded = encoded as u32;
    Ok(((encoded >> 1) as i32) ^ -((encoded & 1) as i32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use std::io::Cursor;

    #[test]
    fn bit_writer_packs_msb_first() {
        let mut buf = Vec::new();
        let mut writer = BitWriter::new(&mut buf);
        writer.write_bits(3, 0b101).unwrap();
        writer.write_bits(2, 0b01).unwrap();
        writer.write_bits(3, 0b110).unwrap();
        writer.finish().unwrap();
        assert_eq!(buf, vec![0b1010_1110]);
    }

    #[test]
    fn bit_writer_pads_final_byte_on_the_right() {
        let mut buf = Vec::new();
        let mut writer = BitWriter::new(&mut buf);
        writer.write_bits(3, 0b111).unwrap();
        writer.finish().unwrap();
        assert_eq!(buf, vec![0b1110_0000]);
    }

    #[test]
    fn bit_roundtrip_unaligned_64() {
        let fields: [(u32, u64); 7] = [
            (1, 1),
            (64, u64::MAX),
            (7, 0x55),
            (64, 0x0123_4567_89ab_cdef),
            (13, 0x1abc),
            (33, 0x1_ffff_fffe),
            (5, 9),
        ];
        let mut buf = Vec::new();
        let mut writer = BitWriter::new(&mut buf);
        for &(n, v) in &fields {
            writer.write_bits(n, v).unwrap();
        }
        writer.finish().unwrap();

        let mut cursor = Cursor::new(&buf);
        let mut reader = BitReader::new(&mut cursor);
        for &(n, v) in &fields {
            assert_eq!(reader.read_bits(n).unwrap(), v, "{} bits", n);
        }
    }

    #[test]
    fn bit_reader_eof() {
        let buf = [0xffu8];
        let mut cursor = Cursor::new(&buf[..]);
        let mut reader = BitReader::new(&mut cursor);
        assert_eq!(reader.read_bits(8).unwrap(), 0xff);
        let err = reader.read_bits(1).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn bit_roundtrip_random() {
        let mut rng = SmallRng::seed_from_u64(0x1bd1_04e2);
        for _ in 0..1000 {
            let fields: Vec<(u32, u64)> = (0..rng.gen_range(1..20))
                .map(|_| {
                    let n = rng.gen_range(1..=64);
                    let v = if n == 64 { rng.gen() } else { rng.gen::<u64>() & ((1u64 << n) - 1) };
                    (n, v)
                })
                .collect();
            let mut buf = Vec::new();
            let mut writer = BitWriter::new(&mut buf);
            for &(n, v) in &fields {
                writer.write_bits(n, v).unwrap();
            }
            writer.finish().unwrap();
            let mut cursor = Cursor::new(&buf);
            let mut reader = BitReader::new(&mut cursor);
            for &(n, v) in &fields {
                assert_eq!(reader.read_bits(n).unwrap(), v);
            }
        }
    }

    #[test]
    fn varint_known_vectors() {
        let vectors: [(u64, &[u8]); 6] = [
            (0, &[0x00]),
            (1, &[0x01]),
            (127, &[0x7f]),
            (128, &[0x80, 0x01]),
            (300, &[0xac, 0x02]),
            (u64::MAX, &[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01]),
        ];
        for &(value, bytes) in &vectors {
            let mut buf = Vec::new();
            write_unsigned_var_long(&mut buf, value).unwrap();
            assert_eq!(buf, bytes, "{}", value);
            assert_eq!(read_unsigned_var_long(&mut Cursor::new(&buf)).unwrap(), value);
        }
    }

    #[test]
    fn signed_varint_zig_zag() {
        let vectors: [(i32, u64); 7] = [
            (0, 0),
            (-1, 1),
            (1, 2),
            (-2, 3),
            (2, 4),
            (i32::MAX, u64::from(u32::MAX) - 1),
            (i32::MIN, u64::from(u32::MAX)),
        ];
        for &(value, encoded) in &vectors {
            let mut buf = Vec::new();
            write_signed_var_int(&mut buf, value).unwrap();
            let mut expected = Vec::new();
            write_unsigned_var_long(&mut expected, encoded).unwrap();
            assert_eq!(buf, expected, "{}", value);
            assert_eq!(read_signed_var_int(&mut Cursor::new(&buf)).unwrap(), value);
        }
    }

    #[test]
    fn varint_roundtrip_random() {
        let mut rng = SmallRng::seed_from_u64(0x7031_a6c3);
        for _ in 0..100_000 {
            let value: u64 = rng.gen::<u64>() >> rng.gen_range(0..64);
            let mut buf = Vec::new();
            write_unsigned_var_long(&mut buf, value).unwrap();
            assert_eq!(read_unsigned_var_long(&mut Cursor::new(&buf)).unwrap(), value);

            let signed: i32 = rng.gen();
            let mut buf = Vec::new();
            write_signed_var_int(&mut buf, signed).unwrap();
            assert_eq!(read_signed_var_int(&mut Cursor::new(&buf)).unwrap(), signed);
        }
    }

    #[test]
    fn varint_eof() {
        // Continuation bit set but no following byte.
        let err = read_unsigned_var_long(&mut Cursor::new(&[0x80u8][..])).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
