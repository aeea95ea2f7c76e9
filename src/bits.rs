use crate::error::{Error, Result};

// Zero bytes that may be fed past the end of a block before reads fail.
const MAX_OVERRUN: usize = 2;

/// How bits are packed into the bytes of a compressed block.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum BitOrder {
    /// Byte at a time, least significant bit first (MSZIP).
    Lsb,
    /// 16-bit little-endian words, most significant bit first (LZX).
    MsbLe16,
    /// 16-bit big-endian words, most significant bit first (Quantum).
    MsbBe16,
}

/// Pulls bits out of a single compressed block.
///
/// The buffer is refilled lazily, so a peek only touches as much input as
/// it needs.  Once the real input is exhausted, up to two zero bytes are
/// supplied so that short codes at the very end of a block can still be
/// looked up with a full-width peek; anything past that is
/// [`Error::InputTruncated`].
pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    buffer: u64,
    bits_left: u32,
    overrun: usize,
    order: BitOrder,
}

impl<'a> BitReader<'a> {
    pub(crate) fn new(data: &'a [u8], order: BitOrder) -> BitReader<'a> {
        BitReader { data, pos: 0, buffer: 0, bits_left: 0, overrun: 0, order }
    }

    fn next_byte(&mut self) -> Result<u64> {
        if let Some(&byte) = self.data.get(self.pos) {
            self.pos += 1;
            Ok(byte as u64)
        } else if self.overrun < MAX_OVERRUN {
            self.overrun += 1;
            Ok(0)
        } else {
            Err(Error::InputTruncated)
        }
    }

    /// Makes sure at least `count` bits (at most 32) are buffered.
    pub(crate) fn ensure(&mut self, count: u32) -> Result<()> {
        debug_assert!(count <= 32);
        while self.bits_left < count {
            match self.order {
                BitOrder::Lsb => {
                    let byte = self.next_byte()?;
                    self.buffer |= byte << self.bits_left;
                    self.bits_left += 8;
                }
                BitOrder::MsbLe16 | BitOrder::MsbBe16 => {
                    let first = self.next_byte()?;
                    let second = self.next_byte()?;
                    let word = if self.order == BitOrder::MsbLe16 {
                        (second << 8) | first
                    } else {
                        (first << 8) | second
                    };
                    self.buffer |= word << (48 - self.bits_left);
                    self.bits_left += 16;
                }
            }
        }
        Ok(())
    }

    /// Returns the next `count` bits without consuming them.  For the MSB
    /// orders the first bit read is the most significant bit of the result;
    /// for [`BitOrder::Lsb`] it is the least significant.
    pub(crate) fn peek(&mut self, count: u32) -> Result<u32> {
        if count == 0 {
            return Ok(0);
        }
        self.ensure(count)?;
        Ok(self.buffered(count))
    }

    fn buffered(&self, count: u32) -> u32 {
        match self.order {
            BitOrder::Lsb => (self.buffer & ((1u64 << count) - 1)) as u32,
            _ => (self.buffer >> (64 - count)) as u32,
        }
    }

    /// Drops `count` bits that have already been buffered by `peek`.
    pub(crate) fn consume(&mut self, count: u32) {
        debug_assert!(count <= self.bits_left);
        match self.order {
            BitOrder::Lsb => self.buffer >>= count,
            _ => self.buffer <<= count,
        }
        self.bits_left -= count;
    }

    pub(crate) fn read_bits(&mut self, count: u32) -> Result<u32> {
        let value = self.peek(count)?;
        self.consume(count);
        Ok(value)
    }

    pub(crate) fn read_bit(&mut self) -> Result<bool> {
        Ok(self.read_bits(1)? != 0)
    }

    /// Skips to the next byte boundary.
    pub(crate) fn align_to_byte(&mut self) {
        let extra = self.bits_left % 8;
        self.consume(extra);
    }

    /// Realigns an LZX stream ahead of a run of raw bytes: the 1 to 16 bits
    /// of padding up to the next 16-bit boundary are dropped, and any whole
    /// word already pulled into the buffer is handed back to the byte
    /// stream.
    pub(crate) fn align_for_raw(&mut self) -> Result<()> {
        self.ensure(16)?;
        if self.bits_left > 16 {
            self.unread_bytes(2);
        }
        self.reset();
        Ok(())
    }

    fn unread_bytes(&mut self, count: usize) {
        let padded = count.min(self.overrun);
        self.overrun -= padded;
        self.pos -= count - padded;
    }

    /// Empties the bit buffer; the byte position is left where it is.
    pub(crate) fn reset(&mut self) {
        self.buffer = 0;
        self.bits_left = 0;
    }

    /// Reads bytes that are not part of the bit stream.  The bit buffer must
    /// be empty (see [`BitReader::align_for_raw`]).
    pub(crate) fn read_raw(&mut self, count: usize) -> Result<&'a [u8]> {
        debug_assert_eq!(self.bits_left, 0);
        if self.overrun > 0 || self.data.len() - self.pos < count {
            return Err(Error::InputTruncated);
        }
        let bytes = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(bytes)
    }

    pub(crate) fn read_raw_u32(&mut self) -> Result<u32> {
        let bytes = self.read_raw(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn skip_raw(&mut self, count: usize) -> Result<()> {
        self.read_raw(count).map(|_| ())
    }

    /// Number of raw bytes that have not been pulled into the bit buffer.
    #[cfg(test)]
    pub(crate) fn raw_remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// True once no whole byte of real input is left unread.
    pub(crate) fn is_exhausted(&self) -> bool {
        self.pos >= self.data.len()
            && self.bits_left < 8 * (self.overrun as u32 + 1)
    }

    /// LZX sanity check made before each run: running into the padding is
    /// only legitimate while none of the padding bits have been used.
    pub(crate) fn check_overrun(&self) -> Result<()> {
        if self.overrun > 0 && self.bits_left < 8 * self.overrun as u32 {
            illegal_data!("LZX block read past the end of its input");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{BitOrder, BitReader};
    use crate::error::Error;

    #[test]
    fn lsb_order_reads_low_bits_first() {
        let mut reader = BitReader::new(&[0b1010_0110, 0xff], BitOrder::Lsb);
        assert_eq!(reader.read_bits(1).unwrap(), 0);
        assert_eq!(reader.read_bits(2).unwrap(), 0b11);
        assert_eq!(reader.read_bits(5).unwrap(), 0b10100);
        assert_eq!(reader.read_bits(4).unwrap(), 0xf);
        reader.align_to_byte();
        assert!(reader.is_exhausted());
    }

    #[test]
    fn msb_le16_order_reads_words_high_bit_first() {
        let data = [0x34, 0x12, 0x78, 0x56];
        let mut reader = BitReader::new(&data, BitOrder::MsbLe16);
        assert_eq!(reader.read_bits(4).unwrap(), 0x1);
        assert_eq!(reader.read_bits(8).unwrap(), 0x23);
        assert_eq!(reader.read_bits(20).unwrap(), 0x45678);
    }

    #[test]
    fn msb_be16_order_reads_bytes_in_order() {
        let data = [0x12, 0x34, 0x56, 0x78];
        let mut reader = BitReader::new(&data, BitOrder::MsbBe16);
        assert_eq!(reader.read_bits(12).unwrap(), 0x123);
        assert_eq!(reader.read_bits(20).unwrap(), 0x45678);
        assert_eq!(reader.read_bits(16).unwrap(), 0);
        let error = reader.read_bits(1).unwrap_err();
        assert_eq!(error.to_string(), "compressed input ended prematurely");
    }

    #[test]
    fn two_bytes_of_slack_then_truncated() {
        let mut reader = BitReader::new(&[0xff], BitOrder::Lsb);
        assert_eq!(reader.peek(16).unwrap(), 0x00ff);
        assert_eq!(reader.read_bits(8).unwrap(), 0xff);
        assert_eq!(reader.read_bits(16).unwrap(), 0);
        assert!(matches!(reader.read_bits(1), Err(Error::InputTruncated)));
    }

    #[test]
    fn raw_bytes_after_lzx_alignment() {
        let data = [0x00, 0x80, 0xaa, 0xbb, 1, 0, 0, 0];
        let mut reader = BitReader::new(&data, BitOrder::MsbLe16);
        assert_eq!(reader.read_bits(1).unwrap(), 1);
        reader.align_for_raw().unwrap();
        assert_eq!(reader.read_raw(2).unwrap(), &[0xaa, 0xbb]);
        assert_eq!(reader.read_raw_u32().unwrap(), 1);
        assert_eq!(reader.raw_remaining(), 0);
        assert!(matches!(reader.read_raw(1), Err(Error::InputTruncated)));
    }

    #[test]
    fn aligned_lzx_stream_skips_a_whole_padding_word() {
        let data = [0xff, 0xff, 0x11, 0x22];
        let mut reader = BitReader::new(&data, BitOrder::MsbLe16);
        reader.align_for_raw().unwrap();
        assert_eq!(reader.read_raw(2).unwrap(), &[0x11, 0x22]);
    }

    #[test]
    fn overrun_check_flags_consumed_padding() {
        let mut reader = BitReader::new(&[0x00, 0x00], BitOrder::MsbLe16);
        reader.read_bits(16).unwrap();
        assert_eq!(reader.peek(16).unwrap(), 0);
        assert!(reader.check_overrun().is_ok());
        reader.consume(1);
        assert!(matches!(reader.check_overrun(), Err(Error::IllegalData(_))));
    }
}
