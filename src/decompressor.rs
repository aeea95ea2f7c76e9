use tracing::debug;

use crate::ctype::CompressionType;
use crate::error::{Error, Result};
use crate::lzx::LzxDecoder;
use crate::mszip::MsZipDecoder;
use crate::quantum::QuantumDecoder;

/// The per-folder decoding state for one compression method.
pub(crate) enum Decompressor {
    None,
    MsZip(Box<MsZipDecoder>),
    Quantum(Box<QuantumDecoder>),
    Lzx(Box<LzxDecoder>),
}

impl Decompressor {
    pub(crate) fn for_type(ctype: CompressionType) -> Result<Decompressor> {
        debug!(?ctype, "creating decompressor");
        Ok(match ctype {
            CompressionType::None => Decompressor::None,
            CompressionType::MsZip => {
                Decompressor::MsZip(Box::new(MsZipDecoder::new()?))
            }
            CompressionType::Quantum(_, memory) => Decompressor::Quantum(
                Box::new(QuantumDecoder::new(memory as u32)?),
            ),
            CompressionType::Lzx(window) => {
                Decompressor::Lzx(Box::new(LzxDecoder::new(window as u32)?))
            }
        })
    }

    /// Prepares for the start of a folder compressed with `ctype`.  State
    /// for the same method is reset in place, keeping its window; anything
    /// else is dropped before the new decoder is built.
    pub(crate) fn reconfigure(&mut self, ctype: CompressionType) -> Result<()> {
        match (&mut *self, ctype) {
            (Decompressor::None, CompressionType::None) => {}
            (Decompressor::MsZip(_), CompressionType::MsZip) => {}
            (Decompressor::Quantum(decoder), CompressionType::Quantum(_, memory)) => {
                decoder.reconfigure(memory as u32)?;
            }
            (Decompressor::Lzx(decoder), CompressionType::Lzx(window)) => {
                decoder.reconfigure(window as u32)?;
            }
            _ => {
                *self = Decompressor::None;
                *self = Decompressor::for_type(ctype)?;
            }
        }
        Ok(())
    }

    /// Decodes one data block; `output` is exactly the block's declared
    /// uncompressed size.
    pub(crate) fn decompress(
        &mut self,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<()> {
        match self {
            Decompressor::None => {
                if input.len() != output.len() {
                    return Err(Error::SizeMismatch {
                        compressed: input.len(),
                        uncompressed: output.len(),
                    });
                }
                output.copy_from_slice(input);
                Ok(())
            }
            Decompressor::MsZip(decoder) => decoder.decompress_block(input, output),
            Decompressor::Quantum(decoder) => {
                decoder.decompress_block(input, output)
            }
            Decompressor::Lzx(decoder) => decoder.decompress_block(input, output),
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, RngCore, SeedableRng};

    use super::Decompressor;
    use crate::ctype::CompressionType;
    use crate::error::Error;

    #[test]
    fn none_is_identity_for_equal_lengths() {
        let mut rng = rand::rngs::SmallRng::seed_from_u64(0x0c0ffee);
        let mut decompressor =
            Decompressor::for_type(CompressionType::None).unwrap();
        for _ in 0..1000 {
            let len = rng.gen_range(0..=0x8000);
            let mut input = vec![0u8; len];
            rng.fill_bytes(&mut input);
            let mut output = vec![0u8; len];
            decompressor.decompress(&input, &mut output).unwrap();
            assert_eq!(output, input);
        }
    }

    #[test]
    fn none_rejects_length_mismatch() {
        let mut decompressor =
            Decompressor::for_type(CompressionType::None).unwrap();
        let mut output = [0u8; 4];
        match decompressor.decompress(b"abc", &mut output) {
            Err(Error::SizeMismatch { compressed: 3, uncompressed: 4 }) => {}
            other => panic!("unexpected result {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn reconfigure_switches_methods() {
        let mut decompressor =
            Decompressor::for_type(CompressionType::Lzx(16)).unwrap();
        decompressor.reconfigure(CompressionType::Lzx(15)).unwrap();
        assert!(matches!(decompressor, Decompressor::Lzx(ref d) if d.window_bits() == 15));
        decompressor.reconfigure(CompressionType::Quantum(4, 12)).unwrap();
        assert!(matches!(decompressor, Decompressor::Quantum(ref d) if d.window_bits() == 12));
        decompressor.reconfigure(CompressionType::MsZip).unwrap();
        assert!(matches!(decompressor, Decompressor::MsZip(_)));
        decompressor.reconfigure(CompressionType::None).unwrap();
        assert!(matches!(decompressor, Decompressor::None));
    }
}
