/// Folds `data` into the running cabinet checksum `seed`.
///
/// Whole little-endian words are XORed in; a trailing partial word is packed
/// with its first byte in the most significant used position.
pub fn checksum(data: &[u8], seed: u32) -> u32 {
    let mut chunks = data.chunks_exact(4);
    let mut value = seed;
    for word in &mut chunks {
        value ^= u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
    }
    let tail = chunks.remainder().iter().fold(0u32, |acc, &byte| {
        (acc << 8) | byte as u32
    });
    value ^ tail
}

/// Computes the checksum stored in a CFDATA header: the payload first, then
/// the compressed/uncompressed size fields.
pub fn block_checksum(
    payload: &[u8],
    compressed_size: u16,
    uncompressed_size: u16,
) -> u32 {
    let mut sizes = [0u8; 4];
    sizes[..2].copy_from_slice(&compressed_size.to_le_bytes());
    sizes[2..].copy_from_slice(&uncompressed_size.to_le_bytes());
    checksum(&sizes, checksum(payload, 0))
}
