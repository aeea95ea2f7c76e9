use std::io::{self, Read, Seek, SeekFrom};

use crate::consts;
use crate::error::{Error, Result};

/// Reads a NUL-terminated string whose length is not known up front.
///
/// The reader is scanned in growing chunks (doubling each time) until a
/// terminator turns up, `limit` bytes have been examined, or the hard cap is
/// hit.  Afterwards the reader is left just past the terminator.
pub(crate) fn read_null_terminated_string<R: Read + Seek>(
    reader: &mut R,
    is_utf8: bool,
    limit: u64,
) -> Result<String> {
    let base = reader.stream_position()?;
    let limit = limit.min(consts::MAX_STRING_SIZE as u64) as usize;
    let mut chunk_size = consts::STRING_CHUNK_SIZE.min(limit);
    loop {
        let mut buffer = vec![0u8; chunk_size];
        let filled = fill(reader, &mut buffer)?;
        if let Some(end) = buffer[..filled].iter().position(|&b| b == 0) {
            reader.seek(SeekFrom::Start(base + end as u64 + 1))?;
            buffer.truncate(end);
            return Ok(decode(buffer, is_utf8));
        }
        if filled < chunk_size || chunk_size >= limit {
            corrupt_cabinet!(
                "Unterminated string at offset {} (scanned {} bytes)",
                base,
                filled
            );
        }
        reader.seek(SeekFrom::Start(base))?;
        chunk_size = (chunk_size * 2).min(limit);
    }
}

fn fill<R: Read>(reader: &mut R, buffer: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(count) => filled += count,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(filled)
}

fn decode(bytes: Vec<u8>, is_utf8: bool) -> String {
    if is_utf8 {
        match String::from_utf8(bytes) {
            Ok(string) => string,
            Err(error) => String::from_utf8_lossy(error.as_bytes()).into_owned(),
        }
    } else {
        // Non-UTF names are in an unspecified single-byte code page; map each
        // byte straight to the code point of the same value.
        bytes.into_iter().map(char::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read, Seek};

    use super::read_null_terminated_string;
    use crate::error::Error;

    #[test]
    fn reads_short_strings_and_stops_after_terminator() {
        let mut cursor = Cursor::new(b"hi.txt\0bye.txt\0rest".to_vec());
        let first = read_null_terminated_string(&mut cursor, false, 100);
        assert_eq!(first.unwrap(), "hi.txt");
        assert_eq!(cursor.stream_position().unwrap(), 7);
        let second = read_null_terminated_string(&mut cursor, false, 100);
        assert_eq!(second.unwrap(), "bye.txt");
        let mut rest = String::new();
        cursor.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "rest");
    }

    #[test]
    fn grows_buffer_for_long_strings() {
        let mut data = vec![b'a'; 1000];
        data.push(0);
        data.extend_from_slice(b"next");
        let mut cursor = Cursor::new(data);
        let string =
            read_null_terminated_string(&mut cursor, false, 10_000).unwrap();
        assert_eq!(string.len(), 1000);
        assert_eq!(cursor.stream_position().unwrap(), 1001);
    }

    #[test]
    fn unterminated_string_is_corrupt() {
        let mut cursor = Cursor::new(vec![b'x'; 600]);
        let result = read_null_terminated_string(&mut cursor, false, 10_000);
        assert!(matches!(result, Err(Error::CorruptCabinet(_))));
    }

    #[test]
    fn limit_bounds_the_scan() {
        let mut data = vec![b'a'; 300];
        data.push(0);
        let mut cursor = Cursor::new(data);
        let result = read_null_terminated_string(&mut cursor, false, 200);
        assert!(matches!(result, Err(Error::CorruptCabinet(_))));
    }

    #[test]
    fn utf8_and_single_byte_names() {
        let mut cursor = Cursor::new(b"\xe2\x98\x83.txt\0".to_vec());
        let name = read_null_terminated_string(&mut cursor, true, 100);
        assert_eq!(name.unwrap(), "\u{2603}.txt");

        let mut cursor = Cursor::new(b"caf\xe9\0".to_vec());
        let name = read_null_terminated_string(&mut cursor, false, 100);
        assert_eq!(name.unwrap(), "caf\u{e9}");
    }
}
