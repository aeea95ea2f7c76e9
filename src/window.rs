use crate::error::{Error, Result};

/// A sliding history window for the LZ77-style codecs.
///
/// The allocation is kept across folders and only replaced when a larger
/// window is requested; `size` is the logical window size in use.
pub(crate) struct Window {
    buffer: Vec<u8>,
    size: usize,
    pub(crate) position: usize,
}

impl Window {
    pub(crate) fn new(size: usize) -> Result<Window> {
        Ok(Window { buffer: allocate(size)?, size, position: 0 })
    }

    /// Prepares the window for a new folder.  Returns true if the existing
    /// allocation was big enough to be reused.
    pub(crate) fn reconfigure(&mut self, size: usize) -> Result<bool> {
        let reused = size <= self.buffer.len();
        if !reused {
            // Drop the old buffer first so both never coexist.
            self.buffer = Vec::new();
            self.buffer = allocate(size)?;
        }
        self.size = size;
        self.position = 0;
        Ok(reused)
    }

    #[cfg(test)]
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Wraps the position back to the start once it reaches the end.
    pub(crate) fn wrap(&mut self) {
        self.position &= self.size - 1;
    }

    /// Space left before the end of the window.
    pub(crate) fn remaining(&self) -> usize {
        self.size - self.position
    }

    pub(crate) fn push(&mut self, byte: u8) {
        self.buffer[self.position] = byte;
        self.position += 1;
    }

    pub(crate) fn push_slice(&mut self, bytes: &[u8]) {
        let end = self.position + bytes.len();
        self.buffer[self.position..end].copy_from_slice(bytes);
        self.position = end;
    }

    /// Copies `length` bytes starting `distance` bytes back.  The source may
    /// wrap around the end of the window; the destination must not.
    pub(crate) fn copy_match(
        &mut self,
        distance: usize,
        length: usize,
    ) -> Result<()> {
        if distance == 0 || distance > self.size {
            illegal_data!(
                "Match distance {} outside a {}-byte window",
                distance,
                self.size
            );
        }
        if length > self.remaining() {
            data_format!("Match runs past the end of the window");
        }
        let mut source = (self.position + self.size - distance) % self.size;
        for _ in 0..length {
            self.buffer[self.position] = self.buffer[source];
            self.position += 1;
            source += 1;
            if source == self.size {
                source = 0;
            }
        }
        Ok(())
    }

    /// The last `length` bytes written, ending at the current position.
    pub(crate) fn recent(&self, length: usize) -> &[u8] {
        &self.buffer[self.position - length..self.position]
    }
}

fn allocate(size: usize) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(size).map_err(|_| Error::OutOfMemory(size))?;
    buffer.resize(size, 0);
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::Window;
    use crate::error::Error;

    #[test]
    fn reuses_allocation_unless_growing() {
        let mut window = Window::new(1 << 16).unwrap();
        assert!(window.reconfigure(1 << 15).unwrap());
        assert_eq!(window.size(), 1 << 15);
        assert_eq!(window.capacity(), 1 << 16);
        assert!(!window.reconfigure(1 << 17).unwrap());
        assert_eq!(window.capacity(), 1 << 17);
    }

    #[test]
    fn overlapping_match_repeats_bytes() {
        let mut window = Window::new(16).unwrap();
        window.push_slice(b"ab");
        window.copy_match(2, 6).unwrap();
        assert_eq!(window.recent(8), b"abababab");
    }

    #[test]
    fn match_source_wraps_around_window_end() {
        let mut window = Window::new(8).unwrap();
        window.push_slice(b"0123456");
        window.push(b'7');
        window.wrap();
        assert_eq!(window.position, 0);
        window.copy_match(3, 4).unwrap();
        assert_eq!(window.recent(4), b"5675");
    }

    #[test]
    fn rejects_bad_matches() {
        let mut window = Window::new(8).unwrap();
        window.push_slice(b"abcdef");
        let result = window.copy_match(9, 1);
        assert!(matches!(result, Err(Error::IllegalData(_))));
        let result = window.copy_match(0, 1);
        assert!(matches!(result, Err(Error::IllegalData(_))));
        let result = window.copy_match(2, 3);
        assert!(matches!(result, Err(Error::DataFormat(_))));
    }
}
