use crate::error::PlayerError;

/// Single reusable window of resampled s16 bytes.
///
/// Not a true ring: the window is refilled only once every byte has been read,
/// so `cursor <= len <= capacity` always holds.
#[derive(Debug, Default)]
pub struct AudioRingBuffer {
    data: Vec<u8>,
    len: usize,
    cursor: usize,
}

impl AudioRingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Unread bytes.
    pub fn available(&self) -> usize {
        self.len - self.cursor
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.len
    }

    /// Drop unread bytes.
    pub fn clear(&mut self) {
        self.len = 0;
        self.cursor = 0;
    }

    /// Refill the window through `fill`, growing it to `capacity` bytes first.
    ///
    /// Returns the number of bytes `fill` reported. Does nothing while unread bytes
    /// remain.
    pub fn refill<F>(&mut self, capacity: usize, fill: F) -> Result<usize, PlayerError>
    where
        F: FnOnce(&mut [u8]) -> usize,
    {
        if !self.is_exhausted() {
            return Ok(0);
        }
        if self.data.len() < capacity {
            let extra = capacity - self.data.len();
            self.data
                .try_reserve_exact(extra)
                .map_err(|_| PlayerError::Allocation { bytes: capacity })?;
            self.data.resize(capacity, 0);
        }
        let written = fill(&mut self.data[..capacity]).min(capacity);
        self.len = written;
        self.cursor = 0;
        Ok(written)
    }

    /// Copy up to `out.len()` unread bytes into `out`; returns the count copied.
    pub fn read_into(&mut self, out: &mut [u8]) -> usize {
        let n = self.available().min(out.len());
        out[..n].copy_from_slice(&self.data[self.cursor..self.cursor + n]);
        self.cursor += n;
        n
    }
}
