// ABOUTME: Byte-capped capture buffer for exec output streams
// ABOUTME: Discards overflow silently and flags truncation so the demux loop never stalls

/// A write target with a hard byte cap.
///
/// Once `cap` bytes have been accepted, further writes are discarded and
/// `truncated` is raised. Writes never fail: the caller must be able to keep
/// draining the runtime's multiplexed stream even after the cap is hit,
/// otherwise the runtime's write side can block forever.
#[derive(Debug)]
pub struct LimitedSink {
    buf: Vec<u8>,
    cap: usize,
    truncated: bool,
}

impl LimitedSink {
    pub fn new(cap: usize) -> Self {
        Self {
            buf: Vec::new(),
            cap,
            truncated: false,
        }
    }

    /// Accept up to the remaining capacity from `chunk`; discard the rest.
    pub fn write(&mut self, chunk: &[u8]) {
        if self.buf.len() >= self.cap {
            if !chunk.is_empty() {
                self.truncated = true;
            }
            return;
        }

        let remaining = self.cap - self.buf.len();
        if chunk.len() > remaining {
            self.truncated = true;
            self.buf.extend_from_slice(&chunk[..remaining]);
        } else {
            self.buf.extend_from_slice(chunk);
        }
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_up_to_cap() {
        let mut sink = LimitedSink::new(8);
        sink.write(b"hello");
        assert_eq!(sink.len(), 5);
        assert!(!sink.truncated());
        assert_eq!(sink.into_bytes(), b"hello");
    }

    #[test]
    fn test_partial_write_at_boundary() {
        let mut sink = LimitedSink::new(4);
        sink.write(b"hello");
        assert_eq!(sink.len(), 4);
        assert!(sink.truncated());
        assert_eq!(sink.into_bytes(), b"hell");
    }

    #[test]
    fn test_keeps_discarding_after_cap() {
        let mut sink = LimitedSink::new(2);
        sink.write(b"ab");
        assert!(!sink.truncated());
        sink.write(b"cd");
        sink.write(b"ef");
        assert!(sink.truncated());
        assert_eq!(sink.into_bytes(), b"ab");
    }

    #[test]
    fn test_exact_fill_is_not_truncated() {
        let mut sink = LimitedSink::new(3);
        sink.write(b"abc");
        assert!(!sink.truncated());
        assert_eq!(sink.len(), 3);
    }

    #[test]
    fn test_empty_write_after_cap_does_not_truncate() {
        let mut sink = LimitedSink::new(1);
        sink.write(b"a");
        sink.write(b"");
        assert!(!sink.truncated());
    }

    #[test]
    fn test_many_small_writes() {
        let mut sink = LimitedSink::new(1024);
        for _ in 0..2048 {
            sink.write(b"x");
        }
        assert_eq!(sink.len(), 1024);
        assert!(sink.truncated());
    }
}
