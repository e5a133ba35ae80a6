//! [`MjpegSplitter`] – carves JPEG frames out of a multipart MJPEG byte
//! stream.
//!
//! The camera serves `multipart/x-mixed-replace` where each part is one
//! JPEG.  Rather than parsing part headers, the splitter scans for the JPEG
//! start/end markers, which works regardless of boundary name and survives
//! chunk boundaries falling anywhere, including inside a marker.

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Default cap on buffered bytes while waiting for an end marker.
pub const DEFAULT_MAX_BUFFER: usize = 2 * 1024 * 1024;

#[derive(Debug)]
pub struct MjpegSplitter {
    buf: Vec<u8>,
    max_buffer: usize,
}

impl Default for MjpegSplitter {
    fn default() -> Self {
        Self::with_max_buffer(DEFAULT_MAX_BUFFER)
    }
}

impl MjpegSplitter {
    /// A frame that grows past `max_buffer` without an end marker is
    /// discarded.
    pub fn with_max_buffer(max_buffer: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_buffer,
        }
    }

    /// Append `chunk` and return every frame it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            let Some(start) = find(&self.buf, &SOI, 0) else {
                // Keep a trailing 0xFF: it may be the first half of a marker.
                let keep = usize::from(self.buf.last() == Some(&0xFF));
                let drop_to = self.buf.len() - keep;
                self.buf.drain(..drop_to);
                break;
            };
            if start > 0 {
                self.buf.drain(..start);
            }
            match find(&self.buf, &EOI, SOI.len()) {
                Some(end) => {
                    let frame: Vec<u8> = self.buf.drain(..end + EOI.len()).collect();
                    frames.push(frame);
                }
                None => {
                    if self.buf.len() > self.max_buffer {
                        tracing::debug!(bytes = self.buf.len(), "oversized MJPEG part discarded");
                        self.buf.clear();
                    }
                    break;
                }
            }
        }
        frames
    }

    /// Bytes currently held while waiting for a frame to complete.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

fn find(haystack: &[u8], needle: &[u8; 2], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(2)
        .position(|w| w == needle)
        .map(|p| p + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: u8) -> Vec<u8> {
        vec![0xFF, 0xD8, 0xFF, 0xE0, tag, 0xFF, 0xD9]
    }

    fn part(tag: u8) -> Vec<u8> {
        let mut out = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        out.extend(frame(tag));
        out.extend_from_slice(b"\r\n");
        out
    }

    #[test]
    fn splits_multipart_stream() {
        let mut stream = part(1);
        stream.extend(part(2));
        let mut splitter = MjpegSplitter::default();
        let frames = splitter.push(&stream);
        assert_eq!(frames, vec![frame(1), frame(2)]);
    }

    #[test]
    fn frame_split_across_chunks() {
        let stream = part(7);
        let mut splitter = MjpegSplitter::default();
        let mut frames = Vec::new();
        for byte in &stream {
            frames.extend(splitter.push(std::slice::from_ref(byte)));
        }
        assert_eq!(frames, vec![frame(7)]);
        assert!(splitter.buffered() <= 2);
    }

    #[test]
    fn incomplete_frame_waits_for_more() {
        let stream = part(3);
        let (head, tail) = stream.split_at(stream.len() - 4);
        let mut splitter = MjpegSplitter::default();
        assert!(splitter.push(head).is_empty());
        assert_eq!(splitter.push(tail), vec![frame(3)]);
    }

    #[test]
    fn oversized_part_is_dropped() {
        let mut splitter = MjpegSplitter::with_max_buffer(16);
        let mut junk = vec![0xFF, 0xD8];
        junk.extend(std::iter::repeat_n(0x11u8, 32));
        assert!(splitter.push(&junk).is_empty());
        assert_eq!(splitter.buffered(), 0);
        assert_eq!(splitter.push(&part(5)), vec![frame(5)]);
    }
}
