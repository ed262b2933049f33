//! Reassembles a chunked byte stream into newline-delimited lines

/// Splits incoming chunks on `\n`, carrying the incomplete tail to the next chunk.
///
/// The carry is kept as bytes, so a multi-byte UTF-8 character split across
/// chunks is decoded only once both halves have arrived.
#[derive(Debug, Default)]
pub struct LineFramer {
    carry: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completes, in stream order
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(chunk);

        let Some(last_newline) = self.carry.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };

        let tail = self.carry.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.carry, tail);

        // `\n` never occurs inside a multi-byte sequence, so each piece is whole
        complete[..last_newline]
            .split(|&b| b == b'\n')
            .map(decode_line)
            .collect()
    }

    /// Drain the unterminated remainder at end of stream
    pub fn finish(&mut self) -> Option<String> {
        if self.carry.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.carry);
        Some(decode_line(&rest))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_all(chunks: &[&[u8]]) -> (Vec<String>, Option<String>) {
        let mut framer = LineFramer::new();
        let mut lines = Vec::new();
        for chunk in chunks {
            lines.extend(framer.push(chunk));
        }
        (lines, framer.finish())
    }

    #[test]
    fn test_single_chunk() {
        let (lines, rest) = frame_all(&[b"data: a\ndata: b\n".as_slice()]);
        assert_eq!(lines, vec!["data: a", "data: b"]);
        assert_eq!(rest, None);
    }

    #[test]
    fn test_partial_line_carried_over() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.push(b"data: trai"), Vec::<String>::new());
        assert_eq!(framer.push(b"ning\ndata"), vec!["data: training"]);
        assert_eq!(framer.finish(), Some("data".to_string()));
        assert_eq!(framer.finish(), None);
    }

    #[test]
    fn test_chunk_boundaries_do_not_change_output() {
        let stream = "data: héllo ✓\n\ndata: wörld ✗\r\ndata: tail".as_bytes();
        let whole = frame_all(&[stream]);

        for split in 0..=stream.len() {
            let (a, b) = stream.split_at(split);
            assert_eq!(frame_all(&[a, b]), whole, "split at byte {}", split);
        }

        let bytewise: Vec<&[u8]> = stream.chunks(1).collect();
        assert_eq!(frame_all(&bytewise), whole);
        assert_eq!(whole.0, vec!["data: héllo ✓", "", "data: wörld ✗"]);
    }

    #[test]
    fn test_split_multibyte_character() {
        let check = "✓".as_bytes();
        let mut framer = LineFramer::new();
        assert!(framer.push(&[b"data: ".as_slice(), &check[..1]].concat()).is_empty());
        let lines = framer.push(&[&check[1..], b"\n".as_slice()].concat());
        assert_eq!(lines, vec!["data: ✓"]);
    }
}
