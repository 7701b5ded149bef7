use tracing::debug;

use super::events::StreamEvent;

const DATA_PREFIX: &str = "data:";
const FRAME_DELIMITER: &[u8] = b"\n\n";

/// Running counters for one decoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Non-blank frames seen.
    pub frames: u64,
    /// Frames decoded into an event.
    pub events: u64,
    /// Frames without the `data:` prefix (comments, keep-alives).
    pub skipped: u64,
    /// `data:` frames whose payload was not a valid event.
    pub dropped: u64,
}

/// Incremental deframer for `data: {json}\n\n` streams.
///
/// Bytes are buffered raw and only cut at the ASCII frame delimiter, so a
/// multi-byte character split across two chunks is reassembled before it is
/// ever decoded.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    // Offset below which the buffer is known to hold no delimiter.
    scanned: usize,
    stats: DecoderStats,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning every event completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        // CRLF framing collapses to LF. JSON escapes carriage returns inside
        // strings, so no payload byte is lost.
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(pos) = self.find_delimiter() {
            let frame: Vec<u8> = self.buffer.drain(..pos + FRAME_DELIMITER.len()).collect();
            self.scanned = 0;
            if let Some(event) = self.decode_frame(&frame[..pos]) {
                events.push(event);
            }
        }
        self.scanned = self.buffer.len().saturating_sub(FRAME_DELIMITER.len() - 1);
        events
    }

    /// Flush a trailing frame the server closed without a blank line.
    pub fn finish(&mut self) -> Option<StreamEvent> {
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        self.decode_frame(&rest)
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    fn find_delimiter(&self) -> Option<usize> {
        let start = self.scanned.min(self.buffer.len());
        self.buffer[start..]
            .windows(FRAME_DELIMITER.len())
            .position(|w| w == FRAME_DELIMITER)
            .map(|i| start + i)
    }

    fn decode_frame(&mut self, raw: &[u8]) -> Option<StreamEvent> {
        let text = String::from_utf8_lossy(raw);
        let frame = text.trim();
        if frame.is_empty() {
            return None;
        }
        self.stats.frames += 1;

        let Some(payload) = frame.strip_prefix(DATA_PREFIX) else {
            self.stats.skipped += 1;
            return None;
        };
        let payload = payload.trim();
        if payload.is_empty() {
            self.stats.skipped += 1;
            return None;
        }

        match parse_event(payload) {
            Ok(event) => {
                self.stats.events += 1;
                Some(event)
            }
            Err(e) => {
                self.stats.dropped += 1;
                debug!(error = %e, len = payload.len(), "dropping malformed frame");
                None
            }
        }
    }
}

fn parse_event(payload: &str) -> serde_json::Result<StreamEvent> {
    let mut value: serde_json::Value = serde_json::from_str(payload)?;
    if let Some(obj) = value.as_object_mut() {
        if !obj.contains_key("event") {
            if let Some(kind) = obj.remove("kind") {
                obj.insert("event".to_string(), kind);
            }
        }
    }
    serde_json::from_value(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(angle: &str, text: &str) -> StreamEvent {
        StreamEvent::AngleDelta {
            angle: angle.to_string(),
            delta: text.to_string(),
        }
    }

    #[test]
    fn test_single_chunk_two_frames() {
        let mut dec = FrameDecoder::new();
        let events = dec.push(
            b"data: {\"event\":\"angle_delta\",\"angle\":\"A\",\"delta\":\"x\"}\n\ndata: {\"event\":\"final_start\"}\n\n",
        );
        assert_eq!(events, vec![delta("A", "x"), StreamEvent::FinalStart]);
        assert_eq!(dec.stats().events, 2);
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let mut dec = FrameDecoder::new();
        assert!(dec.push(b"data: {\"event\":\"angle_de").is_empty());
        assert!(dec.push(b"lta\",\"angle\":\"A\",\"delta\":\"xy\"}\n").is_empty());
        assert_eq!(dec.push(b"\n"), vec![delta("A", "xy")]);
    }

    #[test]
    fn test_utf8_split_across_chunks() {
        let frame = "data: {\"event\":\"angle_delta\",\"angle\":\"方法\",\"delta\":\"é✓\"}\n\n";
        let bytes = frame.as_bytes();
        // Cut inside the three-byte encoding of the first character of the angle name.
        let cut = frame.find('方').unwrap() + 1;
        let mut dec = FrameDecoder::new();
        assert!(dec.push(&bytes[..cut]).is_empty());
        assert_eq!(dec.push(&bytes[cut..]), vec![delta("方法", "é✓")]);
    }

    #[test]
    fn test_malformed_frame_between_valid_frames() {
        let mut dec = FrameDecoder::new();
        let events = dec.push(
            b"data: {\"event\":\"angle_delta\",\"angle\":\"A\",\"delta\":\"1\"}\n\n\
              data: {not json\n\n\
              data: {\"event\":\"angle_delta\",\"angle\":\"A\",\"delta\":\"2\"}\n\n",
        );
        assert_eq!(events, vec![delta("A", "1"), delta("A", "2")]);
        let stats = dec.stats();
        assert_eq!(stats.events, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.frames, 3);
    }

    #[test]
    fn test_non_data_frames_are_skipped() {
        let mut dec = FrameDecoder::new();
        let events = dec.push(b": keep-alive\n\nevent: ping\n\ndata:\n\n");
        assert!(events.is_empty());
        assert_eq!(dec.stats().skipped, 3);
        assert_eq!(dec.stats().dropped, 0);
    }

    #[test]
    fn test_crlf_delimiters() {
        let mut dec = FrameDecoder::new();
        let events = dec.push(b"data: {\"event\":\"final_delta\",\"delta\":\"r\"}\r\n\r\n");
        assert_eq!(
            events,
            vec![StreamEvent::FinalDelta {
                delta: "r".to_string()
            }]
        );
    }

    #[test]
    fn test_kind_alias() {
        let mut dec = FrameDecoder::new();
        let events = dec.push(b"data: {\"kind\":\"angle_done\",\"angle\":\"A\"}\n\n");
        assert_eq!(
            events,
            vec![StreamEvent::AngleDone {
                angle: "A".to_string()
            }]
        );
    }

    #[test]
    fn test_finish_flushes_trailing_frame() {
        let mut dec = FrameDecoder::new();
        assert!(dec
            .push(b"data: {\"event\":\"final_done\",\"text_char_count\":10}")
            .is_empty());
        assert_eq!(
            dec.finish(),
            Some(StreamEvent::FinalDone {
                text_char_count: Some(10),
                model: None
            })
        );
        assert_eq!(dec.finish(), None);
    }

    #[test]
    fn test_delimiter_split_between_chunks() {
        let mut dec = FrameDecoder::new();
        assert!(dec.push(b"data: {\"event\":\"final_start\"}\n").is_empty());
        assert_eq!(dec.push(b"\ndata: {\"event\":\"fin"), vec![StreamEvent::FinalStart]);
        assert_eq!(
            dec.push(b"al_start\"}\n\n"),
            vec![StreamEvent::FinalStart]
        );
    }
}
