use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("buffer exceeds max size without delimiter: {size} > {max}")]
    OversizedBuffer { size: usize, max: usize },
    #[error("frame is not valid utf-8: {0}")]
    Encoding(String),
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

#[derive(Debug, Clone)]
pub struct DecodeReport<T> {
    pub frames: Vec<T>,
    pub errors: Vec<FrameError>,
}

impl<T> Default for DecodeReport<T> {
    fn default() -> Self {
        Self {
            frames: Vec::new(),
            errors: Vec::new(),
        }
    }
}

impl<T> DecodeReport<T> {
    fn push_frame(&mut self, frame: T) {
        self.frames.push(frame);
    }

    fn push_error(&mut self, error: FrameError) {
        self.errors.push(error);
    }

    fn extend(&mut self, other: DecodeReport<T>) {
        self.frames.extend(other.frames);
        self.errors.extend(other.errors);
    }
}

/// Encodes one value as a `text/event-stream` message.
pub fn encode_event_frame<T: Serialize>(
    value: &T,
    max_frame_bytes: usize,
) -> Result<Vec<u8>, FrameError> {
    let encoded = serde_json::to_string(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    let mut frame = Vec::with_capacity(encoded.len() + 8);
    for line in encoded.split('\n') {
        frame.extend_from_slice(b"data: ");
        frame.extend_from_slice(line.as_bytes());
        frame.push(b'\n');
    }
    frame.push(b'\n');
    Ok(frame)
}

/// Incremental `text/event-stream` decoder.
///
/// Chunks may split messages anywhere, including inside a multi-byte
/// character. Each message's `data:` lines are joined and parsed as `T`.
pub struct SseFrameDecoder<T> {
    max_frame_bytes: usize,
    pending: Vec<u8>,
    last_event_id: Option<String>,
    retry_hint: Option<Duration>,
    marker: PhantomData<T>,
}

impl<T> SseFrameDecoder<T> {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            pending: Vec::new(),
            last_event_id: None,
            retry_hint: None,
            marker: PhantomData,
        }
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    pub fn retry_hint(&self) -> Option<Duration> {
        self.retry_hint
    }
}

impl<T> Default for SseFrameDecoder<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl<T: DeserializeOwned> SseFrameDecoder<T> {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> DecodeReport<T> {
        let mut report = DecodeReport::default();
        if !chunk.is_empty() {
            self.pending.extend_from_slice(chunk);
        }

        while let Some((frame_end, consumed)) = frame_boundary(&self.pending) {
            let frame = self.pending.drain(..consumed).take(frame_end).collect::<Vec<u8>>();
            if frame.is_empty() {
                continue;
            }
            self.decode_raw_frame(&frame, &mut report);
        }

        if !self.pending.is_empty() && self.pending.len() > self.max_frame_bytes {
            report.push_error(FrameError::OversizedBuffer {
                size: self.pending.len(),
                max: self.max_frame_bytes,
            });
            self.pending.clear();
        }

        report
    }

    /// Flushes a trailing message that was not terminated by a blank line.
    pub fn finish(&mut self) -> DecodeReport<T> {
        if self.pending.is_empty() {
            return DecodeReport::default();
        }

        let final_frame = std::mem::take(&mut self.pending);
        let mut report = DecodeReport::default();
        self.decode_raw_frame(&final_frame, &mut report);
        report
    }

    fn decode_raw_frame(&mut self, frame: &[u8], report: &mut DecodeReport<T>) {
        if frame.len() > self.max_frame_bytes {
            report.push_error(FrameError::OversizedFrame {
                size: frame.len(),
                max: self.max_frame_bytes,
            });
            return;
        }
        let text = match std::str::from_utf8(frame) {
            Ok(text) => text,
            Err(err) => {
                report.push_error(FrameError::Encoding(err.to_string()));
                return;
            }
        };

        let mut data_lines: Vec<&str> = Vec::new();
        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "data" => data_lines.push(value),
                "id" => self.last_event_id = Some(value.to_string()),
                "retry" => {
                    if let Ok(millis) = value.trim().parse::<u64>() {
                        self.retry_hint = Some(Duration::from_millis(millis));
                    }
                }
                _ => {}
            }
        }

        if data_lines.is_empty() {
            return;
        }
        let data = data_lines.join("\n");
        match serde_json::from_str(&data) {
            Ok(parsed) => report.push_frame(parsed),
            Err(err) => report.push_error(FrameError::Decode(err.to_string())),
        }
    }

    /// Feeds several chunks and finishes; mostly useful for fixtures.
    pub fn decode_all<'c, I>(&mut self, chunks: I) -> DecodeReport<T>
    where
        I: IntoIterator<Item = &'c [u8]>,
    {
        let mut report = DecodeReport::default();
        for chunk in chunks {
            report.extend(self.push_chunk(chunk));
        }
        report.extend(self.finish());
        report
    }
}

/// Returns `(frame_len, consumed)` for the first blank-line terminated message.
fn frame_boundary(buf: &[u8]) -> Option<(usize, usize)> {
    let mut line_start = 0;
    for (idx, byte) in buf.iter().enumerate() {
        if *byte != b'\n' {
            continue;
        }
        let line = &buf[line_start..idx];
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            return Some((line_start, idx + 1));
        }
        line_start = idx + 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AlertEvent;

    fn alert_json(id: u32) -> String {
        format!(
            r#"{{"id":{id},"timestamp":"2026-02-07T21:00:0{id}","severity":"높음","threat_type":"Task Replay","source_agent":"Atlas-Planner","target_agent":"Hermes-Router","protocol_layer":"Layer 3","description":"replay","resolution":"blocked"}}"#
        )
    }

    #[test]
    fn decodes_messages_split_across_chunks() {
        let message = format!("data: {}\n\n", alert_json(1));
        let (head, tail) = message.as_bytes().split_at(17);

        let mut decoder = SseFrameDecoder::<AlertEvent>::default();
        let first = decoder.push_chunk(head);
        assert!(first.frames.is_empty());
        assert!(first.errors.is_empty());

        let second = decoder.push_chunk(tail);
        assert_eq!(second.frames.len(), 1);
        assert_eq!(second.frames[0].id, "1");
    }

    #[test]
    fn keepalives_comments_and_fields_are_not_frames() {
        let stream = format!(
            ": keep-alive\n\nretry: 2500\nid: 77\nevent: message\ndata: {}\r\n\r\n",
            alert_json(2)
        );
        let mut decoder = SseFrameDecoder::<AlertEvent>::default();
        let report = decoder.push_chunk(stream.as_bytes());
        assert_eq!(report.frames.len(), 1);
        assert!(report.errors.is_empty());
        assert_eq!(decoder.last_event_id(), Some("77"));
        assert_eq!(decoder.retry_hint(), Some(Duration::from_millis(2500)));
    }

    #[test]
    fn multiline_data_is_joined_before_parsing() {
        let stream = "data: {\"id\": 5,\ndata:  \"severity\": \"low\"}\n\n";
        let mut decoder = SseFrameDecoder::<AlertEvent>::default();
        let report = decoder.push_chunk(stream.as_bytes());
        assert_eq!(report.frames.len(), 1);
        assert_eq!(report.frames[0].severity_label, "low");
    }

    #[test]
    fn decoder_recovers_after_invalid_encoding_and_bad_json() {
        let mut chunk = Vec::new();
        chunk.extend_from_slice(format!("data: {}\n\n", alert_json(1)).as_bytes());
        chunk.extend_from_slice(b"data: {\"id\": \"\xff\xfe\"}\n\n");
        chunk.extend_from_slice(b"data: {\"not\": \n\n");
        chunk.extend_from_slice(format!("data: {}\n\n", alert_json(3)).as_bytes());

        let mut decoder = SseFrameDecoder::<AlertEvent>::default();
        let report = decoder.push_chunk(&chunk);
        assert_eq!(report.frames.len(), 2);
        assert_eq!(report.errors.len(), 2);
        assert!(matches!(report.errors[0], FrameError::Encoding(_)));
        assert!(matches!(report.errors[1], FrameError::Decode(_)));
        assert_eq!(report.frames[1].id, "3");
    }

    #[test]
    fn decoder_rejects_oversized_frame_and_continues() {
        let oversized = format!("data: {{\"blob\":\"{}\"}}\n\n", "x".repeat(2_000));
        let valid = format!("data: {}\n\n", alert_json(4));

        let mut decoder = SseFrameDecoder::<AlertEvent>::new(1_024);
        let report = decoder.decode_all([oversized.as_bytes(), valid.as_bytes()]);
        assert_eq!(report.frames.len(), 1);
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(
            report.errors[0],
            FrameError::OversizedFrame { .. }
        ));
    }

    #[test]
    fn unterminated_buffer_beyond_limit_is_discarded() {
        let runaway = format!("data: {}", "y".repeat(600));
        let mut decoder = SseFrameDecoder::<AlertEvent>::new(512);
        let report = decoder.push_chunk(runaway.as_bytes());
        assert!(matches!(
            report.errors[0],
            FrameError::OversizedBuffer { .. }
        ));
        assert!(decoder.finish().frames.is_empty());
    }

    #[test]
    fn encoded_frame_is_decodable_and_finish_flushes_tail() {
        let event: AlertEvent = serde_json::from_str(&alert_json(6)).expect("fixture");
        let frame = encode_event_frame(&event, DEFAULT_MAX_FRAME_BYTES).expect("encode");
        assert!(frame.starts_with(b"data: "));
        assert!(frame.ends_with(b"\n\n"));

        let mut decoder = SseFrameDecoder::<AlertEvent>::default();
        let trimmed = &frame[..frame.len() - 1];
        assert!(decoder.push_chunk(trimmed).frames.is_empty());
        let tail = decoder.finish();
        assert_eq!(tail.frames, vec![event]);
    }
}
