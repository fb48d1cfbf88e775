// crates/oracle-server/src/llm/sse.rs
// Incremental server-sent-events decoder for streaming chat responses
//
// Byte chunks from the transport split at arbitrary boundaries; the
// decoder buffers until a complete line is available and yields the data
// payload of each `data:` line.

/// One decoded SSE frame
#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    pub data: String,
}

impl SseFrame {
    /// The `[DONE]` sentinel many OpenAI-compatible endpoints send last
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }

    /// Parse the payload as JSON, ignoring malformed frames
    pub fn try_parse<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        serde_json::from_str(&self.data).ok()
    }
}

/// Stateful line-oriented decoder
#[derive(Default)]
pub struct SseDecoder {
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a transport chunk; returns every frame completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut frames = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(data) = line.strip_prefix("data:") {
                frames.push(SseFrame {
                    data: data.trim_start().to_string(),
                });
            }
            // Comment lines (":") and event/id fields are ignored
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_frame() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"data: {\"x\":1}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "{\"x\":1}");
    }

    #[test]
    fn test_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"par").is_empty());
        let frames = decoder.push(b"tial\":true}\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "{\"partial\":true}");
    }

    #[test]
    fn test_multiple_frames_one_chunk() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"data: a\n\ndata: b\n\ndata: [DONE]\n\n");
        assert_eq!(frames.len(), 3);
        assert!(frames[2].is_done());
    }

    #[test]
    fn test_ignores_comments_and_events() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b": keepalive\nevent: ping\ndata: x\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "x");
    }

    #[test]
    fn test_crlf_line_endings() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"data: y\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "y");
    }

    #[test]
    fn test_try_parse_malformed_is_none() {
        let frame = SseFrame {
            data: "{not json".into(),
        };
        assert!(frame.try_parse::<serde_json::Value>().is_none());
    }
}
