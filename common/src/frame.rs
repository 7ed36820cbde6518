/// A single camera frame.
///
/// The payload is the encoded image exactly as the source delivered it (JPEG for
/// the HTTP sources). Width and height are probed from the JPEG header when one is
/// present and left at zero otherwise. A frame with no payload is "empty": sources
/// return it to mean "nothing this attempt".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Unix millis at which the source finished reading the frame.
    pub captured_at_ms: i64,
    /// Per-source capture sequence number.
    pub seq: u64,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            data,
            width,
            height,
            captured_at_ms,
            seq,
        }
    }

    /// Wrap a JPEG payload, reading its dimensions from the SOF header.
    pub fn from_jpeg(data: Vec<u8>, captured_at_ms: i64, seq: u64) -> Self {
        let (width, height) = jpeg_dimensions(&data).unwrap_or((0, 0));
        Self::new(data, width, height, captured_at_ms, seq)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn payload_size(&self) -> usize {
        self.data.len()
    }

    pub fn is_jpeg(&self) -> bool {
        self.data.starts_with(&[0xFF, 0xD8])
    }

    pub fn extension(&self) -> &'static str {
        if self.is_jpeg() {
            "jpg"
        } else {
            "bin"
        }
    }

    /// Generate a dated object key for storage.
    pub fn object_key(&self, prefix: &str) -> String {
        let dt = chrono::DateTime::from_timestamp_millis(self.captured_at_ms)
            .unwrap_or_else(chrono::Utc::now);
        let date = dt.format("%Y-%m-%d");
        let ts = dt.format("%Y%m%dT%H%M%S%3fZ");
        format!(
            "{prefix}{date}/{ts}_{seq:06}.{ext}",
            seq = self.seq,
            ext = self.extension()
        )
    }
}

/// Read `(width, height)` from the first SOF segment of a JPEG without decoding it.
pub fn jpeg_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    if !data.starts_with(&[0xFF, 0xD8]) {
        return None;
    }

    let mut pos = 2;
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            return None;
        }
        let marker = data[pos + 1];
        match marker {
            // Fill byte before a marker
            0xFF => {
                pos += 1;
                continue;
            }
            // Standalone markers carry no length
            0x01 | 0xD0..=0xD7 => {
                pos += 2;
                continue;
            }
            // Scan data or end of image before any frame header
            0xD9 | 0xDA => return None,
            _ => {}
        }

        let len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        if len < 2 {
            return None;
        }

        // C4 (DHT), C8 (JPG) and CC (DAC) share the range but are not frame headers.
        let is_sof = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            // [precision:1][height:2][width:2]
            let header = data.get(pos + 4..pos + 9)?;
            let height = u16::from_be_bytes([header[1], header[2]]) as u32;
            let width = u16::from_be_bytes([header[3], header[4]]) as u32;
            return Some((width, height));
        }

        pos += 2 + len;
    }
    None
}

/// Name of the `index`-th frame read from a source with the given stem.
pub fn frame_name(stem: &str, index: u64) -> String {
    format!("{stem}_{index:012}")
}

/// Short filesystem-safe stem for a source identifier.
///
/// `http://10.0.0.5:8080/video.cgi?x.mjpeg` becomes `video`; a bare host such as
/// `http://cam.local/` becomes `cam_local`.
pub fn source_stem(identifier: &str) -> String {
    let without_query = identifier.split(['?', '#']).next().unwrap_or_default();
    let without_scheme = without_query
        .split_once("://")
        .map_or(without_query, |(_, rest)| rest);
    let trimmed = without_scheme.trim_end_matches('/');

    let stem = match trimmed.rsplit_once('/') {
        Some((_, last)) => last.rsplit_once('.').map_or(last, |(stem, _)| stem),
        None => trimmed,
    };

    let sanitized: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() {
        "camera".into()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// SOI, a 2-byte APP0 segment, then a baseline SOF0 for 640x480.
    fn tiny_jpeg() -> Vec<u8> {
        vec![
            0xFF, 0xD8, // SOI
            0xFF, 0xE0, 0x00, 0x04, 0x4A, 0x46, // APP0
            0xFF, 0xC0, 0x00, 0x0B, 0x08, 0x01, 0xE0, 0x02, 0x80, 0x01, 0x01, 0x11, 0x00,
            0xFF, 0xD9, // EOI
        ]
    }

    #[test]
    fn empty_frame_is_empty() {
        assert!(Frame::empty().is_empty());
        assert!(!Frame::new(vec![1], 0, 0, 0, 0).is_empty());
    }

    #[test]
    fn jpeg_dimensions_from_sof() {
        assert_eq!(jpeg_dimensions(&tiny_jpeg()), Some((640, 480)));
    }

    #[test]
    fn jpeg_dimensions_skips_fill_bytes() {
        let mut data = tiny_jpeg();
        data.insert(2, 0xFF);
        assert_eq!(jpeg_dimensions(&data), Some((640, 480)));
    }

    #[test]
    fn jpeg_dimensions_rejects_non_jpeg() {
        assert_eq!(jpeg_dimensions(b"not a jpeg"), None);
        assert_eq!(jpeg_dimensions(&[0xFF, 0xD8, 0xFF, 0xDA, 0x00, 0x02]), None);
        // Truncated inside the frame header
        assert_eq!(jpeg_dimensions(&tiny_jpeg()[..14]), None);
    }

    #[test]
    fn from_jpeg_fills_dimensions() {
        let frame = Frame::from_jpeg(tiny_jpeg(), 1708300000000, 3);
        assert_eq!((frame.width, frame.height), (640, 480));
        assert!(frame.is_jpeg());
        assert_eq!(frame.extension(), "jpg");

        let garbage = Frame::from_jpeg(vec![1, 2, 3], 0, 0);
        assert_eq!((garbage.width, garbage.height), (0, 0));
        assert_eq!(garbage.extension(), "bin");
    }

    #[test]
    fn object_key_jpeg() {
        let frame = Frame::from_jpeg(tiny_jpeg(), 1708300000000, 7);
        let key = frame.object_key("frames/");
        assert!(key.starts_with("frames/2024-02-18/"));
        assert!(key.ends_with("_000007.jpg"));
    }

    #[test]
    fn frame_names_are_zero_padded() {
        assert_eq!(frame_name("video", 0), "video_000000000000");
        assert_eq!(frame_name("video", 42), "video_000000000042");
    }

    #[test]
    fn source_stems() {
        assert_eq!(source_stem("http://10.0.0.5:8080/video.cgi?x.mjpeg"), "video");
        assert_eq!(source_stem("http://cam.local/"), "cam_local");
        assert_eq!(source_stem("rtsp://cam/live/main stream"), "main_stream");
        assert_eq!(source_stem(""), "camera");
    }
}
