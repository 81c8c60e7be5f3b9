//! Small helpers shared across modules.

use std::borrow::Cow;

use encoding_rs::Encoding;

/// Get a time-based seed value, nanoseconds since the Unix epoch.
pub fn time_seed_nanos() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(12345)
}

/// Decode bytes to a string, handling archive codepages.
///
/// This function:
/// 1. First tries UTF-8 (handles BOM automatically via encoding_rs)
/// 2. If malformed, uses the hint encoding (usually from the archive LCID)
/// 3. Falls back to Windows-1252, the codepage of most English help files
///
/// Uses `Cow<str>` to avoid allocation when the input is valid UTF-8.
///
/// ```ignore
/// let text = decode_text(b"Contents", None);
/// assert_eq!(text, "Contents");
/// ```
pub fn decode_text<'a>(bytes: &'a [u8], hint: Option<&'static Encoding>) -> Cow<'a, str> {
    let (result, _encoding, malformed) = encoding_rs::UTF_8.decode(bytes);
    if !malformed {
        return result;
    }

    let encoding = hint.unwrap_or(encoding_rs::WINDOWS_1252);
    let (result, _, _) = encoding.decode(bytes);
    result
}

// ============================================================================
// Media Format Detection
// ============================================================================

/// Content kinds found inside help archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFormat {
    Html,
    Css,
    JavaScript,
    Text,
    Xml,
    Jpeg,
    Png,
    Gif,
    Bmp,
    Ico,
    Svg,
    /// Unknown/binary format
    Binary,
}

impl MediaFormat {
    /// Get the MIME type string for this format.
    pub fn mime_type(self) -> &'static str {
        match self {
            MediaFormat::Html => "text/html",
            MediaFormat::Css => "text/css",
            MediaFormat::JavaScript => "text/javascript",
            MediaFormat::Text => "text/plain",
            MediaFormat::Xml => "text/xml",
            MediaFormat::Jpeg => "image/jpeg",
            MediaFormat::Png => "image/png",
            MediaFormat::Gif => "image/gif",
            MediaFormat::Bmp => "image/bmp",
            MediaFormat::Ico => "image/x-icon",
            MediaFormat::Svg => "image/svg+xml",
            MediaFormat::Binary => "application/octet-stream",
        }
    }

    pub fn is_image(self) -> bool {
        matches!(
            self,
            MediaFormat::Jpeg
                | MediaFormat::Png
                | MediaFormat::Gif
                | MediaFormat::Bmp
                | MediaFormat::Ico
                | MediaFormat::Svg
        )
    }
}

/// Detect content format from the extension of an internal path, then from
/// magic bytes.
pub fn detect_media_format(path: &str, data: &[u8]) -> MediaFormat {
    let ext = path
        .rsplit_once('.')
        .filter(|(_, ext)| !ext.contains('/'))
        .map(|(_, ext)| ext.to_ascii_lowercase());

    if let Some(ext) = ext.as_deref() {
        let format = match ext {
            "htm" | "html" | "xhtml" | "hhc" | "hhk" => Some(MediaFormat::Html),
            "css" => Some(MediaFormat::Css),
            "js" => Some(MediaFormat::JavaScript),
            "txt" => Some(MediaFormat::Text),
            "xml" => Some(MediaFormat::Xml),
            "jpg" | "jpeg" => Some(MediaFormat::Jpeg),
            "png" => Some(MediaFormat::Png),
            "gif" => Some(MediaFormat::Gif),
            "bmp" => Some(MediaFormat::Bmp),
            "ico" => Some(MediaFormat::Ico),
            "svg" => Some(MediaFormat::Svg),
            _ => None,
        };
        if let Some(format) = format {
            return format;
        }
    }

    match data {
        [0xFF, 0xD8, 0xFF, ..] => MediaFormat::Jpeg,
        [0x89, b'P', b'N', b'G', ..] => MediaFormat::Png,
        [b'G', b'I', b'F', b'8', ..] => MediaFormat::Gif,
        [b'B', b'M', ..] => MediaFormat::Bmp,
        _ => MediaFormat::Binary,
    }
}
