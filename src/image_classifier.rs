use std::{fmt, fs::File, io::Read, path::Path};

/// Bytes needed before any signature is trusted.
pub const MIN_HEADER_LEN: usize = 12;

const JPG: &[u8] = &[0xFF, 0xD8, 0xFF];
const PNG: &[u8] = &[0x89, 0x50, 0x4E, 0x47];
const BMP: &[u8] = &[0x42, 0x4D];
const TIFF_II: &[u8] = &[0x49, 0x49, 0x2A, 0x00];
const TIFF_MM: &[u8] = &[0x4D, 0x4D, 0x00, 0x2A];
const RIFF: &[u8] = b"RIFF";
const WEBP: &[u8] = b"WEBP";
const FTYP: &[u8] = b"ftyp";

const HEIC_BRANDS: &[&str] = &["heic", "heix", "mif1", "msf1"];
const AVIF_BRANDS: &[&str] = &["avif", "avis"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Jpg,
    Png,
    Bmp,
    Tiff,
    Webp,
    Heic,
    Avif,
    Unknown,
}

impl ImageFormat {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Jpg => "jpg",
            Self::Png => "png",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
            Self::Webp => "webp",
            Self::Heic => "heic",
            Self::Avif => "avif",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpg),
            "png" => Some(Self::Png),
            "bmp" => Some(Self::Bmp),
            "tif" | "tiff" => Some(Self::Tiff),
            "webp" => Some(Self::Webp),
            "heic" | "heif" => Some(Self::Heic),
            "avif" => Some(Self::Avif),
            _ => None,
        }
    }

    /// File extension used when the payload is stored verbatim.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Unknown => "bin",
            other => other.tag(),
        }
    }

    /// Natively displayable as a desktop or lock-screen image.
    pub fn is_safe(self) -> bool {
        matches!(self, Self::Jpg | Self::Png | Self::Bmp | Self::Tiff)
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// How the pipeline may treat a classified payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatClass {
    Safe,
    Extra,
    Rejected,
}

/// Operator-enabled formats beyond the safe set (`ExtraFormat` key).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraFormats(Vec<ImageFormat>);

impl ExtraFormats {
    /// Accepts comma, semicolon or space separated tags; unknown tags are ignored.
    pub fn parse(raw: &str) -> Self {
        let mut formats = Vec::new();
        for part in raw.split([',', ';', ' ']).filter(|p| !p.trim().is_empty()) {
            if let Some(format) = ImageFormat::from_tag(part) {
                if format != ImageFormat::Unknown && !formats.contains(&format) {
                    formats.push(format);
                }
            }
        }
        Self(formats)
    }

    pub fn contains(&self, format: ImageFormat) -> bool {
        self.0.contains(&format)
    }
}

pub fn classify(data: &[u8]) -> ImageFormat {
    if data.len() < MIN_HEADER_LEN {
        return ImageFormat::Unknown;
    }

    if data.starts_with(JPG) {
        return ImageFormat::Jpg;
    }
    if data.starts_with(PNG) {
        return ImageFormat::Png;
    }
    if data.starts_with(BMP) {
        return ImageFormat::Bmp;
    }
    if data.starts_with(TIFF_II) || data.starts_with(TIFF_MM) {
        return ImageFormat::Tiff;
    }
    if data.starts_with(RIFF) && &data[8..12] == WEBP {
        return ImageFormat::Webp;
    }

    // ISO base media: size(4) 'ftyp' brand(4)
    if &data[4..8] == FTYP {
        let brand = String::from_utf8_lossy(&data[8..12]).to_ascii_lowercase();
        if HEIC_BRANDS.contains(&brand.as_str()) {
            return ImageFormat::Heic;
        }
        if AVIF_BRANDS.contains(&brand.as_str()) {
            return ImageFormat::Avif;
        }
    }

    ImageFormat::Unknown
}

/// Classifies the first bytes of a file; unreadable or short files are `Unknown`.
pub fn classify_file(path: &Path) -> ImageFormat {
    let mut header = [0u8; MIN_HEADER_LEN];
    let Ok(mut file) = File::open(path) else {
        return ImageFormat::Unknown;
    };
    match file.read_exact(&mut header) {
        Ok(()) => classify(&header),
        Err(_) => ImageFormat::Unknown,
    }
}

pub fn format_class(format: ImageFormat, extra: &ExtraFormats) -> FormatClass {
    if format == ImageFormat::Unknown {
        FormatClass::Rejected
    } else if format.is_safe() {
        FormatClass::Safe
    } else if extra.contains(format) {
        FormatClass::Extra
    } else {
        FormatClass::Rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn padded(prefix: &[u8]) -> Vec<u8> {
        let mut data = prefix.to_vec();
        data.resize(16, 0);
        data
    }

    #[test]
    fn known_signatures_are_recognised() {
        assert_eq!(classify(&padded(&[0xFF, 0xD8, 0xFF, 0xE0])), ImageFormat::Jpg);
        assert_eq!(classify(&padded(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A])), ImageFormat::Png);
        assert_eq!(classify(&padded(b"BM")), ImageFormat::Bmp);
        assert_eq!(classify(&padded(&[0x49, 0x49, 0x2A, 0x00])), ImageFormat::Tiff);
        assert_eq!(classify(&padded(&[0x4D, 0x4D, 0x00, 0x2A])), ImageFormat::Tiff);
        assert_eq!(classify(&padded(b"RIFF\x24\x00\x00\x00WEBPVP8 ")), ImageFormat::Webp);
        assert_eq!(classify(&padded(b"\x00\x00\x00\x18ftypheic")), ImageFormat::Heic);
        assert_eq!(classify(&padded(b"\x00\x00\x00\x18ftypmif1")), ImageFormat::Heic);
        assert_eq!(classify(&padded(b"\x00\x00\x00\x1cftypavif")), ImageFormat::Avif);
    }

    #[test]
    fn short_or_unmatched_buffers_are_unknown() {
        assert_eq!(classify(&[0xFF, 0xD8, 0xFF]), ImageFormat::Unknown);
        assert_eq!(classify(&[]), ImageFormat::Unknown);
        assert_eq!(classify(b"<html><body>404</body></html>"), ImageFormat::Unknown);
        assert_eq!(classify(&padded(b"RIFF\x24\x00\x00\x00WAVE")), ImageFormat::Unknown);
        assert_eq!(classify(&padded(b"\x00\x00\x00\x18ftypisom")), ImageFormat::Unknown);
    }

    #[test]
    fn extra_formats_parse_mixed_separators() {
        let extra = ExtraFormats::parse(" webp;HEIC, avif  bogus");
        assert!(extra.contains(ImageFormat::Webp));
        assert!(extra.contains(ImageFormat::Heic));
        assert!(extra.contains(ImageFormat::Avif));
        assert!(!extra.contains(ImageFormat::Jpg));
        assert_eq!(ExtraFormats::parse(""), ExtraFormats::default());
    }

    #[test]
    fn format_class_respects_extra_set() {
        let none = ExtraFormats::default();
        let webp = ExtraFormats::parse("webp");

        assert_eq!(format_class(ImageFormat::Png, &none), FormatClass::Safe);
        assert_eq!(format_class(ImageFormat::Webp, &none), FormatClass::Rejected);
        assert_eq!(format_class(ImageFormat::Webp, &webp), FormatClass::Extra);
        assert_eq!(format_class(ImageFormat::Unknown, &webp), FormatClass::Rejected);
    }

    #[test]
    fn classify_file_reads_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wp1.png");
        std::fs::write(&path, padded(&[0x89, b'P', b'N', b'G'])).unwrap();
        assert_eq!(classify_file(&path), ImageFormat::Png);
        assert_eq!(classify_file(&dir.path().join("missing.jpg")), ImageFormat::Unknown);
    }
}
