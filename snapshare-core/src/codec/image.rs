//! Image format sniffing by header magic.
//!
//! Binary payloads travel without an envelope, so the receiver tells them
//! apart from text frames by looking at the first bytes. A frame only counts
//! as an image when it is strictly longer than the magic it matched.

use serde::{Deserialize, Serialize};
use std::fmt;

const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
const GIF87_MAGIC: &[u8] = b"GIF87a";
const GIF89_MAGIC: &[u8] = b"GIF89a";
const TIFF_LE_MAGIC: &[u8] = &[b'I', b'I', 0x2A, 0x00];
const TIFF_BE_MAGIC: &[u8] = &[b'M', b'M', 0x00, 0x2A];
const BMP_MAGIC: &[u8] = b"BM";

/// BMP file header (14) plus the DIB header size field (4)
const BMP_MIN_LEN: usize = 18;
const BMP_DIB_HEADER_SIZES: &[u32] = &[12, 40, 52, 56, 64, 108, 124];

/// ISO-BMFF: box size (4) + "ftyp" (4) + major brand (4)
const FTYP_MIN_LEN: usize = 12;
const HEIF_BRANDS: &[&[u8; 4]] = &[b"heic", b"heix", b"hevc", b"hevx", b"mif1", b"msf1"];
const AVIF_BRANDS: &[&[u8; 4]] = &[b"avif", b"avis"];

/// Image formats recognised as binary payload frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    WebP,
    Bmp,
    Tiff,
    Heif,
    Avif,
}

impl ImageFormat {
    /// Identify the image format of `bytes`, if any
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if longer_than(bytes, PNG_MAGIC) {
            return Some(ImageFormat::Png);
        }
        if longer_than(bytes, JPEG_MAGIC) {
            return Some(ImageFormat::Jpeg);
        }
        if longer_than(bytes, GIF87_MAGIC) || longer_than(bytes, GIF89_MAGIC) {
            return Some(ImageFormat::Gif);
        }
        if longer_than(bytes, TIFF_LE_MAGIC) || longer_than(bytes, TIFF_BE_MAGIC) {
            return Some(ImageFormat::Tiff);
        }
        if bytes.len() > 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            return Some(ImageFormat::WebP);
        }
        if is_bmp(bytes) {
            return Some(ImageFormat::Bmp);
        }
        sniff_iso_bmff(bytes)
    }

    /// Conventional file extension, without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Gif => "gif",
            ImageFormat::WebP => "webp",
            ImageFormat::Bmp => "bmp",
            ImageFormat::Tiff => "tiff",
            ImageFormat::Heif => "heic",
            ImageFormat::Avif => "avif",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Gif => "image/gif",
            ImageFormat::WebP => "image/webp",
            ImageFormat::Bmp => "image/bmp",
            ImageFormat::Tiff => "image/tiff",
            ImageFormat::Heif => "image/heif",
            ImageFormat::Avif => "image/avif",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

fn longer_than(bytes: &[u8], magic: &[u8]) -> bool {
    bytes.len() > magic.len() && bytes.starts_with(magic)
}

fn is_bmp(bytes: &[u8]) -> bool {
    if bytes.len() <= BMP_MIN_LEN || !bytes.starts_with(BMP_MAGIC) {
        return false;
    }
    let dib = u32::from_le_bytes([bytes[14], bytes[15], bytes[16], bytes[17]]);
    BMP_DIB_HEADER_SIZES.contains(&dib)
}

fn sniff_iso_bmff(bytes: &[u8]) -> Option<ImageFormat> {
    if bytes.len() <= FTYP_MIN_LEN || &bytes[4..8] != b"ftyp" {
        return None;
    }
    let brand = &bytes[8..12];
    if HEIF_BRANDS.iter().any(|b| b.as_slice() == brand) {
        Some(ImageFormat::Heif)
    } else if AVIF_BRANDS.iter().any(|b| b.as_slice() == brand) {
        Some(ImageFormat::Avif)
    } else {
        None
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_known_formats() {
        assert_eq!(ImageFormat::sniff(&samples::png()), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::sniff(&samples::jpeg()), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::sniff(&samples::gif()), Some(ImageFormat::Gif));
        assert_eq!(ImageFormat::sniff(&samples::webp()), Some(ImageFormat::WebP));
        assert_eq!(ImageFormat::sniff(&samples::bmp()), Some(ImageFormat::Bmp));
        assert_eq!(ImageFormat::sniff(&samples::heic()), Some(ImageFormat::Heif));
    }

    #[test]
    fn test_sniff_tiff_both_byte_orders() {
        assert_eq!(
            ImageFormat::sniff(&[b'I', b'I', 0x2A, 0x00, 8, 0, 0, 0]),
            Some(ImageFormat::Tiff)
        );
        assert_eq!(
            ImageFormat::sniff(&[b'M', b'M', 0x00, 0x2A, 0, 0, 0, 8]),
            Some(ImageFormat::Tiff)
        );
    }

    #[test]
    fn test_sniff_avif_brand() {
        let mut bytes = vec![0, 0, 0, 28];
        bytes.extend_from_slice(b"ftypavif");
        bytes.extend_from_slice(&[0; 8]);
        assert_eq!(ImageFormat::sniff(&bytes), Some(ImageFormat::Avif));
    }

    #[test]
    fn test_magic_alone_is_not_an_image() {
        assert_eq!(ImageFormat::sniff(PNG_MAGIC), None);
        assert_eq!(ImageFormat::sniff(JPEG_MAGIC), None);
        assert_eq!(ImageFormat::sniff(b""), None);
    }

    #[test]
    fn test_text_is_not_an_image() {
        assert_eq!(ImageFormat::sniff(b"textMessage;Alice;hi"), None);
        assert_eq!(ImageFormat::sniff(b"BM but not a bitmap header"), None);
        assert_eq!(ImageFormat::sniff(b"RIFF1234WAVEfmt "), None);
    }

    #[test]
    fn test_extension_and_mime() {
        assert_eq!(ImageFormat::Jpeg.extension(), "jpg");
        assert_eq!(ImageFormat::Png.mime_type(), "image/png");
        assert_eq!(ImageFormat::Heif.to_string(), "image/heif");
    }
}
