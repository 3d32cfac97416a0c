use std::{
    fs::File,
    io::{BufRead, BufReader, Seek},
    path::Path,
};

use crate::MetadataInfo;

const FLAGGED_SCORE: f64 = 1.0;
const CLEAN_SCORE: f64 = 0.1;

/// Outcome of reading embedded metadata. A file without readable EXIF is a
/// normal outcome, not an error.
pub enum MetadataRead {
    Available(exif::Exif),
    Unavailable(String),
}

pub struct ExifExtractor;

impl ExifExtractor {
    pub fn read<P: AsRef<Path>>(path: P) -> MetadataRead {
        match File::open(&path) {
            Ok(file) => Self::read_from(&mut BufReader::new(file)),
            Err(e) => MetadataRead::Unavailable(e.to_string()),
        }
    }

    pub fn read_from<R: BufRead + Seek>(reader: &mut R) -> MetadataRead {
        match exif::Reader::new().read_from_container(reader) {
            Ok(exif_data) => MetadataRead::Available(exif_data),
            Err(e) => MetadataRead::Unavailable(e.to_string()),
        }
    }

    pub fn software(exif: &exif::Exif) -> Option<String> {
        let field = exif.get_field(exif::Tag::Software, exif::In::PRIMARY)?;

        let software = match field.value {
            exif::Value::Ascii(ref parts) => parts
                .iter()
                .map(|bytes| String::from_utf8_lossy(bytes).to_string())
                .collect::<Vec<_>>()
                .join(" "),
            _ => field.display_value().to_string(),
        };

        let software = software.trim_matches(|c: char| c == '\0' || c.is_whitespace());
        if software.is_empty() {
            None
        } else {
            Some(software.to_string())
        }
    }
}

/// Flags editing tools named in the EXIF software tag.
pub struct MetadataInspector {
    suspicious_software: Vec<String>,
}

impl MetadataInspector {
    pub fn new<S: AsRef<str>>(suspicious_software: &[S]) -> Self {
        Self {
            suspicious_software: suspicious_software
                .iter()
                .map(|s| s.as_ref().to_string())
                .collect(),
        }
    }

    /// Reads metadata from the raw file at `path`, never from decoded pixels.
    pub fn inspect<P: AsRef<Path>>(&self, path: P) -> MetadataInfo {
        match ExifExtractor::read(&path) {
            MetadataRead::Available(exif_data) => self.evaluate(&exif_data),
            MetadataRead::Unavailable(reason) => {
                log::warn!("no metadata in {}: {reason}", path.as_ref().display());
                MetadataInfo::default()
            }
        }
    }

    pub fn evaluate(&self, exif_data: &exif::Exif) -> MetadataInfo {
        let has_metadata = exif_data.fields().next().is_some();
        let software_tag = ExifExtractor::software(exif_data);

        let flags = match software_tag {
            Some(ref sw) => self.flags_for(sw),
            None => Vec::new(),
        };

        let score = if !flags.is_empty() {
            FLAGGED_SCORE
        } else if has_metadata {
            CLEAN_SCORE
        } else {
            0.0
        };

        MetadataInfo {
            has_metadata,
            software_tag,
            flags,
            score,
        }
    }

    fn flags_for(&self, software: &str) -> Vec<String> {
        let sw_lower = software.to_lowercase();

        self.suspicious_software
            .iter()
            .filter(|s| sw_lower.contains(&s.to_lowercase()))
            .map(|s| format!("Software mentions {s}"))
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Cursor;

    use image::{Rgb, RgbImage};

    use super::*;

    /// Minimal little-endian TIFF block holding a single Software tag.
    fn exif_payload(software: &str) -> Vec<u8> {
        let mut tiff = Vec::new();
        tiff.extend_from_slice(b"II");
        tiff.extend_from_slice(&42u16.to_le_bytes());
        tiff.extend_from_slice(&8u32.to_le_bytes());
        tiff.extend_from_slice(&1u16.to_le_bytes());
        tiff.extend_from_slice(&0x0131u16.to_le_bytes());
        tiff.extend_from_slice(&2u16.to_le_bytes());
        tiff.extend_from_slice(&(software.len() as u32 + 1).to_le_bytes());
        tiff.extend_from_slice(&26u32.to_le_bytes());
        tiff.extend_from_slice(&0u32.to_le_bytes());
        tiff.extend_from_slice(software.as_bytes());
        tiff.push(0);
        tiff
    }

    pub(crate) fn jpeg_with_software(software: &str) -> Vec<u8> {
        let mut jpeg = Vec::new();
        let image = RgbImage::from_pixel(16, 16, Rgb([120, 80, 40]));
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 90)
            .encode_image(&image)
            .unwrap();

        let tiff = exif_payload(software);
        let mut app1 = vec![0xFF, 0xE1];
        app1.extend_from_slice(&((2 + 6 + tiff.len()) as u16).to_be_bytes());
        app1.extend_from_slice(b"Exif\0\0");
        app1.extend_from_slice(&tiff);

        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(&app1);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    fn inspector() -> MetadataInspector {
        MetadataInspector::new(&["photoshop", "gimp", "snapseed"])
    }

    fn evaluate_bytes(bytes: Vec<u8>) -> MetadataInfo {
        match ExifExtractor::read_from(&mut Cursor::new(bytes)) {
            MetadataRead::Available(exif_data) => inspector().evaluate(&exif_data),
            MetadataRead::Unavailable(reason) => panic!("expected metadata: {reason}"),
        }
    }

    #[test]
    fn test_software_tag_flagged_case_insensitive() {
        let info = evaluate_bytes(jpeg_with_software("Adobe PhotoShop CC 2019"));
        assert!(info.has_metadata);
        assert_eq!(info.software_tag.as_deref(), Some("Adobe PhotoShop CC 2019"));
        assert_eq!(info.flags, vec!["Software mentions photoshop".to_string()]);
        assert_eq!(info.score, 1.0);
    }

    #[test]
    fn test_one_flag_per_matching_substring() {
        let info = evaluate_bytes(jpeg_with_software("GIMP export via Snapseed"));
        assert_eq!(info.flags.len(), 2);
        assert_eq!(info.flags[0], "Software mentions gimp");
        assert_eq!(info.flags[1], "Software mentions snapseed");
    }

    #[test]
    fn test_clean_metadata_scores_low() {
        let info = evaluate_bytes(jpeg_with_software("Camera Firmware 1.02"));
        assert!(info.has_metadata);
        assert!(info.flags.is_empty());
        assert_eq!(info.score, 0.1);
    }

    #[test]
    fn test_missing_metadata_is_unavailable() {
        let mut png = Vec::new();
        RgbImage::new(4, 4)
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        assert!(matches!(
            ExifExtractor::read_from(&mut Cursor::new(png)),
            MetadataRead::Unavailable(_)
        ));
    }

    #[test]
    fn test_unreadable_file_scores_zero() {
        let info = inspector().inspect("/nonexistent/claim.jpg");
        assert_eq!(info, MetadataInfo::default());
        assert_eq!(info.score, 0.0);
    }
}
