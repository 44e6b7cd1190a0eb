//! Embedded Metadata Extraction
//!
//! Reads EXIF / TIFF tags from an in-memory image buffer and derives the
//! human-facing camera fields the editor shows next to a photo.
//!
//! ## Parse Strategy
//!
//! 1. **RAW names** - the buffer is parsed as a bare TIFF structure so IFD0,
//!    the Exif/GPS sub-IFDs and IFD1 (thumbnail) are all visible. ORF and
//!    RW2 swap the TIFF magic for a vendor one; a patched copy is parsed
//! 2. **LibRaw fill** - when the bytes sniff as a RAW container, LibRaw's
//!    decoded make, lens, exposure, date and GPS fill the gaps in the primary
//!    set. This is the only source for RAF and CR3, and for maker-note-only
//!    fields elsewhere. TIFF values win
//! 3. **RAW retry** - if both yield nothing, parse once more with the
//!    container auto-detection defaults
//! 4. **Everything else** - container auto-detection (JPEG, PNG, WebP, HEIF)
//!
//! Metadata is enrichment: every failure collapses to an empty
//! [`ExtractedMetadata`], nothing is propagated.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rawmint::metadata::extract_metadata;
//!
//! let bytes = std::fs::read("IMG_0001.CR2")?;
//! let meta = extract_metadata(&bytes, "IMG_0001.CR2");
//! println!("Camera: {:?} {:?}", meta.camera_make, meta.camera_model);
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::Cursor;
use tracing::debug;

use crate::formats::{classify, sniff_raw_container, RawContainer};
use crate::raw::{read_camera_info, CameraInfo};

// ============================================================================
// Tag Model
// ============================================================================

/// Decoded value of a single tag
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Text(String),
    Number(f64),
    List(Vec<TagValue>),
    /// Opaque bytes (maker notes, thumbnails); never flattened
    Binary(Vec<u8>),
}

impl TagValue {
    fn as_number(&self) -> Option<f64> {
        match self {
            TagValue::Number(n) => Some(*n),
            TagValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn to_display(&self) -> Option<String> {
        match self {
            TagValue::Text(s) => Some(s.clone()),
            TagValue::Number(n) => Some(format_number(*n)),
            _ => None,
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            TagValue::Text(s) => serde_json::Value::String(s.clone()),
            TagValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            TagValue::List(items) => {
                serde_json::Value::Array(items.iter().map(TagValue::to_json).collect())
            }
            TagValue::Binary(_) => serde_json::Value::Null,
        }
    }
}

/// One tag: an optional human-readable rendering plus the decoded value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagEntry {
    pub description: Option<String>,
    pub value: Option<TagValue>,
}

/// Tag name -> entry for one IFD group
pub type TagMap = BTreeMap<String, TagEntry>;

// ============================================================================
// Derived Metadata
// ============================================================================

/// Embedded preview image pulled from the thumbnail IFD
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddedPreview {
    pub base64: String,
    pub mime_type: &'static str,
}

/// Read-only view over one file's primary tag set
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractedMetadata {
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub lens_model: Option<String>,
    pub focal_length: Option<String>,
    /// Decimal degrees, `"lat, lon"`
    pub location: Option<String>,
    pub capture_date: Option<String>,
    pub captured_at: Option<NaiveDateTime>,
    pub exposure_time: Option<String>,
    pub f_number: Option<String>,
    pub iso: Option<String>,
    pub embedded_preview: Option<EmbeddedPreview>,
    pub raw_tag_map: BTreeMap<String, serde_json::Value>,
}

// Precedence chains: first non-empty wins. Vendors fill different subsets.
const CAPTURE_DATE_KEYS: [&str; 5] = [
    "DateTimeOriginal",
    "CreateDate",
    "DateTime",
    "ModifyDate",
    "DateCreated",
];
const EXPOSURE_TIME_KEYS: [&str; 4] = [
    "ExposureTime",
    "ShutterSpeedValue",
    "ExposureTimeValue",
    "ShutterSpeed",
];
const F_NUMBER_KEYS: [&str; 3] = ["FNumber", "Aperture", "ApertureValue"];
const ISO_KEYS: [&str; 4] = ["ISO", "ISOSpeedRatings", "ISOSetting", "ISOValue"];

const THUMBNAIL_KEYS: [&str; 2] = ["thumbnail", "Thumbnail"];
const THUMBNAIL_TYPE_KEYS: [&str; 2] = ["thumbnailType", "ThumbnailType"];

const EXIF_DATE_FORMAT: &str = "%Y:%m:%d %H:%M:%S";
const CAPTURE_DATE_FORMATS: [&str; 3] =
    [EXIF_DATE_FORMAT, "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Undefined-typed payloads larger than this are not rendered as text
const MAX_DESCRIBED_UNDEFINED: usize = 64;

impl ExtractedMetadata {
    /// Derive the display fields from a primary tag set
    pub fn from_tags(tags: &TagMap) -> Self {
        let capture_date = first_of(tags, &CAPTURE_DATE_KEYS);
        let captured_at = capture_date.as_deref().and_then(parse_capture_date);

        Self {
            camera_make: as_string(tags, "Make"),
            camera_model: as_string(tags, "Model"),
            lens_model: as_string(tags, "LensModel"),
            focal_length: as_string(tags, "FocalLength"),
            location: build_location(tags),
            capture_date,
            captured_at,
            exposure_time: first_of(tags, &EXPOSURE_TIME_KEYS),
            f_number: first_of(tags, &F_NUMBER_KEYS),
            iso: first_of(tags, &ISO_KEYS),
            embedded_preview: extract_embedded_preview(tags),
            raw_tag_map: flatten_tags(tags),
        }
    }

    /// Human-readable exposure summary, e.g. `f/2.8 1/250s ISO100 50mm`
    pub fn exposure_summary(&self) -> Option<String> {
        if self.f_number.is_none() && self.exposure_time.is_none() && self.iso.is_none() {
            return None;
        }

        let shutter = parse_shutter_speed(self.exposure_time.as_deref())
            .map(|s| {
                if s >= 1.0 {
                    format!("{:.1}s", s)
                } else if s > 0.0 {
                    format!("1/{:.0}s", 1.0 / s)
                } else {
                    "?".to_string()
                }
            })
            .unwrap_or_else(|| "?".to_string());

        Some(format!(
            "f/{} {} ISO{} {}mm",
            self.f_number.as_deref().unwrap_or("?"),
            shutter,
            self.iso.as_deref().unwrap_or("?"),
            self.focal_length.as_deref().unwrap_or("?"),
        ))
    }
}

// ============================================================================
// Extraction - Main API
// ============================================================================

/// Extract metadata from an image buffer. Never fails.
pub fn extract_metadata(buffer: &[u8], file_name: &str) -> ExtractedMetadata {
    extract_with(buffer, file_name, libraw_camera_info)
}

/// Extraction with the LibRaw lookup supplied by the caller
fn extract_with<F>(buffer: &[u8], file_name: &str, camera_info: F) -> ExtractedMetadata
where
    F: FnOnce(&[u8]) -> Option<CameraInfo>,
{
    let is_raw = classify(file_name).is_raw;

    match read_tag_sets(buffer, is_raw, camera_info).into_iter().next() {
        Some(primary) => ExtractedMetadata::from_tags(&primary),
        None => {
            debug!("No metadata found in {}", file_name);
            ExtractedMetadata::default()
        }
    }
}

fn libraw_camera_info(buffer: &[u8]) -> Option<CameraInfo> {
    match read_camera_info(buffer) {
        Ok(info) => Some(info),
        Err(e) => {
            debug!("LibRaw could not read camera info: {}", e);
            None
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ParseProfile {
    /// Bare TIFF: IFD0, sub-IFDs and IFD1 merged per IFD
    RawTiff,
    /// Container auto-detection with reader defaults
    Container,
}

/// Parse every IFD group, primary first
fn read_tag_sets<F>(buffer: &[u8], is_raw: bool, camera_info: F) -> Vec<TagMap>
where
    F: FnOnce(&[u8]) -> Option<CameraInfo>,
{
    if !is_raw {
        return parse_tag_sets(buffer, ParseProfile::Container);
    }

    let container = sniff_raw_container(buffer);
    let mut sets = parse_tag_sets(&tiff_view(buffer, container), ParseProfile::RawTiff);

    if container.is_some() {
        if let Some(info) = camera_info(buffer) {
            let decoded = camera_tags(&info);
            match sets.first_mut() {
                Some(primary) => {
                    for (key, entry) in decoded {
                        primary.entry(key).or_insert(entry);
                    }
                }
                None if !decoded.is_empty() => sets.push(decoded),
                None => {}
            }
        }
    }

    if !sets.is_empty() {
        return sets;
    }

    debug!("RAW tag parse produced nothing, retrying with container defaults");
    parse_tag_sets(buffer, ParseProfile::Container)
}

/// ORF and RW2 are TIFF with a vendor magic; restore 42 so the parser accepts them
fn tiff_view(buffer: &[u8], container: Option<RawContainer>) -> Cow<'_, [u8]> {
    match container {
        Some(kind) if kind.is_tiff_variant() => {
            let mut patched = buffer.to_vec();
            let magic: [u8; 2] = if patched.starts_with(b"II") {
                [0x2A, 0]
            } else {
                [0, 0x2A]
            };
            patched[2..4].copy_from_slice(&magic);
            Cow::Owned(patched)
        }
        _ => Cow::Borrowed(buffer),
    }
}

/// The IFD1 JPEG of a TIFF-based RAW, read without LibRaw
pub fn embedded_jpeg(buffer: &[u8]) -> Option<Vec<u8>> {
    let container = sniff_raw_container(buffer)?;
    let view = tiff_view(buffer, Some(container));
    let exif_data = exif::Reader::new().read_raw(view.into_owned()).ok()?;
    thumbnail_bytes(&exif_data).filter(|jpeg| jpeg.starts_with(&[0xFF, 0xD8]))
}

/// LibRaw fields under the tag names the TIFF path uses
fn camera_tags(info: &CameraInfo) -> TagMap {
    let mut tags = TagMap::new();
    let mut put = |key: &str, description: String, value: TagValue| {
        tags.insert(
            key.to_string(),
            TagEntry {
                description: Some(description),
                value: Some(value),
            },
        );
    };

    for (key, text) in [
        ("Make", &info.make),
        ("Model", &info.model),
        ("LensMake", &info.lens_make),
        ("LensModel", &info.lens_model),
    ] {
        if !text.is_empty() {
            put(key, text.clone(), TagValue::Text(text.clone()));
        }
    }

    if info.iso > 0 {
        put("ISO", info.iso.to_string(), TagValue::Number(info.iso as f64));
    }
    if info.shutter > 0.0 {
        let seconds = info.shutter as f64;
        let description = if seconds >= 1.0 {
            format_number((seconds * 10.0).round() / 10.0)
        } else {
            format!("1/{}", (1.0 / seconds).round())
        };
        put("ExposureTime", description, TagValue::Number(seconds));
    }
    for (key, n) in [("FNumber", info.aperture), ("FocalLength", info.focal_length)] {
        if n > 0.0 {
            let rounded = (n as f64 * 10.0).round() / 10.0;
            put(key, format_number(rounded), TagValue::Number(rounded));
        }
    }
    if let Some(taken) = info.captured_at {
        let stamp = taken.format(EXIF_DATE_FORMAT).to_string();
        put("DateTimeOriginal", stamp.clone(), TagValue::Text(stamp));
    }
    if let Some((lat, lon)) = info.gps {
        let lat_ref = if lat < 0.0 { "S" } else { "N" };
        let lon_ref = if lon < 0.0 { "W" } else { "E" };
        for (key, degrees, ref_key, hemisphere) in [
            ("GPSLatitude", lat.abs(), "GPSLatitudeRef", lat_ref),
            ("GPSLongitude", lon.abs(), "GPSLongitudeRef", lon_ref),
        ] {
            put(key, format!("{:.6}", degrees), TagValue::Number(degrees));
            put(ref_key, hemisphere.to_string(), TagValue::Text(hemisphere.to_string()));
        }
    }

    tags
}

fn parse_tag_sets(buffer: &[u8], profile: ParseProfile) -> Vec<TagMap> {
    let reader = exif::Reader::new();
    let parsed = match profile {
        ParseProfile::RawTiff => reader.read_raw(buffer.to_vec()),
        ParseProfile::Container => reader.read_from_container(&mut Cursor::new(buffer)),
    };

    match parsed {
        Ok(exif_data) => tag_sets_from_exif(&exif_data),
        Err(e) => {
            debug!("EXIF parse failed ({:?}): {}", profile, e);
            Vec::new()
        }
    }
}

fn tag_sets_from_exif(exif_data: &exif::Exif) -> Vec<TagMap> {
    let mut groups: BTreeMap<u16, TagMap> = BTreeMap::new();

    for field in exif_data.fields() {
        groups
            .entry(field.ifd_num.index())
            .or_default()
            .entry(tag_name(field.tag))
            .or_insert_with(|| entry_for(field));
    }

    let mut sets: Vec<TagMap> = groups.into_values().collect();

    if let (Some(primary), Some(thumbnail)) = (sets.first_mut(), thumbnail_bytes(exif_data)) {
        if let Some(kind) = infer::get(&thumbnail) {
            primary.insert(
                "thumbnailType".to_string(),
                TagEntry {
                    description: Some(kind.mime_type().to_string()),
                    value: None,
                },
            );
        }
        primary.insert(
            "thumbnail".to_string(),
            TagEntry {
                description: None,
                value: Some(TagValue::Binary(thumbnail)),
            },
        );
    }

    sets
}

/// Slice the IFD1 JPEG out of the parsed TIFF buffer
fn thumbnail_bytes(exif_data: &exif::Exif) -> Option<Vec<u8>> {
    let uint = |tag: exif::Tag| {
        exif_data
            .get_field(tag, exif::In::THUMBNAIL)
            .and_then(|f| f.value.get_uint(0))
            .map(|v| v as usize)
    };

    let offset = uint(exif::Tag::JPEGInterchangeFormat)?;
    let length = uint(exif::Tag::JPEGInterchangeFormatLength)?;
    let buf = exif_data.buf();

    if length == 0 || offset.checked_add(length)? > buf.len() {
        return None;
    }
    Some(buf[offset..offset + length].to_vec())
}

/// Tag names follow the common EXIF tool spellings where they differ
fn tag_name(tag: exif::Tag) -> String {
    match tag {
        exif::Tag::PhotographicSensitivity => "ISO".to_string(),
        exif::Tag::DateTimeDigitized => "CreateDate".to_string(),
        other => other.to_string(),
    }
}

fn entry_for(field: &exif::Field) -> TagEntry {
    let value = tag_value(&field.value);
    let description = match &field.value {
        exif::Value::Ascii(_) => value.as_ref().and_then(|v| match v {
            TagValue::Text(s) => Some(s.clone()),
            _ => None,
        }),
        exif::Value::Undefined(bytes, _) if bytes.len() > MAX_DESCRIBED_UNDEFINED => None,
        exif::Value::Unknown(..) => None,
        _ => Some(field.display_value().to_string()),
    };

    TagEntry { description, value }
}

fn tag_value(value: &exif::Value) -> Option<TagValue> {
    use exif::Value as V;

    fn numbers<I: IntoIterator<Item = f64>>(items: I) -> Option<TagValue> {
        collapse(items.into_iter().map(TagValue::Number).collect())
    }

    match value {
        V::Ascii(strings) => collapse(
            strings
                .iter()
                .map(|s| TagValue::Text(decode_ascii(s)))
                .collect(),
        ),
        V::Byte(v) => numbers(v.iter().map(|&n| n as f64)),
        V::Short(v) => numbers(v.iter().map(|&n| n as f64)),
        V::Long(v) => numbers(v.iter().map(|&n| n as f64)),
        V::SByte(v) => numbers(v.iter().map(|&n| n as f64)),
        V::SShort(v) => numbers(v.iter().map(|&n| n as f64)),
        V::SLong(v) => numbers(v.iter().map(|&n| n as f64)),
        V::Float(v) => numbers(v.iter().map(|&n| n as f64)),
        V::Double(v) => numbers(v.iter().copied()),
        V::Rational(v) => numbers(v.iter().map(|r| r.to_f64())),
        V::SRational(v) => numbers(v.iter().map(|r| r.to_f64())),
        V::Undefined(bytes, _) => Some(TagValue::Binary(bytes.clone())),
        _ => None,
    }
}

fn collapse(mut items: Vec<TagValue>) -> Option<TagValue> {
    match items.len() {
        0 => None,
        1 => items.pop(),
        _ => Some(TagValue::List(items)),
    }
}

fn decode_ascii(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches('\0')
        .trim()
        .to_string()
}

// ============================================================================
// Field Derivation
// ============================================================================

/// Render a tag as text: description, else first list element, else scalar
fn as_string(tags: &TagMap, key: &str) -> Option<String> {
    let entry = tags.get(key)?;

    let rendered = match (&entry.description, &entry.value) {
        (Some(description), _) => Some(description.clone()),
        (None, Some(TagValue::List(items))) => items.first().and_then(TagValue::to_display),
        (None, Some(value)) => value.to_display(),
        (None, None) => None,
    };

    rendered.filter(|s| !s.trim().is_empty())
}

fn first_of(tags: &TagMap, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| as_string(tags, key))
}

fn build_location(tags: &TagMap) -> Option<String> {
    let lat = gps_coordinate(tags, "GPSLatitude", "GPSLatitudeRef", 'S')?;
    let lon = gps_coordinate(tags, "GPSLongitude", "GPSLongitudeRef", 'W')?;
    Some(format!("{:.6}, {:.6}", lat, lon))
}

fn gps_coordinate(tags: &TagMap, key: &str, ref_key: &str, negative: char) -> Option<f64> {
    let decimal = match tags.get(key)?.value.as_ref()? {
        TagValue::List(parts) if parts.len() >= 3 => {
            parts[0].as_number()? + parts[1].as_number()? / 60.0 + parts[2].as_number()? / 3600.0
        }
        TagValue::Number(n) => *n,
        _ => return None,
    };

    if !decimal.is_finite() {
        return None;
    }

    let hemisphere = as_string(tags, ref_key).unwrap_or_default();
    if hemisphere.to_uppercase().contains(negative) {
        Some(-decimal)
    } else {
        Some(decimal)
    }
}

fn extract_embedded_preview(tags: &TagMap) -> Option<EmbeddedPreview> {
    let entry = THUMBNAIL_KEYS.iter().find_map(|key| tags.get(*key))?;
    let bytes = match entry.value.as_ref()? {
        TagValue::Binary(bytes) if !bytes.is_empty() => bytes,
        _ => return None,
    };

    let tagged_type = first_of(tags, &THUMBNAIL_TYPE_KEYS);

    Some(EmbeddedPreview {
        base64: STANDARD.encode(bytes),
        mime_type: normalize_preview_mime(tagged_type.as_deref()),
    })
}

/// Map a loose thumbnail type tag onto jpeg / png / webp
pub fn normalize_preview_mime(tagged_type: Option<&str>) -> &'static str {
    let lower = tagged_type.unwrap_or_default().to_lowercase();
    if lower.contains("png") {
        "image/png"
    } else if lower.contains("webp") {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

/// Description wins; otherwise the raw value. Binary payloads are dropped.
fn flatten_tags(tags: &TagMap) -> BTreeMap<String, serde_json::Value> {
    tags.iter()
        .filter_map(|(key, entry)| {
            let value = match (&entry.description, &entry.value) {
                (Some(description), _) => serde_json::Value::String(description.clone()),
                (None, Some(TagValue::Binary(_))) => return None,
                (None, Some(value)) => value.to_json(),
                (None, None) => serde_json::Value::Null,
            };
            Some((key.clone(), value))
        })
        .collect()
}

fn parse_capture_date(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    CAPTURE_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
}

/// Parse shutter speed string to seconds
fn parse_shutter_speed(s: Option<&str>) -> Option<f64> {
    let s = s?.trim().trim_end_matches('s').trim();
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.trim().parse().ok()?;
        let den: f64 = den.trim().parse().ok()?;
        return Some(num / den);
    }
    s.parse().ok()
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> TagEntry {
        TagEntry {
            description: Some(s.to_string()),
            value: Some(TagValue::Text(s.to_string())),
        }
    }

    fn number(n: f64) -> TagEntry {
        TagEntry {
            description: None,
            value: Some(TagValue::Number(n)),
        }
    }

    fn tags(entries: Vec<(&str, TagEntry)>) -> TagMap {
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    use super::fixtures::{camera_tiff, tiny_jpeg, TiffBuilder};
    use std::cell::Cell;

    fn no_libraw(_: &[u8]) -> Option<CameraInfo> {
        None
    }

    #[test]
    fn test_capture_date_precedence() {
        let both = tags(vec![
            ("CreateDate", text("2020:01:01 00:00:00")),
            ("DateTimeOriginal", text("2019:06:30 12:00:00")),
        ]);
        let meta = ExtractedMetadata::from_tags(&both);
        assert_eq!(meta.capture_date.as_deref(), Some("2019:06:30 12:00:00"));

        let only_create = tags(vec![("CreateDate", text("2020:01:01 00:00:00"))]);
        let meta = ExtractedMetadata::from_tags(&only_create);
        assert_eq!(meta.capture_date.as_deref(), Some("2020:01:01 00:00:00"));
        assert_eq!(
            meta.captured_at.map(|d| d.to_string()),
            Some("2020-01-01 00:00:00".to_string())
        );
    }

    #[test]
    fn test_empty_values_fall_through_chain() {
        let set = tags(vec![
            ("DateTimeOriginal", text("  ")),
            ("ModifyDate", text("2021:02:03 04:05:06")),
        ]);
        let meta = ExtractedMetadata::from_tags(&set);
        assert_eq!(meta.capture_date.as_deref(), Some("2021:02:03 04:05:06"));
    }

    #[test]
    fn test_exposure_chains() {
        let set = tags(vec![
            ("ShutterSpeedValue", text("1/125")),
            ("ApertureValue", number(4.0)),
            ("ISOSetting", number(800.0)),
            ("ISOValue", number(100.0)),
        ]);
        let meta = ExtractedMetadata::from_tags(&set);
        assert_eq!(meta.exposure_time.as_deref(), Some("1/125"));
        assert_eq!(meta.f_number.as_deref(), Some("4"));
        assert_eq!(meta.iso.as_deref(), Some("800"));
        assert_eq!(
            meta.exposure_summary().as_deref(),
            Some("f/4 1/125s ISO800 ?mm")
        );
    }

    #[test]
    fn test_list_value_uses_first_element() {
        let set = tags(vec![(
            "ISO",
            TagEntry {
                description: None,
                value: Some(TagValue::List(vec![
                    TagValue::Number(400.0),
                    TagValue::Number(0.0),
                ])),
            },
        )]);
        assert_eq!(ExtractedMetadata::from_tags(&set).iso.as_deref(), Some("400"));
    }

    #[test]
    fn test_location_from_dms() {
        let dms = |d: f64, m: f64, s: f64| TagEntry {
            description: None,
            value: Some(TagValue::List(vec![
                TagValue::Number(d),
                TagValue::Number(m),
                TagValue::Number(s),
            ])),
        };
        let set = tags(vec![
            ("GPSLatitude", dms(48.0, 51.0, 36.0)),
            ("GPSLatitudeRef", text("N")),
            ("GPSLongitude", dms(2.0, 21.0, 0.0)),
            ("GPSLongitudeRef", text("W")),
        ]);
        let meta = ExtractedMetadata::from_tags(&set);
        assert_eq!(meta.location.as_deref(), Some("48.860000, -2.350000"));

        let half = tags(vec![("GPSLatitude", dms(1.0, 0.0, 0.0))]);
        assert_eq!(ExtractedMetadata::from_tags(&half).location, None);
    }

    #[test]
    fn test_flatten_prefers_description_and_drops_binary() {
        let set = tags(vec![
            (
                "ExposureTime",
                TagEntry {
                    description: Some("1/250".to_string()),
                    value: Some(TagValue::Number(0.004)),
                },
            ),
            ("Orientation", number(1.0)),
            (
                "MakerNote",
                TagEntry {
                    description: None,
                    value: Some(TagValue::Binary(vec![0; 512])),
                },
            ),
        ]);
        let flat = flatten_tags(&set);
        assert_eq!(flat["ExposureTime"], serde_json::json!("1/250"));
        assert_eq!(flat["Orientation"], serde_json::json!(1.0));
        assert!(!flat.contains_key("MakerNote"));
    }

    #[test]
    fn test_preview_mime_normalization() {
        assert_eq!(normalize_preview_mime(Some("jpeg")), "image/jpeg");
        assert_eq!(normalize_preview_mime(Some("image/PNG")), "image/png");
        assert_eq!(normalize_preview_mime(Some("WebP")), "image/webp");
        assert_eq!(normalize_preview_mime(Some("bitmap")), "image/jpeg");
        assert_eq!(normalize_preview_mime(None), "image/jpeg");
    }

    #[test]
    fn test_garbage_yields_empty_metadata() {
        let called = Cell::new(false);
        let meta = extract_with(b"definitely not an image", "broken.CR2", |_| {
            called.set(true);
            None
        });
        assert_eq!(meta, ExtractedMetadata::default());
        assert!(meta.raw_tag_map.is_empty());
        assert!(!called.get(), "LibRaw must not see bytes without a RAW header");

        let meta = extract_metadata(&[], "empty.jpg");
        assert_eq!(meta, ExtractedMetadata::default());
    }

    #[test]
    fn test_jpeg_without_exif_yields_empty_metadata() {
        let meta = extract_metadata(&tiny_jpeg(), "plain.jpg");
        assert_eq!(meta.camera_make, None);
        assert!(meta.raw_tag_map.is_empty());
    }

    #[test]
    fn test_raw_tiff_with_embedded_thumbnail() {
        let jpeg = tiny_jpeg();
        let tiff = camera_tiff(&jpeg, true);

        let meta = extract_with(&tiff, "sample.DNG", no_libraw);
        assert_eq!(meta.camera_make.as_deref(), Some("Testcam"));
        assert_eq!(meta.camera_model.as_deref(), Some("T-100"));
        assert!(meta.captured_at.is_some());

        let preview = meta.embedded_preview.expect("thumbnail should be found");
        assert_eq!(preview.mime_type, "image/jpeg");
        assert_eq!(STANDARD.decode(&preview.base64).unwrap(), jpeg);

        assert_eq!(meta.raw_tag_map["Make"], serde_json::json!("Testcam"));
        assert_eq!(meta.raw_tag_map["thumbnailType"], serde_json::json!("image/jpeg"));
        assert!(!meta.raw_tag_map.contains_key("thumbnail"));
    }

    #[test]
    fn test_exif_and_gps_sub_ifds() {
        let meta = extract_with(&camera_tiff(&tiny_jpeg(), true), "sample.NEF", no_libraw);

        assert_eq!(meta.capture_date.as_deref(), Some("2024:05:01 10:20:30"));
        assert_eq!(meta.exposure_time.as_deref(), Some("1/250"));
        assert_eq!(parse_shutter_speed(meta.exposure_time.as_deref()), Some(0.004));
        assert_eq!(meta.f_number.as_deref(), Some("2.8"));
        assert_eq!(meta.iso.as_deref(), Some("400"));
        assert_eq!(meta.focal_length.as_deref(), Some("50"));
        assert_eq!(meta.location.as_deref(), Some("48.860000, -2.350000"));
        assert_eq!(
            meta.exposure_summary().as_deref(),
            Some("f/2.8 1/250s ISO400 50mm")
        );

        assert!(meta.raw_tag_map.contains_key("ISO"));
        assert!(meta.raw_tag_map.contains_key("CreateDate"));
        assert!(!meta.raw_tag_map.contains_key("PhotographicSensitivity"));
        assert!(!meta.raw_tag_map.contains_key("DateTimeDigitized"));
    }

    #[test]
    fn test_digitized_date_used_without_original() {
        let meta = extract_with(&camera_tiff(&tiny_jpeg(), false), "sample.NEF", no_libraw);
        assert_eq!(meta.capture_date.as_deref(), Some("2024:05:01 10:20:31"));
        assert_eq!(
            meta.captured_at.map(|d| d.to_string()),
            Some("2024-05-01 10:20:31".to_string())
        );
    }

    #[test]
    fn test_orf_and_rw2_headers_are_parsed() {
        for (magic, make, name) in [
            (b"IIRO", "OLYMPUS IMAGING CORP.", "P1010001.ORF"),
            (b"IIU\0", "Panasonic", "P1010001.RW2"),
        ] {
            let mut builder = TiffBuilder::new();
            let ifd0 = builder.ifd();
            builder.ascii(ifd0, 0x010F, make);
            builder.ascii(ifd0, 0x0110, "E-M1");
            let mut bytes = builder.build();
            bytes[..4].copy_from_slice(magic);

            assert!(parse_tag_sets(&bytes, ParseProfile::RawTiff).is_empty());

            let meta = extract_with(&bytes, name, no_libraw);
            assert_eq!(meta.camera_make.as_deref(), Some(make), "{}", name);
            assert_eq!(meta.camera_model.as_deref(), Some("E-M1"), "{}", name);
        }
    }

    #[test]
    fn test_libraw_fields_for_non_tiff_raw() {
        let mut raf = b"FUJIFILMCCD-RAW 0201FF383501".to_vec();
        raf.resize(256, 0);

        let meta = extract_with(&raf, "DSCF0001.RAF", |_| {
            Some(CameraInfo {
                make: "FUJIFILM".to_string(),
                model: "X-T4".to_string(),
                lens_model: "XF35mmF1.4 R".to_string(),
                iso: 400,
                shutter: 0.004,
                aperture: 2.8,
                focal_length: 35.0,
                captured_at: NaiveDateTime::parse_from_str(
                    "2023:09:14 18:02:11",
                    EXIF_DATE_FORMAT,
                )
                .ok(),
                gps: Some((48.86, -2.35)),
                ..CameraInfo::default()
            })
        });

        assert_eq!(meta.camera_make.as_deref(), Some("FUJIFILM"));
        assert_eq!(meta.camera_model.as_deref(), Some("X-T4"));
        assert_eq!(meta.lens_model.as_deref(), Some("XF35mmF1.4 R"));
        assert_eq!(meta.capture_date.as_deref(), Some("2023:09:14 18:02:11"));
        assert_eq!(meta.location.as_deref(), Some("48.860000, -2.350000"));
        assert_eq!(
            meta.exposure_summary().as_deref(),
            Some("f/2.8 1/250s ISO400 35mm")
        );
        assert!(!meta.raw_tag_map.contains_key("LensMake"));
    }

    #[test]
    fn test_tiff_values_win_over_libraw() {
        let tiff = camera_tiff(&tiny_jpeg(), true);
        let meta = extract_with(&tiff, "sample.DNG", |_| {
            Some(CameraInfo {
                make: "Somebody Else".to_string(),
                lens_model: "Zoom 24-70mm".to_string(),
                iso: 3200,
                ..CameraInfo::default()
            })
        });

        assert_eq!(meta.camera_make.as_deref(), Some("Testcam"));
        assert_eq!(meta.iso.as_deref(), Some("400"));
        assert_eq!(meta.lens_model.as_deref(), Some("Zoom 24-70mm"));
    }

    #[test]
    fn test_embedded_jpeg_from_ifd1() {
        let jpeg = tiny_jpeg();
        assert_eq!(embedded_jpeg(&camera_tiff(&jpeg, true)).as_deref(), Some(&jpeg[..]));

        let mut orf = camera_tiff(&jpeg, true);
        orf[..4].copy_from_slice(b"IIRO");
        assert_eq!(embedded_jpeg(&orf).as_deref(), Some(&jpeg[..]));

        assert!(embedded_jpeg(&jpeg).is_none());
        assert!(embedded_jpeg(b"\x89PNG\r\n\x1a\n").is_none());
    }

    #[test]
    fn test_shutter_speed_parsing() {
        assert_eq!(parse_shutter_speed(Some("1/250")), Some(0.004));
        assert_eq!(parse_shutter_speed(Some("2")), Some(2.0));
        assert_eq!(parse_shutter_speed(Some("1/1000 s")), Some(0.001));
        assert_eq!(parse_shutter_speed(None), None);
    }
}

/// Hand-assembled little-endian TIFF files for tests
#[cfg(test)]
pub(crate) mod fixtures {
    const ASCII: u16 = 2;
    const SHORT: u16 = 3;
    const LONG: u16 = 4;
    const RATIONAL: u16 = 5;

    enum Payload {
        /// Inline when it fits in four bytes, else stored in the data area
        Bytes(Vec<u8>),
        /// Always stored in the data area; the entry holds its offset
        Blob(Vec<u8>),
        /// Offset of another IFD
        Ifd(usize),
    }

    struct Entry {
        tag: u16,
        kind: u16,
        count: u32,
        payload: Payload,
    }

    /// IFDs are laid out in creation order, followed by one data area
    #[derive(Default)]
    pub struct TiffBuilder {
        ifds: Vec<Vec<Entry>>,
        next: Vec<Option<usize>>,
    }

    impl TiffBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn ifd(&mut self) -> usize {
            self.ifds.push(Vec::new());
            self.next.push(None);
            self.ifds.len() - 1
        }

        pub fn link(&mut self, from: usize, to: usize) {
            self.next[from] = Some(to);
        }

        fn push(&mut self, ifd: usize, tag: u16, kind: u16, count: u32, payload: Payload) {
            self.ifds[ifd].push(Entry {
                tag,
                kind,
                count,
                payload,
            });
        }

        pub fn ascii(&mut self, ifd: usize, tag: u16, text: &str) {
            let mut bytes = text.as_bytes().to_vec();
            bytes.push(0);
            let count = bytes.len() as u32;
            self.push(ifd, tag, ASCII, count, Payload::Bytes(bytes));
        }

        pub fn short(&mut self, ifd: usize, tag: u16, value: u16) {
            self.push(ifd, tag, SHORT, 1, Payload::Bytes(value.to_le_bytes().to_vec()));
        }

        pub fn long(&mut self, ifd: usize, tag: u16, value: u32) {
            self.push(ifd, tag, LONG, 1, Payload::Bytes(value.to_le_bytes().to_vec()));
        }

        pub fn rationals(&mut self, ifd: usize, tag: u16, values: &[(u32, u32)]) {
            let bytes = values
                .iter()
                .flat_map(|(num, den)| num.to_le_bytes().into_iter().chain(den.to_le_bytes()))
                .collect();
            self.push(ifd, tag, RATIONAL, values.len() as u32, Payload::Bytes(bytes));
        }

        pub fn pointer(&mut self, ifd: usize, tag: u16, target: usize) {
            self.push(ifd, tag, LONG, 1, Payload::Ifd(target));
        }

        /// Offset/length tag pair around an out-of-line payload
        pub fn blob(&mut self, ifd: usize, offset_tag: u16, length_tag: u16, data: &[u8]) {
            self.push(ifd, offset_tag, LONG, 1, Payload::Blob(data.to_vec()));
            self.long(ifd, length_tag, data.len() as u32);
        }

        pub fn build(&self) -> Vec<u8> {
            let mut ifd_offsets = Vec::with_capacity(self.ifds.len());
            let mut cursor = 8;
            for ifd in &self.ifds {
                ifd_offsets.push(cursor);
                cursor += 2 + 12 * ifd.len() + 4;
            }
            let data_start = cursor;

            let mut out = b"II*\0".to_vec();
            out.extend_from_slice(&(ifd_offsets[0] as u32).to_le_bytes());
            let mut data = Vec::new();

            for (index, ifd) in self.ifds.iter().enumerate() {
                out.extend_from_slice(&(ifd.len() as u16).to_le_bytes());
                for entry in ifd {
                    let field = match &entry.payload {
                        Payload::Ifd(target) => (ifd_offsets[*target] as u32).to_le_bytes(),
                        Payload::Bytes(bytes) if bytes.len() <= 4 => {
                            let mut field = [0u8; 4];
                            field[..bytes.len()].copy_from_slice(bytes);
                            field
                        }
                        Payload::Bytes(bytes) | Payload::Blob(bytes) => {
                            if data.len() % 2 == 1 {
                                data.push(0);
                            }
                            let at = (data_start + data.len()) as u32;
                            data.extend_from_slice(bytes);
                            at.to_le_bytes()
                        }
                    };
                    out.extend_from_slice(&entry.tag.to_le_bytes());
                    out.extend_from_slice(&entry.kind.to_le_bytes());
                    out.extend_from_slice(&entry.count.to_le_bytes());
                    out.extend_from_slice(&field);
                }
                let next = self.next[index].map_or(0, |n| ifd_offsets[n]);
                out.extend_from_slice(&(next as u32).to_le_bytes());
            }

            assert_eq!(out.len(), data_start);
            out.extend_from_slice(&data);
            out
        }
    }

    pub fn tiny_jpeg() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(8, 6, image::Rgb([200, 40, 10]));
        let mut jpeg = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 90)
            .encode(img.as_raw(), 8, 6, image::ExtendedColorType::Rgb8)
            .unwrap();
        jpeg
    }

    /// IFD0 -> IFD1 (JPEG thumbnail), with Exif and GPS sub-IFDs hanging off IFD0
    pub fn camera_tiff(jpeg: &[u8], with_original_date: bool) -> Vec<u8> {
        let mut tiff = TiffBuilder::new();
        let ifd0 = tiff.ifd();
        let ifd1 = tiff.ifd();
        let exif = tiff.ifd();
        let gps = tiff.ifd();
        tiff.link(ifd0, ifd1);

        tiff.ascii(ifd0, 0x010F, "Testcam");
        tiff.ascii(ifd0, 0x0110, "T-100");
        tiff.ascii(ifd0, 0x0132, "2024:05:02 08:00:00");
        tiff.pointer(ifd0, 0x8769, exif);
        tiff.pointer(ifd0, 0x8825, gps);

        tiff.short(ifd1, 0x0103, 6);
        tiff.blob(ifd1, 0x0201, 0x0202, jpeg);

        tiff.rationals(exif, 0x829A, &[(1, 250)]);
        tiff.rationals(exif, 0x829D, &[(28, 10)]);
        tiff.short(exif, 0x8827, 400);
        if with_original_date {
            tiff.ascii(exif, 0x9003, "2024:05:01 10:20:30");
        }
        tiff.ascii(exif, 0x9004, "2024:05:01 10:20:31");
        tiff.rationals(exif, 0x920A, &[(50, 1)]);

        tiff.ascii(gps, 0x0001, "N");
        tiff.rationals(gps, 0x0002, &[(48, 1), (51, 1), (36, 1)]);
        tiff.ascii(gps, 0x0003, "W");
        tiff.rationals(gps, 0x0004, &[(2, 1), (21, 1), (0, 1)]);

        tiff.build()
    }
}
