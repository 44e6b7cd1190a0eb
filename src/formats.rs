//! Filename-based format classification
//!
//! Pure lookups shared by the conversion pipeline and upload validation.
//! Nothing here can fail: unknown names degrade to a JPEG guess.
//! [`sniff_raw_container`] is the one check that looks at bytes, and only at
//! the first few of them.

use serde::Serialize;

/// Raster formats the image-edit collaborator accepts without conversion.
pub const RASTER_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

/// Camera RAW containers routed through the conversion tiers.
pub const RAW_EXTENSIONS: [&str; 10] = [
    "arw", "cr2", "cr3", "nef", "orf", "pef", "raf", "rw2", "sr2", "dng",
];

/// Upper-case RAW names for user-facing copy ("ARW, CR2, ...").
pub const RAW_EXTENSION_DISPLAY: [&str; 10] = [
    "ARW", "CR2", "CR3", "NEF", "ORF", "PEF", "RAF", "RW2", "SR2", "DNG",
];

/// Declared upload MIME types accepted for editing. Closed allow-list.
pub const SUPPORTED_EDIT_MIME_TYPES: [&str; 14] = [
    "image/jpeg",
    "image/png",
    "image/webp",
    "image/tiff",
    "image/x-adobe-dng",
    "image/x-sony-arw",
    "image/x-sony-sr2",
    "image/x-canon-cr2",
    "image/x-canon-cr3",
    "image/x-nikon-nef",
    "image/x-panasonic-rw2",
    "image/x-fuji-raf",
    "image/x-olympus-orf",
    "image/x-pentax-pef",
];

/// Result of classifying a filename. Computed on demand, never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatClassification {
    /// Lower-cased text after the last `.`, empty when there is no dot
    pub extension: String,
    pub is_raw: bool,
    pub is_supported_raster: bool,
    pub inferred_mime_type: &'static str,
}

/// Lower-cased extension without the dot.
pub fn file_extension(file_name: &str) -> String {
    match file_name.rfind('.') {
        Some(idx) => file_name[idx + 1..].to_lowercase(),
        None => String::new(),
    }
}

pub fn classify(file_name: &str) -> FormatClassification {
    let extension = file_extension(file_name);
    let is_raw = RAW_EXTENSIONS.contains(&extension.as_str());
    let is_supported_raster = RASTER_EXTENSIONS.contains(&extension.as_str());
    let inferred_mime_type = mime_for_extension(&extension);

    FormatClassification {
        extension,
        is_raw,
        is_supported_raster,
        inferred_mime_type,
    }
}

pub fn is_raw_file_name(file_name: &str) -> bool {
    classify(file_name).is_raw
}

pub fn is_supported_extension(file_name: &str) -> bool {
    let classification = classify(file_name);
    classification.is_raw || classification.is_supported_raster
}

/// Check a declared MIME type against the edit allow-list.
///
/// Missing or unknown types are unsupported. This is intentionally stricter
/// than [`is_supported_extension`]; callers validating uploads check both
/// because a declared type and a filename can disagree.
pub fn is_supported_mime_type(mime: Option<&str>) -> bool {
    match mime {
        Some(m) => {
            let lower = m.trim().to_lowercase();
            SUPPORTED_EDIT_MIME_TYPES.contains(&lower.as_str())
        }
        None => false,
    }
}

/// RAW container family recognised from leading magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawContainer {
    /// Plain TIFF structure: CR2, NEF, DNG, ARW, PEF, SR2
    Tiff,
    /// Olympus ORF: TIFF layout with `IIRO` / `IIRS` / `MMOR` magic
    Orf,
    /// Panasonic RW2: TIFF layout with `IIU\0` magic
    Rw2,
    /// Fujifilm RAF
    Raf,
    /// Canon CR3 (ISO base media, `crx ` brand)
    Cr3,
}

impl RawContainer {
    /// ORF and RW2 are TIFF files under a vendor magic number
    pub fn is_tiff_variant(&self) -> bool {
        matches!(self, RawContainer::Orf | RawContainer::Rw2)
    }
}

/// Identify a RAW container from its header. `None` for anything else.
pub fn sniff_raw_container(bytes: &[u8]) -> Option<RawContainer> {
    let head = bytes.get(..4)?;
    match head {
        b"II*\0" | b"MM\0*" => Some(RawContainer::Tiff),
        b"IIRO" | b"IIRS" | b"MMOR" => Some(RawContainer::Orf),
        b"IIU\0" => Some(RawContainer::Rw2),
        _ if bytes.starts_with(b"FUJIFILMCCD-RAW") => Some(RawContainer::Raf),
        _ if is_cr3(bytes) => Some(RawContainer::Cr3),
        _ => None,
    }
}

fn is_cr3(bytes: &[u8]) -> bool {
    bytes.get(4..8) == Some(&b"ftyp"[..]) && bytes.get(8..12) == Some(&b"crx "[..])
}

/// Swap the extension of `file_name` (or append one when absent).
///
/// `new_extension` includes its leading dot.
pub fn replace_extension(file_name: &str, new_extension: &str) -> String {
    match file_name.rfind('.') {
        Some(idx) => format!("{}{}", &file_name[..idx], new_extension),
        None => format!("{}{}", file_name, new_extension),
    }
}

fn mime_for_extension(extension: &str) -> &'static str {
    match extension {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        // RAW
        "arw" => "image/x-sony-arw",
        "cr2" => "image/x-canon-cr2",
        "cr3" => "image/x-canon-cr3",
        "nef" => "image/x-nikon-nef",
        "orf" => "image/x-olympus-orf",
        "pef" => "image/x-pentax-pef",
        "raf" => "image/x-fuji-raf",
        "rw2" => "image/x-panasonic-rw2",
        "sr2" => "image/x-sony-sr2",
        "dng" => "image/x-adobe-dng",
        // Best guess for anything raster-like we don't know
        _ => "image/jpeg",
    }
}
