//! Camera and flight metadata of DJI thermal R-JPEGs.
//!
//! Everything comes from a single APPn [scan](crate::segments)
//! of the file: the EXIF block (parsed with [`rexif`]) and
//! the XMP packet (DJI keeps most drone specific fields
//! there, e.g. `drone-dji:ImageSource`).
use std::{collections::BTreeMap, io::Cursor};

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime};
use log::debug;
use rexif::{ExifData, ExifTag, IfdEntry, IfdKind, Namespace, TagValue};
use roxmltree::{Document, Node};

use crate::{
    palette::Palette,
    segments::{AppSegments, ScanMode},
};

pub const EXIF_SIGNATURE: &[u8] = b"Exif\0\0";
pub const XMP_SIGNATURE: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";

const SOURCE_TAG: &str = "drone-dji:ImageSource";
const INFRARED_SOURCE: &str = "InfraredCamera";
const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
/// Interoperability IFD pointer inside the Exif IFD.
const INTEROP_POINTER: u16 = 0xA005;

/// Signed decimal degrees and meters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Gps {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

/// Raw payloads kept for re-encoding.
#[derive(Debug, Clone, Default)]
pub struct RawPayloads {
    /// APP1 EXIF contents including the `Exif\0\0` header.
    pub exif: Option<Vec<u8>>,
    /// XMP packet without the namespace signature.
    pub xmp: Option<Vec<u8>>,
    pub segments: AppSegments,
}

impl RawPayloads {
    /// Descriptive IFD0 strings of the EXIF block (make,
    /// model, software, date, description) that are present.
    pub fn ifd0_text(&self) -> Vec<(ExifTag, String)> {
        let data = match self.exif.as_deref().and_then(parse_exif) {
            Some(data) => data,
            None => return vec![],
        };
        [
            ExifTag::Make,
            ExifTag::Model,
            ExifTag::Software,
            ExifTag::DateTime,
            ExifTag::ImageDescription,
        ]
        .into_iter()
        .filter_map(|tag| exif_entry(&data, tag.clone()).map(|v| (tag, v)))
        .collect()
    }

    /// Raw entries of the Exif or GPS sub-IFD, by tag.
    /// Pointers to further IFDs are left out.
    pub fn sub_ifd(&self, kind: IfdKind) -> Vec<IfdEntry> {
        let data = match self.exif.as_deref().and_then(parse_exif) {
            Some(data) => data,
            None => return vec![],
        };
        let mut entries: Vec<IfdEntry> = data
            .entries
            .into_iter()
            .filter(|e| e.kind == kind && e.ifd.namespace == Namespace::Standard)
            .filter(|e| e.ifd.tag != INTEROP_POINTER)
            .map(|e| e.ifd)
            .collect();
        entries.sort_by_key(|e| e.tag);
        entries.dedup_by_key(|e| e.tag);
        entries
    }

    /// XMP as APP1 contents.
    pub fn xmp_app1(&self) -> Option<Vec<u8>> {
        self.xmp.as_ref().map(|xmp| {
            let mut out = XMP_SIGNATURE.to_vec();
            out.extend_from_slice(xmp);
            out
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub model: Option<String>,
    pub serial: Option<String>,
    pub focal_length: Option<f64>,
    pub aperture: Option<f64>,
    /// `YYYY/MM/DD HH:MM:SS`
    pub create_time: Option<String>,
    pub gps: Gps,
    /// Palette the camera rendered the JPEG preview with.
    pub palette: Option<Palette>,
    pub raw: RawPayloads,
}

impl Metadata {
    /// Extract metadata from a complete R-JPEG.
    ///
    /// Returns `Ok(None)` for images out of scope: no XMP
    /// packet, or not taken by an infrared camera. Fails only
    /// if the data is not a JPEG at all.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Option<Self>> {
        let segments = AppSegments::scan(Cursor::new(&bytes[..]), ScanMode::Full)?;

        let exif = segments.app1_with_signature(EXIF_SIGNATURE).map(<[u8]>::to_vec);
        let xmp = match segments.app1_with_signature(XMP_SIGNATURE) {
            Some(app1) => app1[XMP_SIGNATURE.len()..].to_vec(),
            None => return Ok(None),
        };

        let xmp_tags = xmp_tags(&String::from_utf8_lossy(&xmp));
        if xmp_tags.get(SOURCE_TAG).map(String::as_str) != Some(INFRARED_SOURCE) {
            return Ok(None);
        }

        let exif_data = exif.as_deref().and_then(parse_exif);
        let tag = |t: ExifTag| exif_data.as_ref().and_then(|d| exif_entry(d, t));

        let gps = Gps {
            lat: signed(tag(ExifTag::GPSLatitude), tag(ExifTag::GPSLatitudeRef), "S"),
            lon: signed(tag(ExifTag::GPSLongitude), tag(ExifTag::GPSLongitudeRef), "W"),
            alt: altitude(exif_data.as_ref()),
        };

        Ok(Some(Metadata {
            model: xmp_tags
                .get("tiff:Model")
                .cloned()
                .or_else(|| tag(ExifTag::Model)),
            serial: xmp_tags.get("drone-dji:DroneSerialNumber").cloned(),
            focal_length: tag(ExifTag::FocalLength).and_then(|v| parse_number(&v)),
            aperture: tag(ExifTag::FNumber).and_then(|v| parse_number(&v)),
            create_time: xmp_tags
                .get("xmp:CreateDate")
                .and_then(|v| format_timestamp(v)),
            gps,
            palette: tag(ExifTag::ImageDescription)
                .and_then(|d| Palette::from_camera_description(&d)),
            raw: RawPayloads {
                exif,
                xmp: Some(xmp),
                segments,
            },
        }))
    }
}

/// Degrees, minutes, seconds (`[23, 21, 28.4713]`,
/// `(23, 21, 28.4713)`, `23, 21, 284713/10000`) to decimal
/// degrees. Anything malformed yields `0.0`.
pub fn dms_to_decimal(text: &str) -> f64 {
    parse_dms(text).unwrap_or(0.0)
}

fn parse_dms(text: &str) -> Option<f64> {
    let inner = text
        .trim()
        .trim_start_matches(|c| c == '[' || c == '(')
        .trim_end_matches(|c| c == ']' || c == ')');
    let parts: Vec<f64> = inner
        .split(',')
        .take(3)
        .map(parse_number)
        .collect::<Option<_>>()?;
    match parts[..] {
        [d, m, s] => Some(d + m / 60. + s / 3600.),
        _ => None,
    }
}

/// A decimal or `num/den` rational.
fn parse_number(text: &str) -> Option<f64> {
    let text = text.trim();
    let value = match text.split_once('/') {
        Some((num, den)) => {
            let den: f64 = den.trim().parse().ok()?;
            if den == 0. {
                return None;
            }
            num.trim().parse::<f64>().ok()? / den
        }
        None => text.parse().ok()?,
    };
    value.is_finite().then(|| value)
}

fn signed(value: Option<String>, reference: Option<String>, negative: &str) -> f64 {
    let decimal = value.as_deref().map_or(0., dms_to_decimal);
    match reference {
        Some(r) if r.trim().eq_ignore_ascii_case(negative) => -decimal,
        _ => decimal,
    }
}

/// GPS altitude in meters, negative below sea level.
fn altitude(data: Option<&ExifData>) -> f64 {
    let data = match data {
        Some(data) => data,
        None => return 0.0,
    };
    let alt = exif_entry(data, ExifTag::GPSAltitude)
        .and_then(|v| parse_number(&v))
        .unwrap_or(0.0);
    let below = data.entries.iter().any(|e| {
        e.tag == ExifTag::GPSAltitudeRef && matches!(&e.value, TagValue::U8(v) if v.first() == Some(&1))
    });
    if below {
        -alt
    } else {
        alt
    }
}

/// ISO-8601 to `YYYY/MM/DD HH:MM:SS`, keeping the wall-clock
/// time of any offset.
pub fn format_timestamp(text: &str) -> Option<String> {
    let text = text.trim();
    let parsed = DateTime::parse_from_rfc3339(text)
        .map(|d| d.naive_local())
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S"))
        .ok()?;
    Some(parsed.format("%Y/%m/%d %H:%M:%S").to_string())
}

/// Collect the `prefix:Name` properties of every
/// `rdf:Description` in an XMP packet, both the attribute
/// (`prefix:Name="v"`) and element
/// (`<prefix:Name>v</prefix:Name>`) forms. Structured values
/// (`rdf:Alt`, `rdf:Seq`, ...) yield their first item.
///
/// An unparsable packet yields no tags.
pub fn xmp_tags(xmp: &str) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    let packet = xmp
        .trim_start_matches('\u{feff}')
        .trim_end_matches(|c: char| c == '\0' || c.is_whitespace());
    let doc = match Document::parse(packet) {
        Ok(doc) => doc,
        Err(e) => {
            debug!("xmp unreadable: {}", e);
            return tags;
        }
    };

    let descriptions = doc
        .descendants()
        .filter(|n| n.has_tag_name((RDF_NS, "Description")));
    for desc in descriptions {
        for attr in desc.attributes() {
            let ns = match attr.namespace() {
                Some(ns) if ns != RDF_NS => ns,
                _ => continue,
            };
            if let Some(name) = qualified_name(desc, ns, attr.name()) {
                tags.insert(name, attr.value().trim().to_string());
            }
        }
        for child in desc.children().filter(Node::is_element) {
            let ns = match child.tag_name().namespace() {
                Some(ns) => ns,
                None => continue,
            };
            let value = child
                .descendants()
                .filter(|n| n.is_element())
                .find(|n| !n.children().any(|c| c.is_element()))
                .and_then(|n| n.text());
            if let (Some(name), Some(value)) = (qualified_name(child, ns, child.tag_name().name()), value) {
                tags.insert(name, value.trim().to_string());
            }
        }
    }
    tags
}

/// `prefix:local` with the prefix bound to `ns` at `node`.
fn qualified_name(node: Node, ns: &str, local: &str) -> Option<String> {
    let prefix = node.lookup_prefix(ns)?;
    Some(format!("{}:{}", prefix, local))
}

/// Parse an APP1 EXIF payload. Failures only lose the
/// structured tags, so they are logged and swallowed.
fn parse_exif(app1: &[u8]) -> Option<ExifData> {
    let tiff = app1.strip_prefix(EXIF_SIGNATURE)?;
    let (result, warnings) = rexif::parse_buffer_quiet(tiff);
    for w in warnings {
        debug!("exif: {}", w);
    }
    result.map_err(|e| debug!("exif unreadable: {}", e)).ok()
}

/// Text form of an EXIF value; rationals as numbers,
/// multiple values as a bracketed list.
fn exif_entry(data: &ExifData, tag: ExifTag) -> Option<String> {
    let entry = data.entries.iter().find(|e| e.tag == tag)?;
    let text = match &entry.value {
        TagValue::Ascii(s) => s.trim_end_matches('\0').trim().to_string(),
        TagValue::URational(values) => list(values.iter().map(|r| r.value())),
        TagValue::IRational(values) => list(values.iter().map(|r| r.value())),
        _ => entry.value_more_readable.to_string(),
    };
    (!text.is_empty()).then(|| text)
}

fn list(values: impl Iterator<Item = f64>) -> String {
    let values: Vec<String> = values.map(|v| v.to_string()).collect();
    match values.len() {
        1 => values[0].clone(),
        _ => format!("[{}]", values.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{Fixture, CALIBRATION};

    #[test]
    fn dms_conversion() {
        let expected = 23. + 21. / 60. + 28.4713 / 3600.;
        assert!((dms_to_decimal("[23, 21, 28.4713]") - expected).abs() < 1e-9);
        assert!((dms_to_decimal("(23, 21, 284713/10000)") - expected).abs() < 1e-9);
        assert!((dms_to_decimal("23,21,28.4713") - 23.357909).abs() < 1e-6);
    }

    #[test]
    fn malformed_dms_is_zero() {
        assert_eq!(dms_to_decimal("garbage"), 0.0);
        assert_eq!(dms_to_decimal("[23, 21]"), 0.0);
        assert_eq!(dms_to_decimal("[23, 21, 5/0]"), 0.0);
        assert_eq!(dms_to_decimal(""), 0.0);
    }

    #[test]
    fn timestamps() {
        let want = Some("2023/05/10 14:22:31".to_string());
        assert_eq!(format_timestamp("2023-05-10T14:22:31"), want);
        assert_eq!(format_timestamp("2023-05-10T14:22:31.250"), want);
        assert_eq!(format_timestamp("2023-05-10T14:22:31+08:00"), want);
        assert_eq!(format_timestamp("yesterday"), None);
    }

    #[test]
    fn xmp_attribute_and_element_forms() {
        let tags = xmp_tags(&Fixture::default().xmp());
        assert_eq!(tags["drone-dji:ImageSource"], "InfraredCamera");
        assert_eq!(tags["drone-dji:DroneSerialNumber"], "1ZNBJ7R00C00XY");
        assert_eq!(tags["tiff:Model"], "ZH20T");
        assert!(!tags.contains_key("xmlns:tiff"));
        assert!(!tags.contains_key("rdf:about"));
    }

    #[test]
    fn xmp_quoting_and_character_references() {
        let xmp = concat!(
            "<?xpacket begin='\u{feff}' id='W5M0MpCehiHzreSzNTczkc9d'?>",
            "<x:xmpmeta xmlns:x='adobe:ns:meta/'>",
            "<rdf:RDF xmlns:rdf='http://www.w3.org/1999/02/22-rdf-syntax-ns#'>",
            "<rdf:Description rdf:about='' ",
            "xmlns:drone='http://www.dji.com/drone-dji/1.0/' ",
            "xmlns:tiff='http://ns.adobe.com/tiff/1.0/' ",
            "drone:ImageSource='InfraredCamera' tiff:Model='M3T&#x20;Pro'>",
            "<drone:RelativeAltitude>+48.20</drone:RelativeAltitude>",
            "<tiff:Make>DJI &amp; Co</tiff:Make>",
            "<dc:title xmlns:dc='http://purl.org/dc/elements/1.1/'>",
            "<rdf:Alt><rdf:li xml:lang='x-default'>survey</rdf:li></rdf:Alt>",
            "</dc:title>",
            "</rdf:Description></rdf:RDF></x:xmpmeta>",
            "<?xpacket end='w'?>\0\0"
        );
        let tags = xmp_tags(xmp);
        assert_eq!(tags["drone:ImageSource"], "InfraredCamera");
        assert_eq!(tags["tiff:Model"], "M3T Pro");
        assert_eq!(tags["drone:RelativeAltitude"], "+48.20");
        assert_eq!(tags["tiff:Make"], "DJI & Co");
        assert_eq!(tags["dc:title"], "survey");
    }

    #[test]
    fn broken_xmp_has_no_tags() {
        assert!(xmp_tags("<rdf:Description drone-dji:ImageSource=\"InfraredCamera\"").is_empty());
    }

    #[test]
    fn extracts_thermal_fixture() -> Result<()> {
        let meta = Metadata::from_bytes(Fixture::default().jpeg())?.expect("thermal image");

        assert_eq!(meta.model.as_deref(), Some("ZH20T"));
        assert_eq!(meta.serial.as_deref(), Some("1ZNBJ7R00C00XY"));
        assert_eq!(meta.create_time.as_deref(), Some("2023/05/10 14:22:31"));
        assert_eq!(meta.palette, Some(Palette::IronRed));
        assert!((meta.gps.lat - 23.357909).abs() < 1e-6);
        assert!((meta.gps.lon - (113. + 15. / 60. + 30. / 3600.)).abs() < 1e-9);
        assert!((meta.gps.alt - 100.5).abs() < 1e-9);
        assert_eq!(meta.focal_length, Some(4.5));
        assert_eq!(meta.aperture, None);

        assert!(meta.raw.exif.as_ref().unwrap().starts_with(EXIF_SIGNATURE));
        assert!(meta.raw.xmp_app1().unwrap().starts_with(XMP_SIGNATURE));
        let text = meta.raw.ifd0_text();
        assert_eq!(
            text,
            vec![
                (ExifTag::Model, "ZH20T".to_string()),
                (ExifTag::ImageDescription, "IronRed".to_string())
            ]
        );
        let retained = meta.raw.segments.retained();
        assert_eq!(retained.len(), 2);
        assert_eq!(retained[0].contents(), Some(CALIBRATION));

        let gps_tags: Vec<u16> = meta.raw.sub_ifd(IfdKind::Gps).iter().map(|e| e.tag).collect();
        assert_eq!(gps_tags, vec![1, 2, 3, 4, 5, 6]);
        let exif = meta.raw.sub_ifd(IfdKind::Exif);
        assert_eq!(exif.len(), 1);
        assert_eq!(exif[0].tag, 0x920A);
        Ok(())
    }

    #[test]
    fn altitude_below_sea_level_is_negative() -> Result<()> {
        let fixture = Fixture {
            below_sea_level: true,
            ..Default::default()
        };
        let meta = Metadata::from_bytes(fixture.jpeg())?.unwrap();
        assert!((meta.gps.alt + 100.5).abs() < 1e-9);
        assert!(meta.gps.lat > 0.);
        Ok(())
    }

    #[test]
    fn non_infrared_is_out_of_scope() -> Result<()> {
        let visible = Fixture {
            infrared: false,
            ..Default::default()
        };
        assert!(Metadata::from_bytes(visible.jpeg())?.is_none());

        let no_xmp = Fixture {
            with_xmp: false,
            ..Default::default()
        };
        assert!(Metadata::from_bytes(no_xmp.jpeg())?.is_none());
        Ok(())
    }

    #[test]
    fn malformed_timestamp_degrades() -> Result<()> {
        let fixture = Fixture {
            create_date: "not a date",
            ..Default::default()
        };
        let meta = Metadata::from_bytes(fixture.jpeg())?.unwrap();
        assert_eq!(meta.create_time, None);
        Ok(())
    }

    #[test]
    fn non_jpeg_is_an_error() {
        assert!(Metadata::from_bytes(b"GIF89a".to_vec()).is_err());
    }
}
