//! Synthetic DJI-style R-JPEGs for tests.
//!
//! Only depends on external crates so integration tests can
//! include it with `#[path]`.
#![allow(dead_code)]

use std::io::Write;

use byteordered::{ByteOrdered, Endian};
use jpeg_encoder::{ColorType, Encoder};

pub const XMP_SIGNATURE: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";
pub const CALIBRATION: &[u8] = b"DJI radiometric calibration block";

pub struct Fixture {
    pub infrared: bool,
    pub with_xmp: bool,
    pub description: &'static str,
    pub create_date: &'static str,
    pub below_sea_level: bool,
}

impl Default for Fixture {
    fn default() -> Self {
        Fixture {
            infrared: true,
            with_xmp: true,
            description: "IronRed",
            create_date: "2023-05-10T14:22:31",
            below_sea_level: false,
        }
    }
}

impl Fixture {
    pub fn xmp(&self) -> String {
        let source = if self.infrared {
            "InfraredCamera"
        } else {
            "WideCamera"
        };
        format!(
            concat!(
                "<x:xmpmeta xmlns:x=\"adobe:ns:meta/\">",
                "<rdf:RDF xmlns:rdf=\"http://www.w3.org/1999/02/22-rdf-syntax-ns#\">",
                "<rdf:Description rdf:about=\"\" ",
                "xmlns:tiff=\"http://ns.adobe.com/tiff/1.0/\" ",
                "xmlns:xmp=\"http://ns.adobe.com/xap/1.0/\" ",
                "xmlns:drone-dji=\"http://www.dji.com/drone-dji/1.0/\" ",
                "tiff:Model=\"ZH20T\" xmp:CreateDate=\"{}\" ",
                "drone-dji:ImageSource=\"{}\">",
                "<drone-dji:DroneSerialNumber>1ZNBJ7R00C00XY</drone-dji:DroneSerialNumber>",
                "</rdf:Description></rdf:RDF></x:xmpmeta>"
            ),
            self.create_date, source
        )
    }

    /// A 4x2 JPEG with EXIF, XMP and two vendor segments.
    pub fn jpeg(&self) -> Vec<u8> {
        let mut xmp = XMP_SIGNATURE.to_vec();
        xmp.extend_from_slice(self.xmp().as_bytes());

        let mut out = vec![];
        let mut encoder = Encoder::new(&mut out, 90);
        encoder
            .add_app_segment(1, &exif_block(self.description, self.below_sea_level))
            .expect("exif segment");
        if self.with_xmp {
            encoder.add_app_segment(1, &xmp).expect("xmp segment");
        }
        encoder.add_app_segment(3, CALIBRATION).expect("app3");
        encoder.add_app_segment(4, b"DJI temperature LUT").expect("app4");
        encoder
            .encode(&[128u8; 4 * 2 * 3], 4, 2, ColorType::Rgb)
            .expect("encode fixture");
        out
    }
}

/// `Exif\0\0` + little endian TIFF with IFD0 (ImageDescription,
/// Model, Exif and GPS pointers), an Exif IFD with a 4.5 mm
/// focal length and a GPS IFD at 23°21'28.4713"N
/// 113°15'30"E, 100.5 m above (or below) sea level.
pub fn exif_block(description: &str, below_sea_level: bool) -> Vec<u8> {
    const BYTE: u16 = 1;
    const ASCII: u16 = 2;
    const LONG: u16 = 4;
    const RATIONAL: u16 = 5;

    let mut desc = description.as_bytes().to_vec();
    desc.push(0);
    let model = b"ZH20T\0";

    let ifd0 = 8u32;
    let ifd0_len = 2 + 4 * 12 + 4;
    let desc_off = ifd0 + ifd0_len;
    let model_off = desc_off + desc.len() as u32;
    let exif_ifd = model_off + model.len() as u32;
    let exif_len = 2 + 12 + 4;
    let focal_off = exif_ifd + exif_len;
    let gps_ifd = focal_off + 8;
    let gps_len = 2 + 6 * 12 + 4;
    let lat_off = gps_ifd + gps_len;
    let lon_off = lat_off + 24;
    let alt_off = lon_off + 24;

    fn entry<E: Endian>(w: &mut ByteOrdered<Vec<u8>, E>, tag: u16, ty: u16, count: u32, value: u32) {
        w.write_u16(tag).unwrap();
        w.write_u16(ty).unwrap();
        w.write_u32(count).unwrap();
        w.write_u32(value).unwrap();
    }

    let mut w = ByteOrdered::le(Vec::new());

    w.write_all(b"II").unwrap();
    w.write_u16(42).unwrap();
    w.write_u32(ifd0).unwrap();

    w.write_u16(4).unwrap();
    entry(&mut w, 0x010E, ASCII, desc.len() as u32, desc_off);
    entry(&mut w, 0x0110, ASCII, model.len() as u32, model_off);
    entry(&mut w, 0x8769, LONG, 1, exif_ifd);
    entry(&mut w, 0x8825, LONG, 1, gps_ifd);
    w.write_u32(0).unwrap();
    w.write_all(&desc).unwrap();
    w.write_all(model).unwrap();

    w.write_u16(1).unwrap();
    entry(&mut w, 0x920A, RATIONAL, 1, focal_off);
    w.write_u32(0).unwrap();
    w.write_u32(45).unwrap();
    w.write_u32(10).unwrap();

    w.write_u16(6).unwrap();
    entry(&mut w, 0x0001, ASCII, 2, u32::from_le_bytes(*b"N\0\0\0"));
    entry(&mut w, 0x0002, RATIONAL, 3, lat_off);
    entry(&mut w, 0x0003, ASCII, 2, u32::from_le_bytes(*b"E\0\0\0"));
    entry(&mut w, 0x0004, RATIONAL, 3, lon_off);
    entry(&mut w, 0x0005, BYTE, 1, below_sea_level as u32);
    entry(&mut w, 0x0006, RATIONAL, 1, alt_off);
    w.write_u32(0).unwrap();

    for (num, den) in [(23, 1), (21, 1), (284713, 10000), (113, 1), (15, 1), (30, 1), (1005, 10)] {
        w.write_u32(num).unwrap();
        w.write_u32(den).unwrap();
    }

    let mut out = b"Exif\0\0".to_vec();
    out.extend_from_slice(&w.into_inner());
    out
}
