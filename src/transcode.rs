//! Encode the tool's raw buffers into image files.
//!
//! The tool writes headerless buffers: `width * height`
//! interleaved RGB bytes for `process`, and `width * height`
//! little endian `f32` temperatures for `measure
//! --measurefmt float32`.
use std::{
    io::{Cursor, ErrorKind},
    path::Path,
};

use anyhow::{ensure, Context, Result};
use byteordered::ByteOrdered;
use jpeg_encoder::{ColorType, Encoder, SamplingFactor};
use log::warn;
use ndarray::Array2;
use rexif::{ExifTag, IfdEntry, IfdFormat, IfdKind};
use tiff::{
    encoder::{colortype, TiffEncoder},
    tags::Tag,
};

use crate::{
    error::Error,
    metadata::{Gps, RawPayloads},
    request::{Encoding, Subsampling},
};

const XMP_TAG: u16 = 700;
const EXIF_IFD_TAG: u16 = 34665;
const GPS_IFD_TAG: u16 = 34853;

/// GeoKeyDirectory: version 1.1.0 with 3 keys; model type
/// geographic, raster type pixel-is-area, WGS 84.
const GEO_KEYS: [u16; 16] = [
    1, 1, 0, 3, //
    1024, 0, 1, 2, //
    1025, 0, 1, 1, //
    2048, 0, 1, 4326,
];

/// Encode an RGB buffer in the requested container.
/// Metadata is only re-attached to JPEGs, and only when
/// `keep_metadata` is set.
pub fn encode_rgb(
    encoding: &Encoding,
    rgb: &[u8],
    width: u32,
    height: u32,
    meta: Option<&RawPayloads>,
) -> Result<Vec<u8>> {
    let rgb = rgb_slice(rgb, width, height)?;
    match *encoding {
        Encoding::Png { compression } => encode_png(rgb, width, height, compression),
        Encoding::Jpeg {
            quality,
            subsampling,
            keep_metadata,
        } => {
            let meta = if keep_metadata { meta } else { None };
            encode_jpeg(rgb, width, height, quality, subsampling, meta)
        }
    }
}

fn rgb_slice(rgb: &[u8], width: u32, height: u32) -> Result<&[u8]> {
    let len = width as usize * height as usize * 3;
    ensure!(
        rgb.len() >= len,
        Error::format(format!(
            "RGB buffer has {} bytes, {}x{} needs {}",
            rgb.len(),
            width,
            height,
            len
        ))
    );
    Ok(&rgb[..len])
}

pub fn encode_png(rgb: &[u8], width: u32, height: u32, compression: u8) -> Result<Vec<u8>> {
    let mut out = vec![];
    {
        let mut encoder = png::Encoder::new(&mut out, width, height);
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_compression(match compression {
            0..=2 => png::Compression::Fast,
            3..=6 => png::Compression::Default,
            _ => png::Compression::Best,
        });
        let mut writer = encoder.write_header().context("writing PNG header")?;
        writer.write_image_data(rgb).context("writing PNG data")?;
        writer.finish().context("finishing PNG")?;
    }
    Ok(out)
}

pub fn encode_jpeg(
    rgb: &[u8],
    width: u32,
    height: u32,
    quality: u8,
    subsampling: Subsampling,
    meta: Option<&RawPayloads>,
) -> Result<Vec<u8>> {
    let w = u16::try_from(width).map_err(|_| Error::encoding("image too wide for JPEG"))?;
    let h = u16::try_from(height).map_err(|_| Error::encoding("image too tall for JPEG"))?;

    let mut encoded = vec![];
    let mut encoder = Encoder::new(&mut encoded, quality);
    encoder.set_sampling_factor(match subsampling {
        Subsampling::S444 => SamplingFactor::R_4_4_4,
        Subsampling::S422 => SamplingFactor::R_4_2_2,
        Subsampling::S420 => SamplingFactor::R_4_2_0,
    });
    if let Some(meta) = meta {
        for app1 in meta.exif.iter().cloned().chain(meta.xmp_app1()) {
            encoder
                .add_app_segment(1, &app1)
                .map_err(|e| Error::encoding(format!("cannot add APP1: {}", e)))?;
        }
    }
    encoder
        .encode(rgb, w, h, ColorType::Rgb)
        .map_err(|e| Error::encoding(e.to_string()))?;

    match meta {
        Some(meta) => crate::segments::splice(&encoded, &meta.segments.retained()),
        None => Ok(encoded),
    }
}

/// Read a raw little endian `f32` raster, row major.
pub fn read_raster(raw: &[u8], width: u32, height: u32) -> Result<Array2<f32>> {
    let (w, h) = (width as usize, height as usize);
    ensure!(
        raw.len() >= w * h * 4,
        Error::format(format!(
            "raster has {} bytes, {}x{} float32 needs {}",
            raw.len(),
            width,
            height,
            w * h * 4
        ))
    );
    let mut rdr = ByteOrdered::le(raw);
    let mut data = Vec::with_capacity(w * h);
    for _ in 0..w * h {
        data.push(rdr.read_f32()?);
    }
    Ok(Array2::from_shape_vec((h, w), data)?)
}

/// Single channel float32 GeoTIFF anchored at `gps`, with
/// the source XMP, the descriptive IFD0 strings and the
/// Exif and GPS sub-IFDs of the source EXIF.
pub fn encode_geotiff(raster: &Array2<f32>, gps: Gps, meta: &RawPayloads) -> Result<Vec<u8>> {
    let (h, w) = raster.dim();
    let data = raster
        .as_slice()
        .ok_or_else(|| Error::encoding("raster is not contiguous"))?;

    let mut buf = Cursor::new(Vec::new());
    {
        let mut tiff = TiffEncoder::new(&mut buf)?;
        let mut image = tiff.new_image::<colortype::Gray32Float>(w as u32, h as u32)?;
        let dir = image.encoder();
        dir.write_tag(Tag::ModelPixelScaleTag, &[1f64, 1., 0.][..])?;
        dir.write_tag(
            Tag::ModelTiepointTag,
            &[0., 0., 0., gps.lon, gps.lat, gps.alt][..],
        )?;
        dir.write_tag(Tag::GeoKeyDirectoryTag, &GEO_KEYS[..])?;
        if let Some(xmp) = &meta.xmp {
            dir.write_tag(Tag::Unknown(XMP_TAG), &xmp[..])?;
        }
        for (tag, text) in meta.ifd0_text() {
            let tag = match tag {
                ExifTag::Make => Tag::Make,
                ExifTag::Model => Tag::Model,
                ExifTag::Software => Tag::Software,
                ExifTag::DateTime => Tag::DateTime,
                ExifTag::ImageDescription => Tag::ImageDescription,
                _ => continue,
            };
            dir.write_tag(tag, text.as_str())?;
        }
        for (pointer, kind) in [(EXIF_IFD_TAG, IfdKind::Exif), (GPS_IFD_TAG, IfdKind::Gps)] {
            let entries = meta.sub_ifd(kind);
            if entries.is_empty() {
                continue;
            }
            let mut base = dir.write_data(&[0u8; 0][..])?;
            if base % 2 == 1 {
                base = dir.write_data(0u8)? + 1;
            }
            let offset = dir.write_data(&ifd_bytes(&entries, base)?[..])?;
            dir.write_tag(Tag::Unknown(pointer), u32::try_from(offset)?)?;
        }
        image.write_data(data).context("writing GeoTIFF data")?;
    }
    Ok(buf.into_inner())
}

/// Serialize `entries` as a TIFF IFD placed at `base`, in
/// the native byte order the TIFF encoder writes. Values
/// over four bytes follow the directory.
fn ifd_bytes(entries: &[IfdEntry], base: u64) -> Result<Vec<u8>> {
    let dir_len = 2 + 12 * entries.len() + 4;
    let mut dir = Vec::with_capacity(dir_len);
    let mut values = vec![];
    dir.extend_from_slice(&u16::try_from(entries.len())?.to_ne_bytes());
    for entry in entries {
        let data = native_order(entry);
        dir.extend_from_slice(&entry.tag.to_ne_bytes());
        dir.extend_from_slice(&(entry.format as u16).to_ne_bytes());
        dir.extend_from_slice(&entry.count.to_ne_bytes());
        if data.len() <= 4 {
            let mut inline = data;
            inline.resize(4, 0);
            dir.extend_from_slice(&inline);
        } else {
            let at = u32::try_from(base + (dir_len + values.len()) as u64)?;
            dir.extend_from_slice(&at.to_ne_bytes());
            values.extend_from_slice(&data);
            if values.len() % 2 == 1 {
                values.push(0);
            }
        }
    }
    dir.extend_from_slice(&0u32.to_ne_bytes());
    dir.extend_from_slice(&values);
    Ok(dir)
}

/// Entry data with every item in native byte order.
fn native_order(entry: &IfdEntry) -> Vec<u8> {
    let unit = match entry.format {
        IfdFormat::U16 | IfdFormat::I16 => 2,
        IfdFormat::U32
        | IfdFormat::I32
        | IfdFormat::F32
        | IfdFormat::URational
        | IfdFormat::IRational => 4,
        IfdFormat::F64 => 8,
        _ => 1,
    };
    let mut data = entry.data.clone();
    if entry.le != cfg!(target_endian = "little") {
        for item in data.chunks_mut(unit) {
            item.reverse();
        }
    }
    data
}

/// Remove a scratch file; a missing file is not an error.
pub async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("cannot remove {}: {}", path.display(), e),
    }
}
