//! Encoding and packaging of rendered maps
//!
//! Covers raster encoding, base64 data URIs, the georeferenced KMZ package
//! (a KML ground overlay plus the image) and the corner-carrying download
//! filename convention.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageOutputFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Write};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{MapError, Result};
use crate::geo::{is_coordinate_token, CornerSet};

/// Extensions recognised when reading corners back from a filename
pub const IMAGE_EXTENSIONS: [&str; 6] = ["gif", "png", "jpg", "jpeg", "webp", "avif"];

/// Path of the image inside a KMZ package
pub const KMZ_IMAGE_PATH: &str = "files/doc.jpg";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
}

impl OutputFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
        }
    }
}

/// Encode a rendered raster. JPEG output drops the alpha channel.
pub fn encode_image(img: &RgbaImage, format: OutputFormat, jpeg_quality: u8) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    let mut cursor = Cursor::new(&mut data);
    match format {
        OutputFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(img.clone()).to_rgb8();
            rgb.write_to(&mut cursor, ImageOutputFormat::Jpeg(jpeg_quality.clamp(1, 100)))?;
        }
        OutputFormat::Png => img.write_to(&mut cursor, ImageOutputFormat::Png)?,
    }
    Ok(data)
}

pub fn to_data_uri(bytes: &[u8], format: OutputFormat) -> String {
    format!("data:{};base64,{}", format.mime(), STANDARD.encode(bytes))
}

/// Decode a `data:image/{jpeg,png,gif};base64,...` URI into raw file bytes
pub fn from_data_uri(uri: &str) -> Result<Vec<u8>> {
    let rest = uri
        .trim()
        .strip_prefix("data:image/")
        .ok_or_else(|| MapError::loader("not an image data URI"))?;
    let (mime, payload) = rest
        .split_once(";base64,")
        .ok_or_else(|| MapError::loader("data URI is not base64 encoded"))?;
    if !matches!(mime, "jpeg" | "jpg" | "png" | "gif") {
        return Err(MapError::loader(format!("unsupported image type {:?}", mime)));
    }
    STANDARD
        .decode(payload)
        .map_err(|e| MapError::loader(format!("invalid base64 payload: {}", e)))
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// KML document placing `files/doc.jpg` on the ground at `corners`
pub fn kml(name: &str, corners: &CornerSet) -> String {
    let name = escape_xml(name);
    // LatLonQuad wants lon,lat pairs counter-clockwise from the bottom left
    let quad = [
        corners.bottom_left,
        corners.bottom_right,
        corners.top_right,
        corners.top_left,
    ]
    .iter()
    .map(|p| format!("{},{}", p.lon, p.lat))
    .collect::<Vec<_>>()
    .join(" ");

    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2"
      xmlns:gx="http://www.google.com/kml/ext/2.2">
  <Document>
    <Folder>
      <name>{name}</name>
      <GroundOverlay>
        <name>{name}</name>
        <drawOrder>50</drawOrder>
        <Icon>
          <href>{href}</href>
        </Icon>
        <altitudeMode>clampToGround</altitudeMode>
        <gx:LatLonQuad>
          <coordinates>
            {quad}
          </coordinates>
        </gx:LatLonQuad>
      </GroundOverlay>
    </Folder>
  </Document>
</kml>"#,
        name = name,
        href = KMZ_IMAGE_PATH,
        quad = quad
    )
}

/// Zip `doc.kml` and the JPEG image into a KMZ package
pub fn kmz(name: &str, corners: &CornerSet, jpeg: &[u8]) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    writer.start_file("doc.kml", options)?;
    writer.write_all(kml(name, corners).as_bytes())?;

    writer.add_directory("files/", options)?;
    // already compressed
    writer.start_file(
        KMZ_IMAGE_PATH,
        FileOptions::default().compression_method(CompressionMethod::Stored),
    )?;
    writer.write_all(jpeg)?;

    Ok(writer.finish()?.into_inner())
}

/// `{name}_[blank_]{lat_lon x4}_.jpg`, corners rounded to 5 decimals
pub fn download_name(name: &str, corners: &CornerSet, include_route: bool) -> String {
    format!(
        "{}_{}{}_.jpg",
        name,
        if include_route { "" } else { "blank_" },
        corners.rounded().join("_")
    )
}

/// Recover the corners embedded in a filename by [`download_name`]
pub fn corners_from_filename(filename: &str) -> Result<CornerSet> {
    let invalid = || MapError::corners(format!("no corner coordinates in {:?}", filename));

    let (stem, ext) = filename.rsplit_once('.').ok_or_else(invalid)?;
    let ext = ext.to_ascii_lowercase();
    if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        return Err(invalid());
    }
    let stem = stem.strip_suffix('_').ok_or_else(invalid)?;

    let tokens: Vec<&str> = stem.rsplitn(9, '_').collect();
    // eight values plus whatever precedes the first underscore
    if tokens.len() != 9 {
        return Err(invalid());
    }
    let mut values: Vec<&str> = tokens[..8].to_vec();
    if !values.iter().all(|t| is_coordinate_token(t)) {
        return Err(invalid());
    }
    values.reverse();
    values.join(",").parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPoint;
    use image::Rgba;
    use std::io::Read;

    fn jukola() -> CornerSet {
        CornerSet::new(
            GeoPoint::new(61.45075, 24.18994),
            GeoPoint::new(61.44656, 24.24721),
            GeoPoint::new(61.42094, 24.23851),
            GeoPoint::new(61.42533, 24.18156),
        )
    }

    #[test]
    fn test_download_name() {
        assert_eq!(
            download_name("Jukola_1st_leg", &jukola(), false),
            "Jukola_1st_leg_blank_61.45075_24.18994_61.44656_24.24721_61.42094_24.23851_61.42533_24.18156_.jpg"
        );
        let unrounded = CornerSet::new(
            GeoPoint::new(1.123456789, -0.000001),
            GeoPoint::new(1.0, 2.0),
            GeoPoint::new(0.0, 2.0),
            GeoPoint::new(0.0, 0.0),
        );
        assert_eq!(
            download_name("map", &unrounded, true),
            "map_1.12346_0_1_2_0_2_0_0_.jpg"
        );
    }

    #[test]
    fn test_corners_from_filename() {
        let name = download_name("Jukola_1st_leg", &jukola(), false);
        assert_eq!(corners_from_filename(&name).unwrap(), jukola());

        let upper = name.replace(".jpg", ".JPEG");
        assert_eq!(corners_from_filename(&upper).unwrap(), jukola());

        let negative = "x_-1.5_-2_-1.5_2_1.5_2_1.5_-2_.webp";
        let c = corners_from_filename(negative).unwrap();
        assert_eq!(c.top_left, GeoPoint::new(-1.5, -2.0));
        assert_eq!(c.bottom_left, GeoPoint::new(1.5, -2.0));
    }

    #[test]
    fn test_corners_from_filename_rejects_malformed() {
        assert!(corners_from_filename("Jukola_1st_leg_blank.jpg").is_err());
        assert!(corners_from_filename("a_1_2_3_4_5_6_7_8_.tiff").is_err());
        assert!(corners_from_filename("a_1_2_3_4_5_6_7_8.jpg").is_err());
        assert!(corners_from_filename("a_1_2_3_4_5_6_7_.jpg").is_err());
        assert!(corners_from_filename("a_1_2_3_x_5_6_7_8_.jpg").is_err());
        assert!(corners_from_filename("a_91_2_3_4_5_6_7_8_.jpg").is_err());
    }

    #[test]
    fn test_kml_orders_quad_from_bottom_left() {
        let doc = kml("Leg <1>", &jukola());
        assert!(doc.contains("<name>Leg &lt;1&gt;</name>"));
        assert!(doc.contains("<href>files/doc.jpg</href>"));
        assert!(doc.contains("<drawOrder>50</drawOrder>"));
        assert!(doc.contains(
            "24.18156,61.42533 24.23851,61.42094 24.24721,61.44656 24.18994,61.45075"
        ));
    }

    #[test]
    fn test_kmz_contains_kml_and_image() {
        let jpeg = [0xff, 0xd8, 0xff, 0xe0, 1, 2, 3];
        let bytes = kmz("leg", &jukola(), &jpeg).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();

        let mut doc = String::new();
        archive
            .by_name("doc.kml")
            .unwrap()
            .read_to_string(&mut doc)
            .unwrap();
        assert!(doc.contains("gx:LatLonQuad"));

        let mut img = Vec::new();
        archive
            .by_name(KMZ_IMAGE_PATH)
            .unwrap()
            .read_to_end(&mut img)
            .unwrap();
        assert_eq!(img, jpeg);
    }

    #[test]
    fn test_encode_and_data_uri() {
        let img = RgbaImage::from_pixel(8, 4, Rgba([200, 10, 10, 255]));
        let jpeg = encode_image(&img, OutputFormat::Jpeg, 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xff, 0xd8]);

        let png = encode_image(&img, OutputFormat::Png, 80).unwrap();
        let uri = to_data_uri(&png, OutputFormat::Png);
        assert!(uri.starts_with("data:image/png;base64,"));
        assert_eq!(from_data_uri(&uri).unwrap(), png);

        assert!(from_data_uri("data:text/plain;base64,aGk=").is_err());
        assert!(from_data_uri("data:image/png,raw").is_err());
        assert!(from_data_uri("data:image/png;base64,!!!").is_err());
    }
}
