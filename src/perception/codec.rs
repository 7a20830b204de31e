// PNG/base64 helpers shared by the broker wire format, compositor and model client.
use base64::Engine as _;
use image::RgbaImage;

use crate::errors::{HeatloopError, HeatloopResult};

pub fn encode_png(img: &RgbaImage) -> HeatloopResult<Vec<u8>> {
    let mut out = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
        .map_err(|e| HeatloopError::Geometry(format!("PNG encode: {e}")))?;
    Ok(out)
}

pub fn decode_rgba(bytes: &[u8]) -> HeatloopResult<RgbaImage> {
    Ok(image::load_from_memory(bytes)?.to_rgba8())
}

/// Width and height from the image header without decoding pixels.
pub fn image_dimensions(bytes: &[u8]) -> HeatloopResult<(u32, u32)> {
    let reader = image::ImageReader::new(std::io::Cursor::new(bytes)).with_guessed_format()?;
    Ok(reader.into_dimensions()?)
}

pub fn to_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn from_base64(text: &str) -> HeatloopResult<Vec<u8>> {
    Ok(base64::engine::general_purpose::STANDARD.decode(text)?)
}

/// serde adapter carrying binary image payloads as base64 strings.
pub mod base64_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::to_base64(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::from_base64(&text).map_err(serde::de::Error::custom)
    }
}
