//! Code Encoder
//!
//! Produces a QR code image for a published document. Two payload modes:
//! - `EmbedDocument`: the canonical JSON itself (works offline, capacity bound)
//! - `Link`: a retrieval URL for the stored document (needs connectivity)
//!
//! Capacity is never silently exceeded: a payload that does not fit the
//! requested version and error-correction level fails with
//! [`EncodeError::PayloadTooLarge`].

use std::borrow::Cow;

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, GrayImage, ImageEncoder, Luma};
use qrcode::types::QrError;
use qrcode::{Color, EcLevel, QrCode, Version};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EncodeError;
use crate::publish::PublishedDocument;

/// Largest accepted image side in pixels
pub const MAX_IMAGE_SIDE: u32 = 8192;

const DARK: Luma<u8> = Luma([0]);
const LIGHT: Luma<u8> = Luma([255]);

/// QR error-correction level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCorrection {
    /// ~7% recovery
    L,
    /// ~15% recovery
    #[default]
    M,
    /// ~25% recovery
    Q,
    /// ~30% recovery
    H,
}

impl From<ErrorCorrection> for EcLevel {
    fn from(level: ErrorCorrection) -> Self {
        match level {
            ErrorCorrection::L => EcLevel::L,
            ErrorCorrection::M => EcLevel::M,
            ErrorCorrection::Q => EcLevel::Q,
            ErrorCorrection::H => EcLevel::H,
        }
    }
}

/// Encoder configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeOptions {
    pub error_correction: ErrorCorrection,
    /// Pixels per module
    pub pixel_size: u32,
    /// Quiet zone width in modules
    pub border: u32,
    /// Fixed symbol version 1..=40, smallest fitting version when unset
    pub version: Option<i16>,
}

impl Default for CodeOptions {
    fn default() -> Self {
        Self {
            error_correction: ErrorCorrection::M,
            pixel_size: 10,
            border: 5,
            version: None,
        }
    }
}

/// What goes into the code for a published document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CodePayloadMode {
    #[default]
    EmbedDocument,
    Link {
        base_url: String,
    },
}

impl CodePayloadMode {
    pub fn payload<'a>(&self, document: &'a PublishedDocument) -> Cow<'a, [u8]> {
        match self {
            CodePayloadMode::EmbedDocument => Cow::Borrowed(document.bytes()),
            CodePayloadMode::Link { base_url } => {
                Cow::Owned(retrieval_url(base_url, &document.id.to_string()).into_bytes())
            }
        }
    }
}

/// Retrieval address for a stored document
pub fn retrieval_url(base_url: &str, id: &str) -> String {
    format!("{}/product/{}/json", base_url.trim_end_matches('/'), id)
}

/// Encoded code image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeArtifact {
    /// Grayscale PNG
    pub png: Vec<u8>,
    pub version: i16,
    /// Modules per side, quiet zone excluded
    pub modules: usize,
    /// Image side length in pixels
    pub size_px: u32,
}

/// Deterministic QR encoder for a fixed configuration
#[derive(Debug, Clone)]
pub struct CodeEncoder {
    options: CodeOptions,
}

impl CodeEncoder {
    pub fn new(options: CodeOptions) -> Result<Self, EncodeError> {
        if options.pixel_size == 0 {
            return Err(EncodeError::InvalidOptions {
                message: "pixel_size must be at least 1".to_string(),
            });
        }
        if let Some(v) = options.version {
            if !(1..=40).contains(&v) {
                return Err(EncodeError::InvalidOptions {
                    message: format!("version {} is outside 1..=40", v),
                });
            }
        }

        // sized for the largest symbol the options allow
        let modules = 17 + 4 * u64::from(options.version.unwrap_or(40).unsigned_abs());
        let side = (modules + 2 * u64::from(options.border)).saturating_mul(u64::from(options.pixel_size));
        if side > u64::from(MAX_IMAGE_SIDE) {
            return Err(EncodeError::InvalidOptions {
                message: format!(
                    "pixel_size {} with border {} gives images up to {} px, limit is {}",
                    options.pixel_size, options.border, side, MAX_IMAGE_SIDE
                ),
            });
        }
        Ok(Self { options })
    }

    pub fn options(&self) -> &CodeOptions {
        &self.options
    }

    pub fn encode(&self, payload: &[u8]) -> Result<CodeArtifact, EncodeError> {
        let level = self.options.error_correction;
        let code = match self.options.version {
            Some(v) => QrCode::with_version(payload, Version::Normal(v), level.into()),
            None => QrCode::with_error_correction_level(payload, level.into()),
        }
        .map_err(|e| match e {
            QrError::DataTooLong => EncodeError::PayloadTooLarge {
                len: payload.len(),
                version: self.options.version,
                level,
            },
            other => EncodeError::Encoding {
                message: other.to_string(),
            },
        })?;

        let version = match code.version() {
            Version::Normal(v) | Version::Micro(v) => v,
        };
        let modules = code.width();
        let image = self.render(&code.to_colors(), modules)?;
        let size_px = image.width();

        let mut png = Vec::new();
        PngEncoder::new(&mut png)
            .write_image(image.as_raw(), size_px, image.height(), ExtendedColorType::L8)
            .map_err(|e| EncodeError::Encoding {
                message: e.to_string(),
            })?;

        debug!(
            payload_bytes = payload.len(),
            version, modules, size_px, "encoded code image"
        );

        Ok(CodeArtifact {
            png,
            version,
            modules,
            size_px,
        })
    }

    fn render(&self, colors: &[Color], modules: usize) -> Result<GrayImage, EncodeError> {
        let pixel = self.options.pixel_size;
        let border = self.options.border;
        let side = u32::try_from(modules)
            .ok()
            .and_then(|m| m.checked_add(border.checked_mul(2)?))
            .and_then(|m| m.checked_mul(pixel))
            .ok_or_else(|| EncodeError::InvalidOptions {
                message: "image dimensions overflow".to_string(),
            })?;

        let mut image = GrayImage::from_pixel(side, side, LIGHT);
        for (i, color) in colors.iter().enumerate() {
            if *color != Color::Dark {
                continue;
            }
            let mx = (i % modules) as u32 + border;
            let my = (i / modules) as u32 + border;
            for dy in 0..pixel {
                for dx in 0..pixel {
                    image.put_pixel(mx * pixel + dx, my * pixel + dy, DARK);
                }
            }
        }
        Ok(image)
    }
}

/// One-shot encode with explicit settings
pub fn encode(
    payload: impl AsRef<[u8]>,
    error_correction: ErrorCorrection,
    pixel_size: u32,
    border: u32,
) -> Result<CodeArtifact, EncodeError> {
    CodeEncoder::new(CodeOptions {
        error_correction,
        pixel_size,
        border,
        version: None,
    })?
    .encode(payload.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

    #[test]
    fn test_encode_is_deterministic() {
        let a = encode(b"{\"identification\":\"Mirror left\"}", ErrorCorrection::M, 4, 2).unwrap();
        let b = encode(b"{\"identification\":\"Mirror left\"}", ErrorCorrection::M, 4, 2).unwrap();
        assert_eq!(a, b);
        assert!(a.png.starts_with(PNG_MAGIC));
    }

    #[test]
    fn test_image_size_follows_modules_border_and_pixels() {
        let artifact = encode("hello", ErrorCorrection::L, 3, 4).unwrap();
        assert_eq!(artifact.version, 1);
        assert_eq!(artifact.modules, 21);
        assert_eq!(artifact.size_px, (21 + 2 * 4) * 3);
    }

    #[test]
    fn test_fixed_version_overflow_is_reported() {
        let encoder = CodeEncoder::new(CodeOptions {
            version: Some(1),
            error_correction: ErrorCorrection::H,
            ..CodeOptions::default()
        })
        .unwrap();
        let payload = vec![b'x'; 200];
        assert_eq!(
            encoder.encode(&payload).unwrap_err(),
            EncodeError::PayloadTooLarge {
                len: 200,
                version: Some(1),
                level: ErrorCorrection::H,
            }
        );
    }

    #[test]
    fn test_auto_fit_overflow_is_reported() {
        let payload = vec![b'x'; 4000];
        let err = encode(&payload, ErrorCorrection::H, 1, 0).unwrap_err();
        assert!(matches!(
            err,
            EncodeError::PayloadTooLarge {
                len: 4000,
                version: None,
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_options() {
        assert!(CodeEncoder::new(CodeOptions {
            pixel_size: 0,
            ..CodeOptions::default()
        })
        .is_err());
        assert!(CodeEncoder::new(CodeOptions {
            version: Some(41),
            ..CodeOptions::default()
        })
        .is_err());
    }

    #[test]
    fn test_oversized_images_are_rejected_up_front() {
        let err = CodeEncoder::new(CodeOptions {
            pixel_size: 60_000,
            ..CodeOptions::default()
        })
        .unwrap_err();
        assert!(matches!(err, EncodeError::InvalidOptions { .. }));

        assert!(CodeEncoder::new(CodeOptions {
            border: u32::MAX,
            ..CodeOptions::default()
        })
        .is_err());

        // a small fixed version leaves room for larger pixels
        let encoder = CodeEncoder::new(CodeOptions {
            pixel_size: 100,
            border: 4,
            version: Some(2),
            ..CodeOptions::default()
        })
        .unwrap();
        assert_eq!(encoder.encode(b"x").unwrap().size_px, (25 + 8) * 100);
    }

    #[test]
    fn test_retrieval_url_trims_trailing_slash() {
        assert_eq!(
            retrieval_url("https://dpp.example.com/", "abc"),
            "https://dpp.example.com/product/abc/json"
        );
    }
}
