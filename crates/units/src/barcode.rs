//! Identity & printable codes for physical units.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use qrcode::QrCode;
use qrcode::render::svg;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use depot_core::{DomainError, DomainResult, ValueObject};

/// Longest barcode accepted; keeps every code within a scannable QR version.
pub const MAX_BARCODE_LEN: usize = 128;

/// `-` plus a hyphenated UUID.
const GENERATED_SUFFIX_LEN: usize = 37;

/// Scanner-readable unit code. Globally unique and immutable once assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Barcode(String);

impl ValueObject for Barcode {}

impl Barcode {
    /// Validate a caller-supplied barcode.
    pub fn parse(raw: impl AsRef<str>) -> DomainResult<Self> {
        let value = raw.as_ref().trim();
        if value.is_empty() {
            return Err(DomainError::validation("barcode cannot be empty"));
        }
        if value.len() > MAX_BARCODE_LEN {
            return Err(DomainError::validation(format!(
                "barcode longer than {MAX_BARCODE_LEN} bytes"
            )));
        }
        if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(DomainError::validation(
                "barcode cannot contain whitespace or control characters",
            ));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl core::fmt::Display for Barcode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Produces collision-resistant barcodes of the form `<PREFIX>-<uuid>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarcodeGenerator {
    prefix: String,
}

impl Default for BarcodeGenerator {
    fn default() -> Self {
        Self {
            prefix: "UNIT".to_string(),
        }
    }
}

impl BarcodeGenerator {
    /// Longest prefix whose generated barcodes still fit `MAX_BARCODE_LEN`.
    pub const MAX_PREFIX_LEN: usize = MAX_BARCODE_LEN - GENERATED_SUFFIX_LEN;

    pub fn new(prefix: impl Into<String>) -> DomainResult<Self> {
        let prefix = Barcode::parse(prefix.into())?.into_inner();
        if prefix.len() > Self::MAX_PREFIX_LEN {
            return Err(DomainError::validation(format!(
                "barcode prefix longer than {} bytes",
                Self::MAX_PREFIX_LEN
            )));
        }
        Ok(Self { prefix })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn generate(&self) -> Barcode {
        Barcode(format!("{}-{}", self.prefix, Uuid::now_v7()))
    }

    /// Use the caller's barcode when present, otherwise generate one.
    pub fn assign(&self, supplied: Option<Barcode>) -> Barcode {
        supplied.unwrap_or_else(|| self.generate())
    }
}

/// Scannable QR rendering of a barcode.
///
/// Rendering is deterministic: the same barcode always yields the same image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisualCode {
    svg: String,
}

impl VisualCode {
    pub const MEDIA_TYPE: &'static str = "image/svg+xml";

    pub fn render(barcode: &Barcode) -> DomainResult<Self> {
        let code = QrCode::new(barcode.as_str().as_bytes())
            .map_err(|e| DomainError::validation(format!("barcode cannot be encoded as QR: {e}")))?;
        let svg = code
            .render::<svg::Color<'_>>()
            .min_dimensions(200, 200)
            .quiet_zone(true)
            .build();
        Ok(Self { svg })
    }

    /// Raw image bytes, suitable for a label printer.
    pub fn svg_bytes(&self) -> &[u8] {
        self.svg.as_bytes()
    }

    /// `data:` URL persisted in `physical_units.qr_code`.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", Self::MEDIA_TYPE, STANDARD.encode(self.svg.as_bytes()))
    }
}
