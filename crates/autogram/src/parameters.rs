use std::fmt;

use serde::{Deserialize, Serialize};

/// Signature format requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
    #[serde(rename = "XAdES")]
    Xades,
    #[serde(rename = "PAdES")]
    Pades,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Level {
    BaselineB,
    BaselineT,
    BaselineLt,
    BaselineLta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Container {
    #[serde(rename = "ASiC_S")]
    AsicS,
    #[serde(rename = "ASiC_E")]
    AsicE,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Packaging {
    Enveloped,
    Enveloping,
    Detached,
    InternallyDetached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DigestAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Canonicalization {
    Inclusive,
    Exclusive,
}

/// External description of the signature a caller wants, as it arrives on the wire.
///
/// Nothing here is validated beyond the enum names; the
/// [`mapper`](crate::mapper) decides which combinations are actually supported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureParameters {
    pub format: Format,
    pub level: Level,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<Container>,
    pub packaging: Packaging,
    pub digest_algorithm: DigestAlgorithm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info_canonicalization: Option<Canonicalization>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties_canonicalization: Option<Canonicalization>,
    #[serde(default)]
    pub en319132: bool,
    pub payload_mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformation: Option<String>,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Xades => f.write_str("XAdES"),
            Format::Pades => f.write_str("PAdES"),
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::BaselineB => "BASELINE_B",
            Level::BaselineT => "BASELINE_T",
            Level::BaselineLt => "BASELINE_LT",
            Level::BaselineLta => "BASELINE_LTA",
        })
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Container::AsicS => "ASiC_S",
            Container::AsicE => "ASiC_E",
        })
    }
}

impl fmt::Display for Packaging {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Packaging::Enveloped => "ENVELOPED",
            Packaging::Enveloping => "ENVELOPING",
            Packaging::Detached => "DETACHED",
            Packaging::InternallyDetached => "INTERNALLY_DETACHED",
        })
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DigestAlgorithm::Sha256 => "SHA256",
            DigestAlgorithm::Sha384 => "SHA384",
            DigestAlgorithm::Sha512 => "SHA512",
        })
    }
}

impl fmt::Display for Canonicalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Canonicalization::Inclusive => "INCLUSIVE",
            Canonicalization::Exclusive => "EXCLUSIVE",
        })
    }
}
