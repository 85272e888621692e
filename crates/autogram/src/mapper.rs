//! Translation of caller-facing [`SignatureParameters`] into the concrete
//! configuration handed to the signature engine.
//!
//! Every single-field mapper is an exact-match lookup in a fixed table. A value
//! missing from its table is an [`SigningError::UnsupportedParameter`] naming the
//! field, so the supported matrix is exactly the union of the tables below.

use serde::Serialize;

use crate::document::DocumentKind;
use crate::error::SigningError;
use crate::parameters::{
    Canonicalization, Container, DigestAlgorithm, Format, Level, Packaging, SignatureParameters,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SignatureLevel {
    #[serde(rename = "XAdES-BASELINE-B")]
    XadesBaselineB,
    #[serde(rename = "XAdES-BASELINE-T")]
    XadesBaselineT,
    #[serde(rename = "PAdES-BASELINE-B")]
    PadesBaselineB,
    #[serde(rename = "PAdES-BASELINE-T")]
    PadesBaselineT,
}

impl SignatureLevel {
    /// Whether the engine has to obtain a signature timestamp.
    pub fn requires_timestamp(self) -> bool {
        matches!(self, SignatureLevel::XadesBaselineT | SignatureLevel::PadesBaselineT)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContainerKind {
    #[serde(rename = "ASiC-S")]
    AsicS,
    #[serde(rename = "ASiC-E")]
    AsicE,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignaturePackaging {
    Enveloped,
    Enveloping,
    Detached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DigestMethod {
    #[serde(rename = "SHA-256")]
    Sha256,
    #[serde(rename = "SHA-384")]
    Sha384,
    #[serde(rename = "SHA-512")]
    Sha512,
}

impl DigestMethod {
    pub fn uri(self) -> &'static str {
        match self {
            DigestMethod::Sha256 => "http://www.w3.org/2001/04/xmlenc#sha256",
            DigestMethod::Sha384 => "http://www.w3.org/2001/04/xmldsig-more#sha384",
            DigestMethod::Sha512 => "http://www.w3.org/2001/04/xmlenc#sha512",
        }
    }

    /// Output length in bytes.
    pub fn output_len(self) -> usize {
        match self {
            DigestMethod::Sha256 => 32,
            DigestMethod::Sha384 => 48,
            DigestMethod::Sha512 => 64,
        }
    }
}

pub const C14N_INCLUSIVE: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
pub const C14N_EXCLUSIVE: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

const LEVELS: &[((Format, Level), SignatureLevel)] = &[
    ((Format::Xades, Level::BaselineB), SignatureLevel::XadesBaselineB),
    ((Format::Xades, Level::BaselineT), SignatureLevel::XadesBaselineT),
    ((Format::Pades, Level::BaselineB), SignatureLevel::PadesBaselineB),
    ((Format::Pades, Level::BaselineT), SignatureLevel::PadesBaselineT),
];

const CONTAINERS: &[(Container, ContainerKind)] = &[
    (Container::AsicS, ContainerKind::AsicS),
    (Container::AsicE, ContainerKind::AsicE),
];

const DIGESTS: &[(DigestAlgorithm, DigestMethod)] = &[
    (DigestAlgorithm::Sha256, DigestMethod::Sha256),
    (DigestAlgorithm::Sha384, DigestMethod::Sha384),
    (DigestAlgorithm::Sha512, DigestMethod::Sha512),
];

const PACKAGINGS: &[(Packaging, SignaturePackaging)] = &[
    (Packaging::Enveloped, SignaturePackaging::Enveloped),
    (Packaging::Enveloping, SignaturePackaging::Enveloping),
    (Packaging::Detached, SignaturePackaging::Detached),
];

const CANONICALIZATIONS: &[(Canonicalization, &str)] = &[
    (Canonicalization::Inclusive, C14N_INCLUSIVE),
    (Canonicalization::Exclusive, C14N_EXCLUSIVE),
];

fn lookup<K: PartialEq + Copy, V: Copy>(table: &[(K, V)], key: K) -> Option<V> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

fn unsupported(field: &'static str, value: impl ToString) -> SigningError {
    SigningError::UnsupportedParameter {
        field,
        value: value.to_string(),
    }
}

pub fn map_level(format: Format, level: Level) -> Result<SignatureLevel, SigningError> {
    lookup(LEVELS, (format, level)).ok_or_else(|| unsupported("level", format!("{level} for {format}")))
}

pub fn map_container(container: Container) -> Result<ContainerKind, SigningError> {
    lookup(CONTAINERS, container).ok_or_else(|| unsupported("container", container))
}

pub fn map_digest_algorithm(digest: DigestAlgorithm) -> Result<DigestMethod, SigningError> {
    lookup(DIGESTS, digest).ok_or_else(|| unsupported("digestAlgorithm", digest))
}

pub fn map_packaging(packaging: Packaging) -> Result<SignaturePackaging, SigningError> {
    lookup(PACKAGINGS, packaging).ok_or_else(|| unsupported("packaging", packaging))
}

pub fn map_canonicalization(
    field: &'static str,
    canonicalization: Canonicalization,
) -> Result<&'static str, SigningError> {
    lookup(CANONICALIZATIONS, canonicalization).ok_or_else(|| unsupported(field, canonicalization))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct XadesConfiguration {
    pub level: SignatureLevel,
    pub container: Option<ContainerKind>,
    pub packaging: SignaturePackaging,
    pub digest: DigestMethod,
    pub signing_certificate_digest: DigestMethod,
    pub signed_info_canonicalization: &'static str,
    pub signed_properties_canonicalization: &'static str,
    pub en319132: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PadesConfiguration {
    pub level: SignatureLevel,
    pub packaging: SignaturePackaging,
    pub digest: DigestMethod,
}

/// Fully validated configuration for one signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "format")]
pub enum SigningConfiguration {
    #[serde(rename = "XAdES")]
    Xades(XadesConfiguration),
    #[serde(rename = "PAdES")]
    Pades(PadesConfiguration),
}

impl SigningConfiguration {
    pub fn level(&self) -> SignatureLevel {
        match self {
            SigningConfiguration::Xades(config) => config.level,
            SigningConfiguration::Pades(config) => config.level,
        }
    }

    pub fn digest(&self) -> DigestMethod {
        match self {
            SigningConfiguration::Xades(config) => config.digest,
            SigningConfiguration::Pades(config) => config.digest,
        }
    }

    /// Checks that a classified document can carry this kind of signature.
    pub fn check_document(&self, kind: DocumentKind) -> Result<(), SigningError> {
        match self {
            SigningConfiguration::Pades(_) if kind != DocumentKind::Pdf => {
                Err(unsupported("format", format!("PAdES for {kind} document")))
            }
            SigningConfiguration::Xades(XadesConfiguration {
                container: None,
                packaging: SignaturePackaging::Enveloped,
                ..
            }) if kind != DocumentKind::Xml => Err(unsupported(
                "packaging",
                format!("ENVELOPED XAdES for {kind} document"),
            )),
            _ => Ok(()),
        }
    }
}

/// Maps and validates a complete parameter set.
pub fn map(params: &SignatureParameters) -> Result<SigningConfiguration, SigningError> {
    match params.format {
        Format::Xades => map_xades(params).map(SigningConfiguration::Xades),
        Format::Pades => map_pades(params).map(SigningConfiguration::Pades),
    }
}

fn map_xades(params: &SignatureParameters) -> Result<XadesConfiguration, SigningError> {
    let level = map_level(Format::Xades, params.level)?;
    let container = params.container.map(map_container).transpose()?;
    let packaging = map_packaging(params.packaging)?;
    let digest = map_digest_algorithm(params.digest_algorithm)?;

    // An ASiC container already envelops the payload.
    if container.is_some() && packaging == SignaturePackaging::Enveloped {
        return Err(unsupported("packaging", "ENVELOPED inside an ASiC container"));
    }

    let info = params
        .info_canonicalization
        .ok_or_else(|| unsupported("infoCanonicalization", "missing"))?;
    let properties = params
        .properties_canonicalization
        .ok_or_else(|| unsupported("propertiesCanonicalization", "missing"))?;

    Ok(XadesConfiguration {
        level,
        container,
        packaging,
        digest,
        signing_certificate_digest: digest,
        signed_info_canonicalization: map_canonicalization("infoCanonicalization", info)?,
        signed_properties_canonicalization: map_canonicalization(
            "propertiesCanonicalization",
            properties,
        )?,
        en319132: params.en319132,
    })
}

fn map_pades(params: &SignatureParameters) -> Result<PadesConfiguration, SigningError> {
    let level = map_level(Format::Pades, params.level)?;
    let packaging = map_packaging(params.packaging)?;
    let digest = map_digest_algorithm(params.digest_algorithm)?;

    if packaging != SignaturePackaging::Enveloped {
        return Err(unsupported("packaging", format!("{} for PAdES", params.packaging)));
    }

    Ok(PadesConfiguration {
        level,
        packaging,
        digest,
    })
}
