//! Inbound document classification.
//!
//! A [`Document`] arrives as text with a declared MIME type. [`classify`] parses
//! that type, decodes base64 content exactly once and produces an immutable
//! [`TypedDocument`].

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use quick_xml::Reader;
use quick_xml::events::Event;
use serde::{Deserialize, Serialize};

use crate::error::SigningError;

/// Document as submitted by a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legal_effect: Option<String>,
}

/// Parsed `type/subtype; params` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeType {
    kind: String,
    subtype: String,
    params: Vec<(String, Option<String>)>,
}

impl MimeType {
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn subtype(&self) -> &str {
        &self.subtype
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .and_then(|(_, value)| value.as_deref())
    }

    /// Both the bare `;base64` flag and `encoding=base64` are accepted.
    pub fn is_base64(&self) -> bool {
        self.params.iter().any(|(key, value)| {
            (key == "base64" && value.is_none())
                || (key == "encoding" && value.as_deref() == Some("base64"))
        })
    }

    pub fn is_xml(&self) -> bool {
        matches!(
            (self.kind.as_str(), self.subtype.as_str()),
            ("application", "xml") | ("text", "xml")
        ) || self.subtype.ends_with("+xml")
    }

    pub fn is_pdf(&self) -> bool {
        self.kind == "application" && self.subtype == "pdf"
    }

    pub fn is_octet_stream(&self) -> bool {
        self.kind == "application" && self.subtype == "octet-stream"
    }
}

fn is_token(value: &str) -> bool {
    !value.is_empty()
        && value.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$&-^_.+".contains(&b)
        })
}

impl FromStr for MimeType {
    type Err = SigningError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let malformed = || SigningError::MalformedMimeType {
            value: value.to_string(),
        };

        let mut parts = value.split(';');
        let essence = parts.next().unwrap_or_default().trim();
        let (kind, subtype) = essence.split_once('/').ok_or_else(malformed)?;
        if !is_token(kind) || !is_token(subtype) {
            return Err(malformed());
        }

        let mut params = Vec::new();
        for param in parts {
            let param = param.trim();
            if param.is_empty() {
                continue;
            }
            match param.split_once('=') {
                Some((key, raw)) => {
                    let key = key.trim();
                    let raw = raw.trim().trim_matches('"');
                    if !is_token(key) || raw.is_empty() {
                        return Err(malformed());
                    }
                    params.push((key.to_ascii_lowercase(), Some(raw.to_ascii_lowercase())));
                }
                None if is_token(param) => params.push((param.to_ascii_lowercase(), None)),
                None => return Err(malformed()),
            }
        }

        Ok(MimeType {
            kind: kind.to_ascii_lowercase(),
            subtype: subtype.to_ascii_lowercase(),
            params,
        })
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.subtype)?;
        for (key, value) in &self.params {
            match value {
                Some(value) => write!(f, "; {key}={value}")?,
                None => write!(f, "; {key}")?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Xml,
    Pdf,
    Binary,
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DocumentKind::Xml => "XML",
            DocumentKind::Pdf => "PDF",
            DocumentKind::Binary => "binary",
        })
    }
}

/// Descriptive fields shared by every document variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInfo {
    pub id: Option<String>,
    pub title: Option<String>,
    pub legal_effect: Option<String>,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedDocument {
    Xml {
        info: DocumentInfo,
        content: Vec<u8>,
        schema: Option<String>,
        transformation: Option<String>,
    },
    Pdf {
        info: DocumentInfo,
        content: Vec<u8>,
    },
    Binary {
        info: DocumentInfo,
        content: Vec<u8>,
    },
}

impl TypedDocument {
    pub fn kind(&self) -> DocumentKind {
        match self {
            TypedDocument::Xml { .. } => DocumentKind::Xml,
            TypedDocument::Pdf { .. } => DocumentKind::Pdf,
            TypedDocument::Binary { .. } => DocumentKind::Binary,
        }
    }

    pub fn info(&self) -> &DocumentInfo {
        match self {
            TypedDocument::Xml { info, .. }
            | TypedDocument::Pdf { info, .. }
            | TypedDocument::Binary { info, .. } => info,
        }
    }

    pub fn content(&self) -> &[u8] {
        match self {
            TypedDocument::Xml { content, .. }
            | TypedDocument::Pdf { content, .. }
            | TypedDocument::Binary { content, .. } => content,
        }
    }
}

fn decode(field: &'static str, input: &str) -> Result<Vec<u8>, SigningError> {
    // Line breaks are common in base64 pasted from other tools.
    let compact: String = input.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| SigningError::DecodingFailed {
            field,
            reason: e.to_string(),
        })
}

/// Decodes an optional auxiliary text field. Blank values count as absent.
fn decode_text(
    field: &'static str,
    input: Option<&str>,
    is_base64: bool,
) -> Result<Option<String>, SigningError> {
    let Some(input) = input.filter(|value| !value.trim().is_empty()) else {
        return Ok(None);
    };
    if !is_base64 {
        return Ok(Some(input.to_string()));
    }
    let bytes = decode(field, input)?;
    String::from_utf8(bytes)
        .map(Some)
        .map_err(|e| SigningError::DecodingFailed {
            field,
            reason: e.to_string(),
        })
}

/// Checks that `content` is a single well-formed XML element tree and returns
/// the local name of its root element.
fn check_xml(field: &'static str, content: &[u8]) -> Result<String, SigningError> {
    let malformed = |reason: String| SigningError::MalformedContent { field, reason };

    let mut reader = Reader::from_reader(content);
    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut roots = 0usize;
    let mut root = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(start)) => {
                if depth == 0 {
                    roots += 1;
                    root = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
                }
                depth += 1;
            }
            Ok(Event::End(_)) => depth = depth.saturating_sub(1),
            Ok(Event::Empty(empty)) if depth == 0 => {
                roots += 1;
                root = String::from_utf8_lossy(empty.local_name().as_ref()).into_owned();
            }
            Ok(Event::Text(text)) if depth == 0 => {
                if !text.iter().all(|b| b.is_ascii_whitespace()) {
                    return Err(malformed("text outside of the root element".into()));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(malformed(format!(
                    "at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
        }
        buf.clear();
    }

    match (roots, depth) {
        (0, _) => Err(malformed("no root element".into())),
        (_, open) if open > 0 => Err(malformed(format!("{open} unclosed element(s)"))),
        (1, 0) => Ok(root),
        (n, _) => Err(malformed(format!("{n} root elements"))),
    }
}

/// Checks an auxiliary XML document (XSD or XSLT) and the name of its root element.
fn check_auxiliary(
    field: &'static str,
    content: Option<&str>,
    roots: &[&str],
) -> Result<(), SigningError> {
    let Some(content) = content else {
        return Ok(());
    };
    let root = check_xml(field, content.as_bytes())?;
    if roots.contains(&root.as_str()) {
        Ok(())
    } else {
        Err(SigningError::MalformedContent {
            field,
            reason: format!("root element is <{root}>, expected <{}>", roots.join("> or <")),
        })
    }
}

/// Turns a raw document plus its declared MIME type into a typed, decoded document.
///
/// Schema and transformation are only meaningful for XML and are ignored otherwise.
pub fn classify(
    document: &Document,
    declared_mime_type: &str,
    schema: Option<&str>,
    transformation: Option<&str>,
) -> Result<TypedDocument, SigningError> {
    let mime_type: MimeType = declared_mime_type.parse()?;
    let is_base64 = mime_type.is_base64();

    let info = DocumentInfo {
        id: document.id.clone(),
        title: document.title.clone(),
        legal_effect: document.legal_effect.clone(),
        mime_type: mime_type.to_string(),
    };

    let content = || -> Result<Vec<u8>, SigningError> {
        if is_base64 {
            decode("content", &document.content)
        } else {
            Ok(document.content.as_bytes().to_vec())
        }
    };

    if mime_type.is_xml() {
        let content = content()?;
        let schema = decode_text("schema", schema, is_base64)?;
        let transformation = decode_text("transformation", transformation, is_base64)?;
        check_xml("content", &content)?;
        check_auxiliary("schema", schema.as_deref(), &["schema"])?;
        check_auxiliary(
            "transformation",
            transformation.as_deref(),
            &["stylesheet", "transform"],
        )?;
        Ok(TypedDocument::Xml {
            info,
            content,
            schema,
            transformation,
        })
    } else if mime_type.is_pdf() {
        Ok(TypedDocument::Pdf {
            info,
            content: content()?,
        })
    } else if mime_type.is_octet_stream() {
        Ok(TypedDocument::Binary {
            info,
            content: content()?,
        })
    } else {
        Err(SigningError::UnsupportedMimeType {
            value: declared_mime_type.to_string(),
        })
    }
}
