use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::autogram::AutogramConfig;
use crate::job::KeyPolicy;
use crate::parameters::{
    Canonicalization, Container, DigestAlgorithm, Format, Level, Packaging, SignatureParameters,
};
use crate::provider::{AutoPicker, ConsolePicker, KeyPicker, SigningKeyProvider};
use crate::token::{SoftwareTokenDriver, TokenDriver};

#[derive(Parser, Debug)]
#[command(name = "autogram", version, about = "Local document signing service")]
pub struct Args {
    /// Seed of a deterministic software token. Repeat to register several tokens.
    #[arg(long, env = "AUTOGRAM_SOFTWARE_TOKEN_SEED", value_delimiter = ',', global = true)]
    pub software_token_seed: Vec<String>,

    /// Pick the first driver and key instead of asking on the terminal.
    #[arg(long, env = "AUTOGRAM_AUTO_SELECT", global = true)]
    pub auto_select: bool,

    /// Bound on the signing phase of a job. Key selection is not bounded.
    #[arg(long, env = "AUTOGRAM_JOB_TIMEOUT_SECS", global = true)]
    pub job_timeout_secs: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept signing requests over HTTP.
    Serve(ServeArgs),
    /// Sign a single local file.
    Sign(SignArgs),
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    #[arg(long, env = "AUTOGRAM_HOST", default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, env = "AUTOGRAM_PORT", default_value_t = 37200)]
    pub port: u16,
    /// Let HTTP requests prompt for a key when none is active, instead of failing with NOT_READY.
    #[arg(long, env = "AUTOGRAM_ALLOW_KEY_PROMPT")]
    pub allow_key_prompt: bool,
    #[arg(long, env = "AUTOGRAM_MAX_BODY_BYTES", default_value_t = 32 * 1024 * 1024)]
    pub max_body_bytes: usize,
    /// Select the signing key before accepting requests.
    #[arg(long)]
    pub preselect_key: bool,
}

#[derive(clap::Args, Debug)]
pub struct SignArgs {
    pub file: PathBuf,
    /// JSON file with signature parameters. Defaults depend on the file extension.
    #[arg(long)]
    pub parameters: Option<PathBuf>,
    /// Where to write the result. Defaults to `<FILE>.signed.json`.
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

/// Transport settings of the HTTP surface.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: SocketAddr,
    pub key_policy: KeyPolicy,
    pub max_body_bytes: usize,
}

impl Args {
    pub fn autogram_config(&self) -> AutogramConfig {
        AutogramConfig {
            job_timeout: self.job_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn drivers(&self) -> Vec<Arc<dyn TokenDriver>> {
        self.software_token_seed
            .iter()
            .enumerate()
            .map(|(i, seed)| {
                Arc::new(SoftwareTokenDriver::from_seed(
                    format!("Software token {}", i + 1),
                    seed,
                )) as Arc<dyn TokenDriver>
            })
            .collect()
    }

    pub fn provider(&self) -> SigningKeyProvider {
        let picker: Arc<dyn KeyPicker> = if self.auto_select {
            Arc::new(AutoPicker)
        } else {
            Arc::new(ConsolePicker::default())
        };
        SigningKeyProvider::new(self.drivers(), picker)
    }
}

impl ServeArgs {
    pub fn server_config(&self) -> anyhow::Result<ServerConfig> {
        let address = format!("{}:{}", self.host, self.port).parse()?;
        Ok(ServerConfig {
            address,
            key_policy: if self.allow_key_prompt {
                KeyPolicy::PromptIfMissing
            } else {
                KeyPolicy::RequireActive
            },
            max_body_bytes: self.max_body_bytes,
        })
    }
}

impl SignArgs {
    pub fn output_path(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| {
            let mut name = self.file.clone().into_os_string();
            name.push(".signed.json");
            PathBuf::from(name)
        })
    }
}

/// Parameters used by `sign` when none are given: PAdES for PDFs, XAdES in an
/// ASiC-E container for everything else.
pub fn default_parameters(file: &Path) -> SignatureParameters {
    let extension = file
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    let xades = SignatureParameters {
        format: Format::Xades,
        level: Level::BaselineB,
        container: Some(Container::AsicE),
        packaging: Packaging::Enveloping,
        digest_algorithm: DigestAlgorithm::Sha256,
        info_canonicalization: Some(Canonicalization::Inclusive),
        properties_canonicalization: Some(Canonicalization::Inclusive),
        en319132: false,
        payload_mime_type: "application/octet-stream;base64".into(),
        schema: None,
        transformation: None,
    };

    match extension.as_deref() {
        Some("pdf") => SignatureParameters {
            format: Format::Pades,
            container: None,
            packaging: Packaging::Enveloped,
            info_canonicalization: None,
            properties_canonicalization: None,
            payload_mime_type: "application/pdf;base64".into(),
            ..xades
        },
        Some("xml") => SignatureParameters {
            payload_mime_type: "application/xml;base64".into(),
            ..xades
        },
        _ => xades,
    }
}
