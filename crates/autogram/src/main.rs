use std::sync::Arc;

use anyhow::Context;
use autogram::config::{Args, Command, SignArgs, default_parameters};
use autogram::document::MimeType;
use autogram::{
    Autogram, CallbackResponder, Document, EnvelopeEngine, KeyPolicy, SignatureParameters,
    SigningJob, logging, server,
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use clap::Parser;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init()?;
    let args = Args::parse();

    let autogram = Arc::new(Autogram::new(
        args.provider(),
        Arc::new(EnvelopeEngine),
        args.autogram_config(),
    ));

    match &args.command {
        Command::Serve(serve) => {
            let config = serve.server_config()?;
            if serve.preselect_key {
                autogram
                    .pick_signing_key(&CancellationToken::new())
                    .await
                    .context("selecting the signing key")?;
            }
            server::run(config, autogram).await
        }
        Command::Sign(sign) => sign_file(autogram, sign).await,
    }
}

async fn sign_file(autogram: Arc<Autogram>, args: &SignArgs) -> anyhow::Result<()> {
    let parameters: SignatureParameters = match &args.parameters {
        Some(path) => {
            let raw = tokio::fs::read(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_slice(&raw)
                .with_context(|| format!("parsing parameters from {}", path.display()))?
        }
        None => default_parameters(&args.file),
    };

    let bytes = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("reading {}", args.file.display()))?;
    let mime_type: MimeType = parameters.payload_mime_type.parse()?;
    let content = if mime_type.is_base64() {
        STANDARD.encode(&bytes)
    } else {
        String::from_utf8(bytes).context("document is not valid UTF-8; use a ;base64 MIME type")?
    };
    let document = Document {
        id: None,
        title: args
            .file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned()),
        content,
        legal_effect: None,
    };

    let cancel = CancellationToken::new();
    let (tx, rx) = oneshot::channel();
    let job = SigningJob::new(
        document,
        parameters,
        CallbackResponder::new(move |outcome| {
            let _ = tx.send(outcome);
        }),
    )
    .with_key_policy(KeyPolicy::PromptIfMissing)
    .with_cancellation(cancel.clone());
    autogram.submit(job);

    let outcome = tokio::select! {
        outcome = rx => outcome.context("job finished without a result")?,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            return Err(anyhow::anyhow!("interrupted"));
        }
    };
    let signed = outcome?;

    let output = args.output_path();
    tokio::fs::write(&output, &signed.content)
        .await
        .with_context(|| format!("writing {}", output.display()))?;
    info!(output = %output.display(), signed_by = %signed.certificate.subject, "document signed");

    Ok(())
}
