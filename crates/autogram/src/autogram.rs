//! The signing orchestrator.
//!
//! [`Autogram`] owns the active signing key and drives every submitted
//! [`SigningJob`] through validation, key resolution and the two-phase engine
//! protocol, ending in exactly one delivery to the job's responder.

use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use anyhow::anyhow;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};

use crate::document::{self, TypedDocument};
use crate::engine::{EngineParameters, SignatureEngine};
use crate::error::SigningError;
use crate::job::{JobStage, KeyPolicy, SignedDocument, SigningJob};
use crate::key::{ActiveKeySlot, SigningKey};
use crate::mapper::{self, SigningConfiguration};
use crate::provider::SigningKeyProvider;

#[derive(Debug, Clone, Default)]
pub struct AutogramConfig {
    /// Upper bound for the engine and key signing phase of a job.
    pub job_timeout: Option<Duration>,
}

pub struct Autogram {
    config: AutogramConfig,
    active_key: ActiveKeySlot,
    provider: SigningKeyProvider,
    engine: Arc<dyn SignatureEngine>,
    /// Held for the duration of a key prompt, so only one is shown at a time.
    selection: Mutex<()>,
}

impl Autogram {
    pub fn new(
        provider: SigningKeyProvider,
        engine: Arc<dyn SignatureEngine>,
        config: AutogramConfig,
    ) -> Self {
        Self {
            config,
            active_key: ActiveKeySlot::default(),
            provider,
            engine,
            selection: Mutex::new(()),
        }
    }

    pub fn active_signing_key(&self) -> Option<Arc<SigningKey>> {
        self.active_key.get()
    }

    pub fn is_ready(&self) -> bool {
        self.active_key.is_set()
    }

    /// Accepts a job and processes it on a background task.
    ///
    /// The outcome arrives through the job's responder. Must be called from
    /// within a tokio runtime.
    pub fn submit(self: &Arc<Self>, job: SigningJob) {
        let this = Arc::clone(self);
        let span = info_span!("job", id = job.id());
        tokio::spawn(async move { this.process(job).await }.instrument(span));
    }

    /// Processes a job on the current task and delivers its outcome.
    pub async fn process(&self, mut job: SigningJob) {
        info!(
            format = %job.parameters().format,
            mime_type = %job.parameters().payload_mime_type,
            "job received"
        );

        let outcome = self.run(&mut job).await;
        match &outcome {
            Ok(signed) => info!(signed_by = %signed.certificate.subject, "job signed"),
            Err(error) if error.is_client_error() => {
                info!(code = error.code(), %error, "job rejected")
            }
            Err(SigningError::SigningCanceledByUser) => info!("job canceled"),
            Err(error) => warn!(code = error.code(), %error, "job failed"),
        }
        job.deliver(outcome);
    }

    async fn run(&self, job: &mut SigningJob) -> Result<SignedDocument, SigningError> {
        let (configuration, document) = validate(job)?;
        job.advance(JobStage::Validated);

        let cancel = job.cancellation_token().clone();
        let key = self.resolve_key(job.key_policy(), &cancel).await?;
        job.advance(JobStage::KeyResolved);

        let signing_time = job
            .created_at()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        let signing = self.sign(document, configuration, key, signing_time);

        let signed = match self.config.job_timeout {
            Some(limit) => tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(SigningError::SigningCanceledByUser),
                result = tokio::time::timeout(limit, signing) => {
                    result.unwrap_or(Err(SigningError::TimedOut(limit)))
                }
            },
            None => tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(SigningError::SigningCanceledByUser),
                result = signing => result,
            },
        }?;
        job.advance(JobStage::Signed);

        Ok(signed)
    }

    async fn resolve_key(
        &self,
        policy: KeyPolicy,
        cancel: &CancellationToken,
    ) -> Result<Arc<SigningKey>, SigningError> {
        if let Some(key) = self.active_key.get() {
            return Ok(key);
        }

        match policy {
            KeyPolicy::RequireActive => Err(SigningError::NotReady),
            KeyPolicy::PromptIfMissing => {
                let _selection = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(SigningError::SigningCanceledByUser),
                    guard = self.selection.lock() => guard,
                };
                // A prompt that finished while we queued has already filled the slot.
                let key = self.provider.resolve_key(&self.active_key, cancel).await?;
                self.active_key.set_if_absent_or_replace(Arc::clone(&key));
                Ok(key)
            }
        }
    }

    /// Prompts for a key and makes it the active one, replacing any previous key.
    pub async fn pick_signing_key(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<SigningKey>, SigningError> {
        let _selection = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SigningError::SigningCanceledByUser),
            guard = self.selection.lock() => guard,
        };
        let key = self.provider.select_key(cancel).await?;
        if let Some(previous) = self.active_key.set_if_absent_or_replace(Arc::clone(&key)) {
            info!(previous = %previous.certificate().subject, "active signing key replaced");
        }
        info!(subject = %key.certificate().subject, "active signing key set");
        Ok(key)
    }

    /// Clears the active key; the next key resolution prompts again.
    pub fn reset_signing_key(&self) -> bool {
        let previous = self.active_key.reset();
        if let Some(key) = &previous {
            info!(subject = %key.certificate().subject, "active signing key reset");
        }
        previous.is_some()
    }

    async fn sign(
        &self,
        document: TypedDocument,
        configuration: SigningConfiguration,
        key: Arc<SigningKey>,
        signing_time: u64,
    ) -> Result<SignedDocument, SigningError> {
        let digest_method = configuration.digest();
        let document = Arc::new(document);
        let parameters = Arc::new(EngineParameters {
            configuration,
            signing_certificate: key.certificate().clone(),
            certificate_chain: key.certificate_chain().to_vec(),
            signing_time,
        });

        let data_to_sign = {
            let engine = Arc::clone(&self.engine);
            let document = Arc::clone(&document);
            let parameters = Arc::clone(&parameters);
            blocking("digest computation", move || {
                Ok(engine.compute_digest_to_sign(&document, &parameters)?)
            })
            .await?
        };

        let signature_value = {
            let key = Arc::clone(&key);
            blocking("key signing", move || {
                Ok(key.sign(&data_to_sign, digest_method)?)
            })
            .await?
        };

        let content = {
            let engine = Arc::clone(&self.engine);
            blocking("signature assembly", move || {
                Ok(engine.finalize_signature(&document, &parameters, &signature_value)?)
            })
            .await?
        };

        Ok(SignedDocument {
            content,
            certificate: key.certificate().clone(),
        })
    }
}

/// Maps the parameters and classifies the document, before anything expensive happens.
fn validate(job: &SigningJob) -> Result<(SigningConfiguration, TypedDocument), SigningError> {
    let parameters = job.parameters();
    let configuration = mapper::map(parameters)?;
    let document = document::classify(
        job.document(),
        &parameters.payload_mime_type,
        parameters.schema.as_deref(),
        parameters.transformation.as_deref(),
    )?;
    configuration.check_document(document.kind())?;
    Ok((configuration, document))
}

/// Runs a collaborator call on the blocking pool. A panic inside it is reported
/// as an unrecognized collaborator error.
async fn blocking<T, F>(stage: &'static str, f: F) -> Result<T, SigningError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, SigningError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => {
            let payload = e.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("non-string panic payload");
            Err(SigningError::UnrecognizedCollaborator(format!(
                "{stage} panicked: {message}"
            )))
        }
        Err(e) => Err(anyhow!("{stage} task failed: {e}").into()),
    }
}
