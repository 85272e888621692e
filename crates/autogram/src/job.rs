//! The unit of work and the sink its outcome is delivered to.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use anyhow::anyhow;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::document::Document;
use crate::error::SigningError;
use crate::parameters::SignatureParameters;
use crate::token::Certificate;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Result of a successful job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedDocument {
    pub content: Vec<u8>,
    pub certificate: Certificate,
}

/// Receives the outcome of exactly one job.
///
/// Both methods consume the responder, so a second delivery cannot be expressed.
pub trait Responder: Send {
    fn on_document_signed(self: Box<Self>, document: SignedDocument);

    fn on_document_sign_failed(self: Box<Self>, error: SigningError);
}

/// Forwards the outcome to a closure, e.g. a UI callback or a channel.
pub struct CallbackResponder<F>(F);

impl<F> CallbackResponder<F>
where
    F: FnOnce(Result<SignedDocument, SigningError>) + Send,
{
    pub fn new(callback: F) -> Self {
        Self(callback)
    }
}

impl<F> Responder for CallbackResponder<F>
where
    F: FnOnce(Result<SignedDocument, SigningError>) + Send,
{
    fn on_document_signed(self: Box<Self>, document: SignedDocument) {
        (self.0)(Ok(document))
    }

    fn on_document_sign_failed(self: Box<Self>, error: SigningError) {
        (self.0)(Err(error))
    }
}

/// What a job may do when no signing key is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyPolicy {
    /// Fail with [`SigningError::NotReady`].
    #[default]
    RequireActive,
    /// Ask the user to pick a key and keep it active afterwards.
    PromptIfMissing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Received,
    Validated,
    KeyResolved,
    Signed,
    Rejected,
    SignFailed,
    Delivered,
}

impl JobStage {
    pub fn can_advance_to(self, next: JobStage) -> bool {
        use JobStage::*;
        matches!(
            (self, next),
            (Received, Validated)
                | (Received, Rejected)
                | (Validated, KeyResolved)
                | (Validated, Rejected)
                | (KeyResolved, Signed)
                | (KeyResolved, SignFailed)
                | (Signed, Delivered)
                | (Rejected, Delivered)
                | (SignFailed, Delivered)
        )
    }

    /// Failure stage matching the point the job reached.
    fn failed(self) -> JobStage {
        match self {
            JobStage::Received | JobStage::Validated => JobStage::Rejected,
            _ => JobStage::SignFailed,
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub struct SigningJob {
    id: u64,
    document: Document,
    parameters: SignatureParameters,
    created_at: SystemTime,
    key_policy: KeyPolicy,
    cancel: CancellationToken,
    stage: JobStage,
    responder: Option<Box<dyn Responder>>,
}

impl SigningJob {
    pub fn new(
        document: Document,
        parameters: SignatureParameters,
        responder: impl Responder + 'static,
    ) -> Self {
        Self {
            id: NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed),
            document,
            parameters,
            created_at: SystemTime::now(),
            key_policy: KeyPolicy::default(),
            cancel: CancellationToken::new(),
            stage: JobStage::Received,
            responder: Some(Box::new(responder)),
        }
    }

    pub fn with_key_policy(mut self, key_policy: KeyPolicy) -> Self {
        self.key_policy = key_policy;
        self
    }

    /// Ties the job to an externally owned token, e.g. one cancelled on client disconnect.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn parameters(&self) -> &SignatureParameters {
        &self.parameters
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn key_policy(&self) -> KeyPolicy {
        self.key_policy
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn stage(&self) -> JobStage {
        self.stage
    }

    /// Moves the job forward. Revisiting or skipping a stage is a bug in the caller.
    pub fn advance(&mut self, next: JobStage) {
        assert!(
            self.stage.can_advance_to(next),
            "job {} cannot move from {} to {}",
            self.id,
            self.stage,
            next
        );
        debug!(job = self.id, from = %self.stage, to = %next, "job stage");
        self.stage = next;
    }

    /// Delivers the outcome to the responder and completes the job.
    pub fn deliver(mut self, outcome: Result<SignedDocument, SigningError>) {
        if let Err(error) = &outcome {
            if !matches!(self.stage, JobStage::Rejected | JobStage::SignFailed) {
                self.advance(self.stage.failed());
            }
            debug!(job = self.id, code = error.code(), "delivering failure");
        }
        self.advance(JobStage::Delivered);
        self.respond(outcome);
    }

    fn respond(&mut self, outcome: Result<SignedDocument, SigningError>) {
        let Some(responder) = self.responder.take() else {
            return;
        };
        match outcome {
            Ok(document) => responder.on_document_signed(document),
            Err(error) => responder.on_document_sign_failed(error),
        }
    }
}

impl Drop for SigningJob {
    fn drop(&mut self) {
        if self.responder.is_some() {
            error!(job = self.id, stage = %self.stage, "job dropped before delivery");
            self.stage = JobStage::Delivered;
            self.respond(Err(SigningError::Internal(anyhow!(
                "signing job was abandoned before completion"
            ))));
        }
    }
}

impl fmt::Debug for SigningJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningJob")
            .field("id", &self.id)
            .field("format", &self.parameters.format)
            .field("mime_type", &self.parameters.payload_mime_type)
            .field("key_policy", &self.key_policy)
            .field("stage", &self.stage)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::parameters::{Canonicalization, Container, DigestAlgorithm, Format, Level, Packaging};

    /// Records every delivery so tests can check there was exactly one.
    #[derive(Clone, Default)]
    pub struct Recorder {
        pub outcomes: Arc<Mutex<Vec<Result<SignedDocument, SigningError>>>>,
    }

    impl Recorder {
        pub fn responder(&self) -> impl Responder + 'static {
            let outcomes = self.outcomes.clone();
            CallbackResponder::new(move |outcome| outcomes.lock().unwrap().push(outcome))
        }

        pub fn count(&self) -> usize {
            self.outcomes.lock().unwrap().len()
        }

        pub fn take_single(&self) -> Result<SignedDocument, SigningError> {
            let mut outcomes = self.outcomes.lock().unwrap();
            assert_eq!(outcomes.len(), 1, "expected exactly one delivery");
            outcomes.pop().unwrap()
        }
    }

    pub fn xml_document() -> Document {
        Document {
            id: Some("doc-1".into()),
            title: Some("Order".into()),
            content: "<order><item>1</item></order>".into(),
            legal_effect: Some("I agree".into()),
        }
    }

    pub fn xades_asice() -> SignatureParameters {
        SignatureParameters {
            format: Format::Xades,
            level: Level::BaselineB,
            container: Some(Container::AsicE),
            packaging: Packaging::Enveloping,
            digest_algorithm: DigestAlgorithm::Sha256,
            info_canonicalization: Some(Canonicalization::Inclusive),
            properties_canonicalization: Some(Canonicalization::Inclusive),
            en319132: false,
            payload_mime_type: "application/xml".into(),
            schema: None,
            transformation: None,
        }
    }
}
