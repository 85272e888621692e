pub mod autogram;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod job;
pub mod key;
pub mod logging;
pub mod mapper;
pub mod parameters;
pub mod provider;
pub mod server;
pub mod token;

pub use autogram::{Autogram, AutogramConfig};
pub use document::Document;
pub use engine::{EnvelopeEngine, SignatureEngine};
pub use error::{ErrorResponse, SigningError};
pub use job::{CallbackResponder, KeyPolicy, Responder, SignedDocument, SigningJob};
pub use parameters::SignatureParameters;
pub use provider::{AutoPicker, ConsolePicker, KeyPicker, SigningKeyProvider};
pub use server::{AppState, router, run};
pub use token::{SoftwareTokenDriver, TokenDriver};
