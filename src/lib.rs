//! signflow: document versioning and signing workflow engine
//!
//! Documents carry an append-only version history. Each document has
//! designated signers; every signer receives a single-use token and redeems
//! it with a hand-drawn signature, which is composited under a generated
//! caption and stored.
//!
//! ```text
//! create document -> attach signers -> issue token -> redeem -> fetch artifact
//! ```
//!
//! The [`workflow::SigningWorkflow`] orchestrates the [`store`] backends, the
//! [`tokens::TokenCache`] and the [`compositor::SignatureCompositor`];
//! [`http`] exposes it over axum.

pub mod compositor;
pub mod config;
pub mod error;
pub mod http;
pub mod model;
pub mod store;
pub mod tokens;
pub mod workflow;

pub use compositor::{CaptionRenderer, CaptionStyle, FontCaptionRenderer, SignatureCompositor};
pub use config::Config;
pub use error::{EngineError, Result};
pub use model::{
    Document, NewVersion, SignedArtifact, Signer, SignerInfo, SignerName, SignerState,
    SigningContext, SigningToken, Version,
};
pub use store::{DocumentVersionStore, MemoryDocumentStore, MemorySignerStore, SignerStore, SqliteStore};
pub use tokens::TokenCache;
pub use workflow::SigningWorkflow;
