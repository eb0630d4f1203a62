//! docwhisper - ask questions about your documents with local
//! retrieval-augmented generation.
//!
//! Documents (PDF, Markdown, plain text) are split into overlapping chunks,
//! embedded and kept in a vector index. A question is embedded the same way,
//! the most similar chunks are retrieved, and a text generator answers from
//! a prompt built around them.
//!
//! # Quick start
//!
//! ```
//! use docwhisper::{
//!     Session,
//!     chunking::ChunkingConfig,
//!     embedding::{EmbedderAdapter, HashingEmbedder},
//!     ingestion::Document,
//! };
//!
//! let embedder = EmbedderAdapter::new(HashingEmbedder::new(128), 32).unwrap();
//! let session: Session<_> = Session::new(embedder);
//!
//! session
//!     .add_documents(
//!         &[
//!             Document::new("recipe.pdf", "Apple pie recipe."),
//!             Document::new("oven.md", "Bake at 350 degrees."),
//!         ],
//!         &ChunkingConfig::default(),
//!     )
//!     .unwrap();
//!
//! let result = session.retrieve("Bake at 350 degrees.", 1).unwrap();
//! assert_eq!(result.hits[0].chunk.source_id, "oven.md");
//! ```

pub mod chunking;
pub mod cli;
pub mod config_db;
pub mod corpus_db;
pub mod data_dir;
pub mod document_store;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod generator;
pub mod incremental;
pub mod ingestion;
pub mod mcp;
pub mod model_manager;
pub mod retriever;
pub mod session;
pub mod settings;
pub mod text_util;
pub mod vector_index;
pub mod walker;

pub use config_db::ConfigDb;
pub use corpus_db::CorpusDb;
pub use data_dir::DataDir;
pub use error::{Error, Result};
pub use model_manager::ModelManager;
pub use session::Session;
pub use settings::Settings;
