//! External capability interfaces.
//!
//! The platform's collaborators (language models, text extractors, embedding
//! services, folder providers, mail inboxes) are reached only through the
//! traits in this module. The running process wires concrete implementations
//! into a [`crate::host::Host`]; tests substitute scripted fakes.

pub mod embedder;
pub mod extractor;
pub mod folder;
pub mod mail;
pub mod sampler;

pub use embedder::{DEFAULT_DIMENSIONS, Embedder, FallbackEmbedder, cosine_similarity};
pub use extractor::{BuiltinExtractor, Extractor};
pub use folder::{ChannelRegistration, FolderSource, RemoteFileMeta};
pub use mail::{MailAttachment, MailMessage, MailSource};
#[cfg(feature = "openai")]
pub use sampler::OpenAiSampler;
pub use sampler::{Sampler, TaskInput};
