//! **hrmlink** - Round-trip connector between an image project, an OMERO-like
//! image store and an HRM deconvolution share.
//!
//! Raw images are copied to `<root>/<owner>/Raw/...`; deconvolved results are
//! later found under `<root>/<owner>/Deconvolved/...`, matched back to their raw
//! image and imported with their processing parameters.

/// Command-line interface with clap integration
pub mod cli;

/// Shell completion generation
pub mod completion;

/// Command handlers that need terminal output (progress, tables)
pub mod cli_ext {
    /// `send`, `retrieve` and `discover`
    pub mod transfer_cmd;
    pub use transfer_cmd::{discover_run, retrieve_run, send_run};
}

/// Transfer core - naming convention, matching, senders and retrievers
pub mod core {
    /// Case-insensitive edit-distance similarity and best-match selection
    pub mod matcher;
    pub use matcher::{best_match, similarity};

    /// Share folder layout and result file naming
    pub mod convention;
    pub use convention::{BackendKind, ResultNameParser, parse_result_filename};

    /// Parameter report tables to namespaced key/values
    pub mod metadata;
    pub use metadata::{KeyValues, Metadata};

    /// Remote image store contract
    pub mod remote;
    pub use remote::{NoRemote, RemoteConnector, RemoteStore};

    /// Project contract and the JSON manifest implementation
    pub mod project;
    pub use project::{JsonProject, ProjectEntry, ProjectImporter};

    /// Raw image senders (local file, remote store)
    pub mod sender;
    pub use sender::{LocalSender, RemoteSender, Sender, TransferStatus};

    /// Deconvolved result retrievers (local file, remote store)
    pub mod retriever;
    pub use retriever::{ItemReport, ItemStage, LocalRetriever, RemoteRetriever, Retriever};

    /// Bounded deletion of processed artifacts
    pub mod cleanup;

    /// Deconvolved tree scanning
    pub mod discovery;
    pub use discovery::{DiscoveredFile, discover};

    /// Batch driver for send and retrieve
    pub mod orchestrator;
    pub use orchestrator::{CancelToken, TransferOrchestrator};
}

/// Infrastructure - Configuration, preferences, I/O and logging
pub mod infra {
    /// Layered configuration (file + environment)
    pub mod config;
    pub use config::{Config, init as config_init, load_config};

    /// Remembered username/host
    pub mod prefs;
    pub use prefs::Preferences;

    /// Atomic copies, idempotent folder creation, sibling lookups
    pub mod io;

    /// Share walker built on `ignore` + `globset`
    pub mod walk;
    pub use walk::FileWalker;

    /// tracing subscriber setup
    pub mod logging;
}

// Strategic re-exports for clean CLI interface
pub use cli::{AppContext, Cli, Commands};
pub use infra::{Config, FileWalker, load_config};
