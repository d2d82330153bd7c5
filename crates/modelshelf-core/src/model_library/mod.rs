//! Model Library - installed models, their catalog identity and everything
//! kept next to them.
//!
//! # Architecture
//!
//! ```text
//! ModelRegistry
//!     │
//!     ├── ModelSources   - installed filenames per type
//!     ├── ScanStore      - content hash + remote id per model
//!     ├── CatalogApi     - remote lookups, snapshots under database/
//!     │
//!     ├── images / report / companion links
//!     └── rename / delete cascades
//! ```

mod cascade;
mod filename;
pub mod hashing;
mod handle;
mod images;
mod jobs;
mod registry;
mod report;
mod scan_store;
mod sources;
mod types;

pub use filename::Filename;
pub use handle::ModelHandle;
pub use images::{image_file_name, image_index};
pub use registry::{CatalogLink, ModelRegistry, ScanSummary};
pub use scan_store::{ScanRecord, ScanStore, ScanTable};
pub use sources::{find_file, model_extensions, DirectoryIndex, InstalledModels, ModelSources};
pub use types::{CompanionState, ModelKey, ModelStatus, ModelType, ScanState};
