pub mod error;
pub mod task;
pub mod grammar;
pub mod parser;
pub mod store;
pub mod eviction;
pub mod vault;
pub mod scheduler;
pub mod watch;
pub mod engine;
pub mod layered_config;

pub use error::{Result, TaskError};
pub use task::{DocumentId, Priority, Task};
pub use parser::{ParseOptions, ParseReport, SourceDocument};
pub use store::{Progress, TaskStore, Toggled};
pub use vault::{DocumentMeta, FsVault, MemoryVault, Vault};
pub use scheduler::{ChangeEvent, ChangeNotifier, Liveness, RefreshScheduler, RefreshTarget, SchedulerOptions};
pub use watch::VaultWatch;
pub use engine::{CleanupReport, TaskEngine};
pub use layered_config::{Config, ConfigLayer, ConfigManager, ParseScope, Scope, TaskSettings};
