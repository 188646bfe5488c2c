//! Selsync Core Library
//!
//! Applies a parameter change to one resource of a pull-based deployment
//! system, watches the controller converge on it, checks that sibling
//! resources were left alone, and rolls the change back.

pub mod cleanup;
pub mod config;
pub mod context;
pub mod detector;
pub mod driver;
pub mod error;
pub mod manifest;
pub mod orchestrator;
pub mod package;
pub mod probe;
pub mod records;
pub mod registry;
pub mod retry;
pub mod ticker;
pub mod types;
pub mod version;

pub use error::{Error, FailureKind, Result};

/// Re-exports of commonly used types
pub mod prelude {
    // Configuration
    pub use crate::config::{ConfigStore, ResourceConfig, SelsyncConfig};
    pub use crate::context::AppContext;

    // Domain
    pub use crate::types::{
        BumpKind, ChangeRecord, HealthState, Phase, PhaseResult, Status, SyncState, WatchTarget,
    };

    // Components
    pub use crate::cleanup::{CleanupReport, CompensatingCleanup, StepOutcome};
    pub use crate::detector::{DetectorConfig, PhaseDetector, WatchOutcome, WatchState};
    pub use crate::driver::{ChangeDriver, ChangePlan};
    pub use crate::orchestrator::{
        CleanupMode, DemoOptions, DemoOrchestrator, DemoReport, DemoRequest, Prompter,
    };
    pub use crate::probe::{StatusAccessor, StatusProbe};
    pub use crate::retry::{RetryConfig, RetryingExecutor};
    pub use crate::ticker::Ticker;

    // Collaborators
    pub use crate::manifest::ParameterStore;
    pub use crate::package::Packager;
    pub use crate::records::RecordStore;
    pub use crate::registry::ArtifactRegistry;
}
