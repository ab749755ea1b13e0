//! Tern Core Library
//!
//! A declarative reconciliation engine: steps describe the objects an owner
//! (a Capsule or a project environment) should have, and the commit engine
//! makes the cluster match, adopting or refusing pre-existing objects and
//! persisting what it owns in the owner's status.

pub mod api;
pub mod change;
pub mod cluster;
pub mod commit;
pub mod config;
pub mod diff;
pub mod error;
pub mod kind;
pub mod object;
pub mod pipeline;
pub mod request;
pub mod steps;

pub use error::{Error, Result};

/// Re-exports of commonly used types
pub mod prelude {
    // Owners
    pub use crate::api::{Capsule, CapsuleSpec, OwnerResource, ProjectEnvironment};

    // Objects and kinds
    pub use crate::kind::{GroupVersionKind, KindInfo, KindTable};
    pub use crate::object::{Object, ObjectKey};

    // Engine
    pub use crate::change::{Change, ChangeSet, ResourceState};
    pub use crate::cluster::{ClusterClient, DryRun, KubeCluster, MemoryCluster};
    pub use crate::config::{ConfigStore, EngineConfig};
    pub use crate::error::{Error, Result};
    pub use crate::pipeline::{
        CapsulePipeline, Options, OutputObject, PipelineResult, ProjectEnvironmentPipeline, Step,
    };
    pub use crate::request::{
        CapsuleStrategy, ProjectEnvironmentStrategy, Request, RequestOptions, Strategy,
    };

    // Steps
    pub use crate::steps::{DeploymentStep, NamespaceStep, ServiceAccountStep};
}
