pub mod error;
pub mod explorer;
pub mod hierarchy;
pub mod html;
pub mod http;
pub mod navigator;
pub mod port;
pub mod registry;
pub mod signature;
pub mod step;

#[cfg(test)]
mod testing;

pub use error::ScanError;
pub use explorer::{
    AbortReason, Bound, CancelFlag, ExplorationOutcome, Explorer, ExplorerConfig, ExplorerState,
    RunStats, Termination,
};
pub use hierarchy::{Hierarchy, HierarchyEdge, build_hierarchy};
pub use html::HtmlClassifier;
pub use http::HttpDriver;
pub use navigator::{Navigator, RepairOutcome, ReplayResult, Timeouts};
pub use port::{Classification, ClassifierError, ClassifierPort, DriverError, DriverPort, Surface};
pub use registry::{DiscoveredEntity, EntityId, EntityRegistry};
pub use step::{ExplorationPath, InteractionStep, StepKind};
