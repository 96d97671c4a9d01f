//! Overlay Core Library
//!
//! Domain models, declaration parsing, role inference and configuration for
//! exercise/scenario overlays on the resource graph.

pub mod config;
pub mod error;
pub mod kinds;
pub mod model;
pub mod parser;
pub mod role;

pub use config::OverlayConfig;
pub use error::{AnnotationFailure, OverlayError, OverlayResult};
pub use model::{
    AnnotatedResource, Attributes, ConfidenceTier, DeploymentResult, ImportResult, MatchedNode,
    OverlayAnnotation, OverlayKey, OverlayRole, OverlayStatistics, ParsedResource, ResourceMapping,
};
pub use parser::{ConfigParser, ParseOptions};
pub use role::RoleTable;
