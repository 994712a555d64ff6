//! Context Router - capture resolution and normalization pipeline
//!
//! This crate turns "whatever is in front of the user" into a deterministic,
//! paste-ready markdown document:
//!
//! - **Browser bridges**: extension and live AppleScript bridges, spoken to
//!   with versioned envelopes
//! - **Accessibility**: the focused window's accessibility tree
//! - **OCR**: text recognition over a window screenshot
//! - **Metadata only**: a synthesized fallback that never fails
//!
//! # Architecture
//!
//! The [`CaptureResolver`] walks those tiers in order through a [`Transport`]
//! (the process-backed [`Dispatcher`] in production), each under its own
//! timeout. The winning capture is normalized into a [`NormalizedContext`] and
//! rendered to markdown. A [`CaptureSession`] keeps at most one capture in
//! flight and holds the last report.

pub mod config;
pub mod diagnostics;
pub mod dispatcher;
pub mod extractors;
pub mod normalize;
pub mod profiles;
pub mod protocol;
pub mod render;
pub mod resolver;
pub mod session;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use dispatcher::{BackendCommand, DispatchError, Dispatcher, PingReport, Transport};
pub use extractors::{BackendKind, BackendRegistry};
pub use normalize::{normalize, CaptureStamp, NormalizedContext};
pub use profiles::{AppProfile, AttributeProfile, ProfileTable};
pub use protocol::{Envelope, Payload, ProtocolError, PROTOCOL_VERSION};
pub use render::{render, RenderMode};
pub use resolver::{CaptureResolver, ResolverSettings};
pub use session::{CaptureReport, CaptureSession};
pub use types::{
    CaptureError, CaptureRequest, CaptureResolution, CaptureTarget, ErrorCode, ExtractionInput,
    ExtractionMethod, SourceType, TriggerMode,
};
