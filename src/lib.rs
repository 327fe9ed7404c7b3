//! Automated short-form video composition engine: normalizes a template's still image and up
//! to five clips into one vertically bordered, subtitled, transition-blended output, either in
//! a single pass or incrementally across separate process invocations.

pub mod api;
pub mod compositor;
pub mod config;
pub mod driver;
pub mod encoder;
pub mod error;
pub mod frame_source;
pub mod gpu;
pub mod media;
pub mod mux;
pub mod session;
pub mod subtitle;
pub mod template;

pub use config::GlobalConfig;
pub use error::{Error, Result};
pub use frame_source::{Frame, FrameSource};
pub use template::{Template, TemplateLoader, TemplateSummary};
