//! Report building: artifact catalog and resolution, LaTeX assembly, and
//! PDF compilation.

pub mod catalog;
pub mod latex;

pub use catalog::{
    ArtifactCatalog, Section, backfill_sections_from_urls, resolve_artifact_for_section,
};
pub use latex::{DocumentStyle, RenderedSection, build_document, compile_pdf};
