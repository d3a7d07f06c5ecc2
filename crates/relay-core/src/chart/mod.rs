//! Chart synthesis and rendering: payload resolution into a validated
//! [`spec::ChartSpec`], and PNG rendering via plotters.

pub mod render;
pub mod spec;

pub use render::render_png;
pub use spec::{ChartSpec, ChartType, RawChart, chart_role};
