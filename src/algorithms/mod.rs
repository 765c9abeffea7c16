pub mod common;
pub mod evaluate;
pub mod kernel;
pub mod peaks;
pub mod refine;
pub mod template_search;
pub mod width;
