pub mod correlation;
pub mod sad;
