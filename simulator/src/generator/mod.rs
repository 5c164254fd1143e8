pub mod prototype;
pub mod stimulus;
