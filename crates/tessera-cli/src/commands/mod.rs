pub mod check;
pub mod invoke;
pub mod plan;
