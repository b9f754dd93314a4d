pub mod expr;
pub mod options;
pub mod sort;
