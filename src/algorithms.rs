pub mod constraint;
pub mod drape;
pub mod repair;
pub mod smooth;
pub mod swap;
pub mod triangulate;
