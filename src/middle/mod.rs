//! The middle end lowers the AST into a CFG-based intermediate
//! representation and optimizes it before handing it to the backend.

pub mod ir;
pub mod optimization;
