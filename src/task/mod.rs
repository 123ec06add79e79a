pub mod execution;
pub mod generic;
pub mod report;
pub mod tree;
pub mod types;


pub use generic::*;
pub use report::*;
pub use tree::*;
pub use types::*;
