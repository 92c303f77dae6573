//! Small building blocks shared by the backends.

pub mod ident;
pub mod pool;
pub mod process;
