//! The crate accounting engine. Every function here is a pure computation over
//! an explicit snapshot, asset capabilities and the current epoch.

pub mod convert;
pub mod growth;
pub mod ordering;
pub mod select;
pub mod withdrawals;
