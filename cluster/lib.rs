#![deny(dead_code)]
#![deny(unused_imports)]

pub mod config;
pub mod graph;
pub mod path;
pub mod smooth;
pub mod solver;
pub mod union_find;
pub mod validate;
