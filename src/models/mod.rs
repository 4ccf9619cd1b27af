//! Data types exchanged with the catalog source.

pub mod catalog;
