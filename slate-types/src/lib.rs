#![deny(missing_docs)]

//! A type system for Slate
//!
//! This crate contains the core structural type system for Slate: a
//! self-describing binary type encoding, the closed set of concrete type
//! kinds, the record-type resolution algorithms, the legacy schema language
//! with its symbol resolver, and the conversion into Arrow schemas.

pub use enumeration::*;
pub use kind::*;
pub use legacy::*;
pub use list::*;
pub use map::*;
pub use offset::*;
pub use record::*;
pub use registry::*;
pub use type_::*;

pub mod arrow;
mod enumeration;
mod kind;
mod legacy;
mod list;
mod map;
mod offset;
mod record;
mod registry;
pub mod schema;
mod type_;
mod wire;
