//! MongoDB persistence
//!
//! `mongo` holds the client and typed collection wrapper, `schemas` the
//! document structures and their indexes.

pub mod mongo;
pub mod schemas;

pub use mongo::{is_duplicate_key, IntoIndexes, MongoClient, MongoCollection, MutMetadata};
