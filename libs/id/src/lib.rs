//! # pharos-id
//!
//! Content-addressed application IDs and image reference parsing for the
//! pharos node agent.
//!
//! ## Design Principles
//!
//! - An application ID is a pure function of the descriptor's services
//! - Redeploying the same descriptor yields the same ID (idempotent deploy)
//! - Image tags never participate in the ID, so a tag bump is an update
//! - IDs have a canonical string representation with strict parsing
//!
//! ## ID Format
//!
//! An [`AppId`] is the lowercase hex SHA-1 digest (40 characters) of the
//! characters of every `service_name || image_without_tag` token, sorted by
//! code point:
//!
//! ```text
//! services:
//!   web:  { image: nginx:1.25 }      -> "webnginx"
//!   db:   { image: postgres:16 }     -> "dbpostgres"
//!
//! sort_chars("webnginx" + "dbpostgres") -> sha1 -> hex
//! ```

mod error;
mod image;
mod types;

pub use error::IdError;
pub use image::{split_repo_tag, strip_tag};
pub use types::AppId;
