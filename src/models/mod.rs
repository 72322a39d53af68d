//! Core data models for the WebDAV gateway.
//!
//! A stored object is the unit the backing store knows about. Collections are
//! ordinary objects tagged through their custom metadata; see `dav::collection`.

pub mod object;
