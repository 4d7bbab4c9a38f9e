//! newswire: polls RSS feeds of registered news outlets and stores their
//! articles, authors and tags in SQLite.

pub mod config;
pub mod feed;
pub mod ingest;
pub mod storage;
