//! Feed retrieval and normalization.
//!
//! - [`fetcher`] - HTTP retrieval with timeout, retry and size limits
//! - [`parser`] - `feed-rs` based normalization of RSS documents into
//!   [`ChannelInfo`] and [`EntryInfo`]
//!
//! Only the RSS family (0.9x, 1.0, 2.0) is accepted; Atom and JSON Feed
//! documents are rejected with [`InvalidFeedError::NotRss`].

mod fetcher;
mod parser;

pub use fetcher::{build_client, fetch_feed, FetchError};
pub use parser::{ChannelInfo, EntryInfo, FeedNormalizer, InvalidFeedError};
