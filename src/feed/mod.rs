mod fetcher;

pub use fetcher::{ChannelFetcher, ItemFetcher};
