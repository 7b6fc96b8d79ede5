pub mod feed;

pub use feed::{
    get_feed, get_feed_stats, record_impression, record_interaction, FeedHandlerState,
};
