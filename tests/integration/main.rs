//! End-to-end tests: scripted feeds driven through the full monitor cycle.

mod mock_feed;
mod pipeline;
