pub mod listing;
pub mod seen_listing;
