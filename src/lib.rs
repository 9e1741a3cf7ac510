pub mod config;
pub mod error;
pub mod event_log;
pub mod link;
pub mod mission;
pub mod protocol;
pub mod settings;
pub mod store;
pub mod util;
pub mod vehicle;

pub use link::{EndpointChange, GcsLink, LinkOptions, LinkState};
pub use store::{LinkEvent, Notice, NoticeLevel, Store, StoreOptions};
