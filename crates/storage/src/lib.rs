#![forbid(unsafe_code)]

mod entry;
mod store;
mod sweeper;

pub use entry::Item;
pub use store::Store;
pub use sweeper::spawn_sweeper;
