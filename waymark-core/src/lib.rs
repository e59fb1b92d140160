pub mod cache;
pub mod data;
pub mod explore;
pub mod report;
