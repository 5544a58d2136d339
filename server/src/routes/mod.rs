pub mod images;
pub mod query;
pub mod status;
