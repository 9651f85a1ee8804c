pub mod donation;
pub mod product;
pub mod user;
