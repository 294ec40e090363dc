pub mod courier;
pub mod dish;
pub mod order;
pub mod review;
pub mod user;
