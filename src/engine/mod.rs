//! Core services. Each operation opens one store transaction, checks its
//! preconditions against locked rows and commits all of its writes at once.

pub mod accounts;
pub mod catalog;
pub mod confirmation;
pub mod lifecycle;
pub mod matching;
pub mod reviews;
pub mod roles;
