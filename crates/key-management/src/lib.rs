pub mod client;
pub mod logic;
pub mod repository;
pub mod router;
