pub mod data_key;
pub mod encryption_key;
pub mod generation;
pub mod kek;
pub mod key_id;
pub mod key_split;
pub mod key_split_data;
pub mod peer;
pub mod signing;
pub mod storage;
