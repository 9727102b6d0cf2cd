pub mod commit;
pub mod config;
pub mod controller;
pub mod error;
pub mod scheduler;
pub mod shutdown;
pub mod storage;
pub mod upstream;
pub mod worker;
