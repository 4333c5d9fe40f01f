pub mod ask;
pub mod logs;
pub mod ping;
