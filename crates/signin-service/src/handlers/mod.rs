//! HTTP 处理器

pub mod dto;
pub mod health;
pub mod ranking;
pub mod signin;
