pub mod app;
pub mod catalog;
pub mod cloud;
pub mod config;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod output;
