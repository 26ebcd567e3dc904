pub mod app;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod download;
pub mod error;
pub mod filters;
pub mod fs_util;
pub mod genome;
pub mod metadata;
pub mod output;
pub mod phage;
pub mod primate;
pub mod records;
pub mod taxonomy;
pub mod validate;
