pub mod app;
pub mod archive;
pub mod codec;
pub mod config;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod ghost;
pub mod graph;
pub mod lookup;
pub mod manifest;
pub mod output;
pub mod packager;
pub mod placeholder;
pub mod prepare;
pub mod workspace;
