//! Live capture-to-index pipeline: segments a continuous media stream into
//! files, uploads them for indexing, and surveys the indexed corpus for
//! unresolved face detections.

pub mod client;
pub mod config;
pub mod credentials;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod segmenter;
pub mod survey;
pub mod uploader;
