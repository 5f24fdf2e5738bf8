pub mod affiliate;
pub mod airtable_service;
pub mod config;
pub mod content;
pub mod http;
pub mod llm;
pub mod media;
pub mod pipeline;
pub mod products;
pub mod record_source;
pub mod social;
pub mod storage;
pub mod tts;
pub mod video;
