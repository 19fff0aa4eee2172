//! Configuration loading and validation

mod settings;

pub use settings::{
    AzureSettings, HttpSettings, PipelineSettings, Settings, StorageMode, StorageSettings,
};
