pub mod models {
    pub mod inventory;
}

pub mod cli;
pub mod config;
pub mod confirm;
pub mod env_file;
pub mod registry;
pub mod repository;
pub mod settings;
pub mod sorting;
pub mod storage;
