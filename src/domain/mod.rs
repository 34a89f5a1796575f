pub mod manufacturer;
pub mod models;
pub mod settings;
