pub mod classify;
pub mod levels;
pub mod model;
pub mod settings;
pub mod store;
pub mod web;
