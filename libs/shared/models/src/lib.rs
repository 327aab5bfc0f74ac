pub mod appointment;
pub mod auth;
pub mod connection;
pub mod directory;
pub mod error;
pub mod notification;
pub mod outcome;
