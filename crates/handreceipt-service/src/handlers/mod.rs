pub mod auth;
pub mod health;
pub mod inventory;
pub mod qrcodes;
pub mod transfers;
