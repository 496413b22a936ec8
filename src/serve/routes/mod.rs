pub mod info;
pub mod wallets;
