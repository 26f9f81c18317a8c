// Core components
pub mod coupons;
pub mod orders;
pub mod stock;
pub mod wallet;

// Checkout and its collaborators
pub mod cart;
pub mod catalog;
pub mod checkout;

// External integrations
pub mod payment_gateway;
