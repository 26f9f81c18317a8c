pub mod active_coupon;
pub mod book;
pub mod cart_item;
pub mod category;
pub mod coupon;
pub mod order;
pub mod order_item;
pub mod user_coupon;
pub mod wallet;
pub mod wallet_transaction;
