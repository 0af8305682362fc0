pub mod notification_outbox;
pub mod order;
pub mod order_item;
pub mod user;
