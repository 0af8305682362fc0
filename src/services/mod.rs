// Core services
pub mod orders;

pub use orders::{CartItemInput, CreateOrderInput, CreatedOrder, OrderService, OrderStatus};
