//! Aggregates module
pub mod product;
pub mod order;
pub mod cart;
pub mod voucher;
pub mod payment;

pub use product::{Product, ProductError, ProductStatus};
pub use order::{LineItem, Order, OrderDraft, OrderError, OrderStatus, PaymentMethod, ShippingInfo};
pub use cart::{Cart, CartError, CartItem};
pub use voucher::{CustomerRanking, DiscountKind, Voucher};
pub use payment::{PaymentStatus, PaymentTransaction};
