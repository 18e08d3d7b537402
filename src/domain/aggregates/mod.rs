//! Aggregates module
pub mod product;
pub mod order;
pub mod cart;
pub mod ledger;

pub use product::{Product, StockLevel};
pub use order::{LineItem, Order, OrderError, OrderRecord, OrderStatus, PaymentRecord, StockEffect, Transition, TransitionOrigin};
pub use cart::{Cart, CartLine};
pub use ledger::{StockChange, StockLedgerEntry, StockReason};
