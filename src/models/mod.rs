pub mod address;
pub mod assignment;
pub mod order;
pub mod rider;
pub mod shop;
pub mod tracking;
