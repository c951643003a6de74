pub mod caption;
pub mod translate;
