pub mod memstore;
pub mod scheme;
pub mod store;
pub mod xlinestore;
