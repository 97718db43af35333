pub mod health;
pub mod market_data;
pub mod subscribe;
pub mod sync;
pub mod ws;
