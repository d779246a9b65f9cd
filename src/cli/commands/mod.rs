pub mod audit;
pub mod history;
pub mod token;
