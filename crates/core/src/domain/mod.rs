pub mod actor;
pub mod budget;
pub mod history;
pub mod notification;
pub mod price_quote;
pub mod request;
