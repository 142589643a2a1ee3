pub mod convert;
pub mod dynamodb;
pub mod expression;
pub mod streams;
