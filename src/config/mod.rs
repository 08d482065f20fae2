pub mod env;
pub mod load;
pub mod model;
