pub mod prefix;
pub mod publish;
pub mod utils;
