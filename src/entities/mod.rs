pub mod prelude;

pub mod comments;
pub mod posts;
