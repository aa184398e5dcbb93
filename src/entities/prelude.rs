pub use super::comments::Entity as Comments;
pub use super::posts::Entity as Posts;
