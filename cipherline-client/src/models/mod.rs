mod identity;
mod message;
mod shared_key;
mod user;

pub use identity::Identity;
pub use message::Message;
pub use shared_key::{KeyMaterial, Participants, SharedKeyRecord};
pub use user::User;
