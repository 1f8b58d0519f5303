pub mod error;
pub mod feed;
pub mod mutations;
pub mod notifications;
pub mod pets;
pub mod profiles;
pub mod store;

#[cfg(test)]
mod testing;

pub use error::{SocialError, SocialResult};
pub use mutations::MutationCoordinator;
pub use notifications::RetentionPolicy;
pub use store::Backend;
