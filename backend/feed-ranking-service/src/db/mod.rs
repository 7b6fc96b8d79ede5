pub mod content_repo;
pub mod social_repo;
pub mod visibility_repo;

pub use content_repo::ContentRepo;
pub use social_repo::SocialRepo;
pub use visibility_repo::VisibilityRepo;
