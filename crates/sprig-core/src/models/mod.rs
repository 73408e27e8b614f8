//! Data models shared by the store client, the live aggregate, and the editor

mod link;
mod profile;
mod section;

pub use link::{Link, LinkId, LinkPatch};
pub use profile::{Profile, ProfileId, ProfilePatch};
pub use section::{Section, SectionId, SectionPatch};
