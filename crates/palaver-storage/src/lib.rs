//! Palaver storage library
//!
//! Filesystem side of the attachment store: naming conventions, the
//! directory registry service, and the allocator that decides (and creates)
//! the physical directory receiving the next upload.
//!
//! # Naming
//!
//! Finalized non-avatar objects live under `<id>_<content_hash>` inside their
//! registered folder. Thumbnails are independent rows with their own id/hash
//! pair. Avatars keep the original filename inside a fixed avatar directory,
//! a deliberately distinct legacy scheme. Staged uploads use an unguessable
//! `post_tmp_` temporary name so a failed validation never collides with a
//! final name.

pub mod allocator;
pub mod paths;
pub mod registry;

pub use allocator::DirectoryAllocator;
pub use registry::DirectoryRegistry;
