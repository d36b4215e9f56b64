//! External-collaborator surface: block devices and file descriptors.
//! See SPEC_FULL.md §2 — these are thin, closed-enum boundaries, not a
//! filesystem implementation (FAT32/GPT remain out of scope).

pub mod blockdev;
pub mod fd;
